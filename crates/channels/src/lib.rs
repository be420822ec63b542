//! Channel core: adapter contract, descriptor registry, local fan-out hub,
//! and the adapter supervisor that reconciles running platform connections
//! against stored configuration.
//!
//! Platform crates implement [`ChannelAdapter`]; the routing crate implements
//! [`InboundProcessor`]. Everything stateful the supervisor owns lives behind
//! narrow locks that are never held across I/O.

pub mod adapter;
pub mod config;
pub mod error;
pub mod hub;
pub mod manager;
pub mod registry;
pub mod store;
pub mod types;

pub use {
    adapter::{AdapterRunner, ChannelAdapter, InboundHandler, InboundProcessor, Middleware},
    error::{Error, Result},
    hub::{SessionHub, SessionStream},
    manager::ChannelManager,
    registry::{ChannelDescriptor, ChannelRegistry},
    store::ConfigStore,
    types::{
        BindingCriteria, ChannelConfig, ChannelSession, ChannelType, ChannelUserBinding,
        InboundMessage, OutboundMessage, SendRequest, SessionRecord,
    },
};
