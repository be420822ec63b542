//! Inbound routing: resolve who is talking in which session, mint identity
//! assertions, and carry the message to the conversational backend.
//!
//! [`InboundRouter`] implements the processor seam of the channels crate and
//! is the single place inbound traffic from every platform converges.

mod bind;
pub mod replies;
mod router;

pub use router::InboundRouter;
