use std::collections::HashMap;

use crate::{
    config,
    error::{Error, Result},
    types::ChannelType,
};

/// Validates a payload and returns its canonical serialized form.
pub type PayloadNormalizer = fn(&serde_json::Value) -> Result<serde_json::Value>;

/// Display metadata and payload normalization for one channel type.
pub struct ChannelDescriptor {
    pub channel_type: ChannelType,
    pub display_name: &'static str,
    pub normalize_credentials: Option<PayloadNormalizer>,
    pub normalize_binding: Option<PayloadNormalizer>,
}

/// Registry of channel descriptors.
///
/// Built explicitly at startup and handed to whoever needs it; registration
/// is append-only and a second descriptor for the same type is rejected.
#[derive(Default)]
pub struct ChannelRegistry {
    items: HashMap<ChannelType, ChannelDescriptor>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in channel descriptor.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for descriptor in builtin_descriptors() {
            // Built-in types are distinct, so registration cannot collide.
            let _ = registry.register(descriptor);
        }
        registry
    }

    pub fn register(&mut self, descriptor: ChannelDescriptor) -> Result<()> {
        if self.items.contains_key(&descriptor.channel_type) {
            return Err(Error::DuplicateDescriptor {
                channel: descriptor.channel_type,
            });
        }
        self.items.insert(descriptor.channel_type, descriptor);
        Ok(())
    }

    pub fn get(&self, channel_type: ChannelType) -> Option<&ChannelDescriptor> {
        self.items.get(&channel_type)
    }

    pub fn list(&self) -> Vec<&ChannelDescriptor> {
        self.items.values().collect()
    }

    /// Parse a raw channel-type string, accepting only registered types.
    pub fn parse(&self, raw: &str) -> Result<ChannelType> {
        let channel_type: ChannelType = raw.parse()?;
        if self.items.contains_key(&channel_type) {
            Ok(channel_type)
        } else {
            Err(Error::unsupported_channel(raw.trim()))
        }
    }

    /// Canonicalize a credential payload via the descriptor's normalizer.
    pub fn normalize_credentials(
        &self,
        channel_type: ChannelType,
        raw: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let descriptor = self
            .get(channel_type)
            .ok_or_else(|| Error::unsupported_channel(channel_type))?;
        match descriptor.normalize_credentials {
            Some(normalize) => normalize(raw),
            None => Ok(raw.clone()),
        }
    }

    /// Canonicalize a user binding payload via the descriptor's normalizer.
    pub fn normalize_binding(
        &self,
        channel_type: ChannelType,
        raw: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let descriptor = self
            .get(channel_type)
            .ok_or_else(|| Error::unsupported_channel(channel_type))?;
        match descriptor.normalize_binding {
            Some(normalize) => normalize(raw),
            None => Ok(raw.clone()),
        }
    }
}

fn builtin_descriptors() -> Vec<ChannelDescriptor> {
    vec![
        ChannelDescriptor {
            channel_type: ChannelType::Telegram,
            display_name: "Telegram",
            normalize_credentials: Some(|raw| {
                config::normalize_credentials(ChannelType::Telegram, raw)
            }),
            normalize_binding: Some(|raw| config::normalize_binding(ChannelType::Telegram, raw)),
        },
        ChannelDescriptor {
            channel_type: ChannelType::Feishu,
            display_name: "Feishu",
            normalize_credentials: Some(|raw| {
                config::normalize_credentials(ChannelType::Feishu, raw)
            }),
            normalize_binding: Some(|raw| config::normalize_binding(ChannelType::Feishu, raw)),
        },
        ChannelDescriptor {
            channel_type: ChannelType::Cli,
            display_name: "CLI",
            normalize_credentials: None,
            normalize_binding: None,
        },
        ChannelDescriptor {
            channel_type: ChannelType::Web,
            display_name: "Web",
            normalize_credentials: None,
            normalize_binding: None,
        },
    ]
}
