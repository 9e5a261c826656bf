//! Declarative gateway description, loaded from JSON.
//!
//! ```json
//! {
//!   "client_id": "tether",
//!   "broker": "127.0.0.1:1883",
//!   "properties": [
//!     { "name": "lamp", "type": "bool", "initial": false,
//!       "state_topic": "lamp/state", "command_topic": "lamp/set",
//!       "state_payload": { "on": "ON", "off": "OFF" } },
//!     { "name": "temp", "type": "float", "state_topic": "sensor", "json_field": "temperature" }
//!   ]
//! }
//! ```

use std::{path::Path, time::Duration};

use serde::Deserialize;
use serde_json::Value;
use tether_common::{OnOffPayload, TetherString, TopicName, ValueKind};

use crate::{
    Error, Result,
    registry::{PropertyBuilder, Registry},
    variables::Variables,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_broker")]
    pub broker: String,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    #[serde(default)]
    pub properties: Vec<PropertyConfig>,
}

fn default_client_id() -> String {
    "tether".to_owned()
}

fn default_broker() -> String {
    "127.0.0.1:1883".to_owned()
}

fn default_tick_interval() -> u64 {
    20
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PropertyConfig {
    /// Name of the backing variable.
    pub name: TetherString,
    #[serde(rename = "type")]
    pub kind: ValueKind,
    #[serde(default)]
    pub initial: Option<Value>,
    #[serde(default)]
    pub state_topic: Option<TopicName>,
    #[serde(default)]
    pub command_topic: Option<TopicName>,
    #[serde(default)]
    pub json_field: Option<TetherString>,
    #[serde(default)]
    pub state_payload: Option<OnOffPayload>,
    #[serde(default)]
    pub command_payload: Option<OnOffPayload>,
}

impl GatewayConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Create the variables and the registry described by this config.
    ///
    /// Nothing is returned unless every property is valid.
    pub fn build(&self) -> Result<(Variables, Registry)> {
        let mut vars = Variables::new();
        let mut registry = Registry::new();

        for property in &self.properties {
            if vars.lookup(&property.name).is_some() {
                return Err(Error::DuplicateVariable(property.name.clone()));
            }

            property.register(&mut vars, &mut registry)?;
        }

        Ok((vars, registry))
    }
}

impl PropertyConfig {
    fn register(&self, vars: &mut Variables, registry: &mut Registry) -> Result<()> {
        if self.kind != ValueKind::Bool
            && (self.state_payload.is_some() || self.command_payload.is_some())
        {
            return Err(Error::IncompatiblePayload {
                property: self.name.clone(),
                kind: self.kind,
            });
        }

        let invalid = || Error::InvalidInitial { variable: self.name.clone(), kind: self.kind };
        let initial = self.initial.as_ref().filter(|v| !v.is_null());

        match self.kind {
            ValueKind::Bool => {
                let initial = match initial {
                    Some(v) => v.as_bool().ok_or_else(invalid)?,
                    None => false,
                };

                let mut builder = self.topics(registry.add(vars.add(self.name.clone(), initial)));

                if let Some(OnOffPayload { on, off }) = &self.state_payload {
                    builder = builder.state_payload(on.clone(), off.clone());
                }
                if let Some(OnOffPayload { on, off }) = &self.command_payload {
                    builder.command_payload(on.clone(), off.clone());
                }
            }
            ValueKind::Int => {
                let initial = match initial {
                    Some(v) => v
                        .as_i64()
                        .and_then(|n| i32::try_from(n).ok())
                        .ok_or_else(invalid)?,
                    None => 0,
                };

                self.topics(registry.add(vars.add(self.name.clone(), initial)));
            }
            ValueKind::Float => {
                let initial = match initial {
                    Some(v) => v
                        .as_f64()
                        .map(|n| n as f32)
                        .filter(|n| n.is_finite())
                        .ok_or_else(invalid)?,
                    None => 0.0,
                };

                self.topics(registry.add(vars.add(self.name.clone(), initial)));
            }
            ValueKind::String => {
                let initial = match initial {
                    Some(v) => v.as_str().ok_or_else(invalid)?.to_owned(),
                    None => String::new(),
                };

                self.topics(registry.add(vars.add(self.name.clone(), initial)));
            }
        }

        Ok(())
    }

    fn topics<'a, T>(&self, mut builder: PropertyBuilder<'a, T>) -> PropertyBuilder<'a, T> {
        if let Some(topic) = &self.state_topic {
            builder = builder.state_topic(topic.clone());
        }
        if let Some(topic) = &self.command_topic {
            builder = builder.command_topic(topic.clone());
        }
        if let Some(field) = &self.json_field {
            builder = builder.json_field(field.clone());
        }
        builder
    }
}
