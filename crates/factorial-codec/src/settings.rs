//! File-backed codec settings.
//!
//! ```toml
//! format = "json"
//! policy = "factorial.strict"
//! logging = "log_warnings_and_errors"
//! error_handling = "throw_on_warnings"
//! ```
//!
//! Every key is optional. The policy id is resolved against a
//! [`PolicyRegistry`] when the settings are turned into a
//! [`SerializationConfig`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::{DebugContext, ErrorHandlingPolicy, LoggingPolicy, SerializationConfig};
use crate::data::Format;
use crate::error::CodecError;
use crate::logger::Logger;
use crate::policy::{self, PolicyRegistry};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecSettings {
    pub format: Format,
    pub policy: String,
    pub logging: LoggingPolicy,
    pub error_handling: ErrorHandlingPolicy,
}

impl Default for CodecSettings {
    fn default() -> Self {
        Self {
            format: Format::default(),
            policy: policy::CONVENTIONAL_ID.to_owned(),
            logging: LoggingPolicy::default(),
            error_handling: ErrorHandlingPolicy::default(),
        }
    }
}

impl CodecSettings {
    pub fn from_toml_str(text: &str) -> Result<Self, CodecError> {
        toml::from_str(text).map_err(|e| CodecError::Settings(e.to_string()))
    }

    pub fn from_ron_str(text: &str) -> Result<Self, CodecError> {
        ron::from_str(text).map_err(|e| CodecError::Settings(e.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String, CodecError> {
        toml::to_string(self).map_err(|e| CodecError::Settings(e.to_string()))
    }

    /// Resolve the policy id and build a configuration logging to `logger`.
    pub fn to_config(
        &self,
        registry: &PolicyRegistry,
        logger: Arc<dyn Logger>,
    ) -> Result<SerializationConfig, CodecError> {
        Ok(SerializationConfig {
            policy: registry.resolve(&self.policy)?,
            debug: DebugContext {
                logger,
                logging: self.logging,
                error_handling: self.error_handling,
            },
        })
    }
}
