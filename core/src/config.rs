//! Client configuration.
//!
//! A `ClientConfig` can be deserialized from any serde format or read from
//! the environment:
//!
//! | variable              | meaning                                   |
//! |-----------------------|-------------------------------------------|
//! | `CRM_BASE_URL`        | API root, required                        |
//! | `CRM_ACCESS_TOKEN`    | sent as the `access_token` query parameter |
//! | `CRM_TIMEZONE_OFFSET` | reference offset for date fields, seconds |

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::normalize::Normalizer;
use crate::suppress::Suppression;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value '{value}' for {name}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Default policy for calls that pass no override.
    #[serde(default)]
    pub suppression: Suppression,
    #[serde(default)]
    pub timezone_offset_seconds: i32,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            access_token: None,
            suppression: Suppression::default(),
            timezone_offset_seconds: 0,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let base_url = lookup("CRM_BASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::Missing("CRM_BASE_URL"))?;
        let access_token = lookup("CRM_ACCESS_TOKEN").filter(|token| !token.is_empty());
        let timezone_offset_seconds = match lookup("CRM_TIMEZONE_OFFSET") {
            None => 0,
            Some(raw) => raw
                .trim()
                .parse::<i32>()
                .ok()
                .filter(|seconds| zone(*seconds).is_some())
                .ok_or(ConfigError::Invalid {
                    name: "CRM_TIMEZONE_OFFSET",
                    value: raw,
                })?,
        };
        Ok(Self {
            base_url,
            access_token,
            suppression: Suppression::default(),
            timezone_offset_seconds,
        })
    }

    /// Normalizer in the configured offset. Offsets of a day or more are
    /// rejected, including ones that arrived through deserialization.
    pub fn normalizer(&self) -> Result<Normalizer, ConfigError> {
        zone(self.timezone_offset_seconds)
            .map(Normalizer::new)
            .ok_or_else(|| ConfigError::Invalid {
                name: "timezone_offset_seconds",
                value: self.timezone_offset_seconds.to_string(),
            })
    }
}

fn zone(seconds: i32) -> Option<FixedOffset> {
    FixedOffset::east_opt(seconds)
}
