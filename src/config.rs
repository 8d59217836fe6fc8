//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix, plus the remote API's own VAPI_ variables)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Serialization/deserialization library for converting between Rust structs and data formats
//! - **derive macros**: Automatically generate code for common traits (Debug, Clone, Serialize, Deserialize)
//! - **Result<T, E>**: Error handling that forces you to handle potential failures
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Special environment variables (HOST, PORT, VAPI_API_KEY, ...)
//! 2. Prefixed environment variables (APP_SERVER__PORT, APP_CLIENT__SERVER_URL, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use crate::audio::playback::{PlaybackFormat, DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Public endpoint of the remote calling API.
pub const DEFAULT_API_BASE_URL: &str = "https://api.vapi.ai";

/// Environment variables that map straight onto config keys.
///
/// These don't follow the APP_ prefix convention because deployment platforms
/// and the remote API's own tooling already use these names.
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("HOST", "server.host"),
    ("PORT", "server.port"),
    ("VAPI_API_KEY", "vapi.api_key"),
    ("VAPI_ASSISTANT_ID", "vapi.assistant_id"),
    ("VAPI_PHONE_NUMBER_ID", "vapi.phone_number_id"),
    ("VAPI_API_BASE_URL", "vapi.api_base_url"),
    ("RELAY_SERVER_URL", "client.server_url"),
];

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// The relay server only needs `server` and `vapi`; the listener only needs
/// `audio` and `client`. Grouping keeps each side's settings together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub vapi: VapiConfig,
    pub audio: AudioConfig,
    pub client: ClientConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Credentials and identifiers for the remote calling API.
///
/// ## Fields:
/// - `api_key`: Bearer token for the REST API
/// - `assistant_id`: Voice assistant that handles the call
/// - `phone_number_id`: Caller ID the call is placed from
/// - `api_base_url`: REST API root, defaults to the public endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VapiConfig {
    pub api_key: String,
    pub assistant_id: String,
    pub phone_number_id: String,
    pub api_base_url: String,
}

/// Output format for the listener.
///
/// The sample rate must equal the rate the remote feed emits. A mismatch plays
/// back at the wrong pitch and speed because nothing is resampled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Where the listener reaches the relay server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub server_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),  // Localhost only (safe for development)
                port: 8080,
            },
            vapi: VapiConfig {
                api_key: String::new(),
                assistant_id: String::new(),
                phone_number_id: String::new(),
                api_base_url: DEFAULT_API_BASE_URL.to_string(),
            },
            audio: AudioConfig {
                sample_rate: DEFAULT_SAMPLE_RATE,
                channels: DEFAULT_CHANNELS,
            },
            client: ClientConfig {
                server_url: "http://127.0.0.1:8080".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases (HOST, PORT and the VAPI_ variables)
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port (double underscore separates nesting)
    /// - `APP_AUDIO__SAMPLE_RATE=24000`: Override output sample rate
    /// - `VAPI_API_KEY=...`: Remote API key
    /// - `PORT=3000`: Special case for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        for (var, key) in ENV_OVERRIDES {
            if let Ok(value) = env::var(var) {
                settings = settings.set_override(*key, value)?;
            }
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - Sample rate and channel count are positive
    /// - The remote API base URL is present
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.audio.sample_rate == 0 {
            return Err(anyhow::anyhow!("Audio sample rate must be greater than 0"));
        }

        if self.audio.channels == 0 {
            return Err(anyhow::anyhow!("Audio channel count must be greater than 0"));
        }

        if self.vapi.api_base_url.trim().is_empty() {
            return Err(anyhow::anyhow!("Remote API base URL cannot be empty"));
        }

        Ok(())
    }

    /// Validate the settings the relay server cannot run without.
    ///
    /// Only `serve` calls this; the listener never talks to the remote API directly.
    pub fn validate_relay(&self) -> Result<()> {
        self.validate()?;

        let required = [
            ("VAPI_API_KEY", &self.vapi.api_key),
            ("VAPI_ASSISTANT_ID", &self.vapi.assistant_id),
            ("VAPI_PHONE_NUMBER_ID", &self.vapi.phone_number_id),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();

        if !missing.is_empty() {
            return Err(anyhow::anyhow!(
                "Missing remote API settings: {}",
                missing.join(", ")
            ));
        }

        Ok(())
    }

    /// Output format derived from the audio section.
    pub fn playback_format(&self) -> PlaybackFormat {
        PlaybackFormat {
            sample_rate: self.audio.sample_rate,
            channels: self.audio.channels,
        }
    }
}
