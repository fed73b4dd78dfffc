//! Configuration.
//!
//! Mirrors `syncserver-settings::Settings::with_env_and_config_file`: an
//! optional TOML file merged with environment overrides, prefix
//! `PAYLOAD_PROXY_`, double-underscore nesting (`PAYLOAD_PROXY_LOG__LEVEL`).
//! One field per configuration key the proxy needs, plus the ambient
//! knobs a runnable proxy needs that the core itself has no opinion about.

use std::net::SocketAddr;
use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CodecStrategy {
    #[default]
    DefaultInlineTransform,
    BatchedExternalStore,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        LogSettings {
            level: "info".into(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Path to the serialized `FileDescriptorSet` the descriptor store
    /// loads at startup. Required; startup fails if the file is missing.
    pub descriptor_file_path: PathBuf,

    /// Only messages in packages starting with this prefix are scanned for
    /// payload-bearing fields.
    pub scan_package_prefix: String,

    /// Suppresses the indexed-attributes-container sentinel (`SA`) from the
    /// index when set.
    #[serde(default)]
    pub exclude_indexed_attributes_container: bool,

    /// Fully-qualified name of the `SA` sentinel type. Required whenever
    /// `exclude_indexed_attributes_container` is set; otherwise unused.
    #[serde(default)]
    pub indexed_attributes_container_type: Option<String>,

    #[serde(default)]
    pub codec_strategy: CodecStrategy,

    /// Address the HTTP/2 front listens on.
    pub listen_addr: SocketAddr,

    /// `host:port` of the upstream gRPC service calls are forwarded to.
    pub upstream_addr: String,

    #[serde(default)]
    pub log: LogSettings,
}

impl Settings {
    /// Load settings from an optional TOML file, then apply environment
    /// overrides. Environment variables are prefixed `PAYLOAD_PROXY_` and
    /// use `__` to address nested fields (e.g. `PAYLOAD_PROXY_LOG__JSON`).
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = config_file {
            builder = builder.add_source(File::with_name(path));
        }
        builder = builder.add_source(
            Environment::with_prefix("PAYLOAD_PROXY")
                .separator("__")
                .try_parsing(true),
        );
        builder.build()?.try_deserialize()
    }
}
