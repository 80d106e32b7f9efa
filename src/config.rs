use crate::error::VigilError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Compiled-in push server defaults. Overridable through `channel.host_port`
/// (TOML/env) or an explicit [`VigilConfig`] handed to the session.
pub const DEFAULT_PUSH_HOST: &str = "push.vigil-sync.net";
pub const DEFAULT_PUSH_PORT: u16 = 5222;
pub const DEFAULT_FALLBACK_PORT: u16 = 443;

const DEFAULT_CONFIG_FILE: &str = "vigil.toml";
const ENV_PREFIX: &str = "VIGIL_";

/// Configuration for the invalidation session.
///
/// Override precedence, highest first: an explicit `VigilConfig` passed to
/// the session, then `VIGIL_*` environment variables, then `vigil.toml`,
/// then compiled defaults. [`VigilConfig::load`] applies everything below
/// the explicit layer.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VigilConfig {
    /// Push-channel settings (see the `channel` table).
    #[serde(default)]
    pub channel: ChannelSettings,

    /// Access-token retry cadence (see the `backoff` table).
    #[serde(default)]
    pub backoff: BackoffSettings,

    /// User agent presented to the push transport.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for VigilConfig {
    fn default() -> Self {
        Self {
            channel: ChannelSettings::default(),
            backoff: BackoffSettings::default(),
            user_agent: default_user_agent(),
        }
    }
}

impl VigilConfig {
    /// Builds a Figment merging defaults, an optional `vigil.toml`, and
    /// `VIGIL_*` environment variables (nested keys split on `__`, e.g.
    /// `VIGIL_CHANNEL__HOST_PORT`).
    pub fn figment() -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(VigilConfig::default()));
        if PathBuf::from(DEFAULT_CONFIG_FILE).is_file() {
            figment = figment.merge(Toml::file(DEFAULT_CONFIG_FILE));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn load() -> Result<Self, VigilError> {
        Self::figment()
            .extract()
            .map_err(|e| VigilError::Config(Box::new(e)))
    }
}

/// How to reach the push transport.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelSettings {
    /// Prefer the GCM-analog channel over the push client.
    /// TOML: `channel.use_gcm`. Default: `false`.
    #[serde(default)]
    pub use_gcm: bool,

    /// `host[:port]` override for the push server. A malformed port leaves
    /// the compiled default untouched.
    /// TOML: `channel.host_port`.
    #[serde(default)]
    pub host_port: Option<String>,

    /// Port to fall back to when the primary port is unreachable.
    /// TOML: `channel.fallback_port`. Default: `443`.
    #[serde(default = "default_fallback_port")]
    pub fallback_port: u16,

    /// Allow plaintext connections to the push server. Test-only escape
    /// hatch.
    /// TOML: `channel.allow_insecure`. Default: `false`.
    #[serde(default)]
    pub allow_insecure: bool,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            use_gcm: false,
            host_port: None,
            fallback_port: default_fallback_port(),
            allow_insecure: false,
        }
    }
}

/// Exponential backoff policy for access-token retries. Defaults match the
/// historical policy: 2 s initial, doubling, 4 h ceiling, jitter on.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackoffSettings {
    /// TOML: `backoff.initial_delay_ms`. Default: `2000`.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Multiplier applied after each consecutive failure.
    /// TOML: `backoff.factor`. Default: `2.0`.
    #[serde(default = "default_factor")]
    pub factor: f32,

    /// TOML: `backoff.max_delay_ms`. Default: `14400000` (4 hours).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Randomize delays to spread retries across clients.
    /// TOML: `backoff.jitter`. Default: `true`.
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            factor: default_factor(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

fn default_user_agent() -> String {
    format!("vigil/{}", env!("CARGO_PKG_VERSION"))
}

fn default_fallback_port() -> u16 {
    DEFAULT_FALLBACK_PORT
}

fn default_initial_delay_ms() -> u64 {
    2_000
}

fn default_factor() -> f32 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    1_000 * 3_600 * 4
}

fn default_jitter() -> bool {
    true
}
