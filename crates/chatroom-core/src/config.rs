use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8089;
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const MAX_FRAME_BYTES: usize = 128 * 1024;
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;
pub const HISTORY_PAGE_SIZE: usize = 50;

/// Top-level config (room.toml + ROOM_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub chat_provider: ChatProviderConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig {
                bind: DEFAULT_BIND.to_string(),
                port: DEFAULT_PORT,
            },
            chat_provider: ChatProviderConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

/// Connection details for the external chat-completion service that backs
/// every LLM participant. The orchestrator speaks to it over HTTP/SSE; it
/// does not know or care which vendor model sits behind it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatProviderConfig {
    #[serde(default = "default_chat_provider_base_url")]
    pub base_url: String,
    #[serde(default = "default_chat_provider_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ChatProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_chat_provider_base_url(),
            timeout_ms: default_chat_provider_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
    #[serde(default = "default_history_page_size")]
    pub history_page_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: default_max_frame_bytes(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            history_page_size: default_history_page_size(),
        }
    }
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_chat_provider_base_url() -> String {
    "http://localhost:9000".to_string()
}
fn default_chat_provider_timeout_ms() -> u64 {
    30_000
}
fn default_max_frame_bytes() -> usize {
    MAX_FRAME_BYTES
}
fn default_outbound_queue_capacity() -> usize {
    OUTBOUND_QUEUE_CAPACITY
}
fn default_history_page_size() -> usize {
    HISTORY_PAGE_SIZE
}

impl RoomConfig {
    /// Load config from a TOML file with ROOM_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ./room.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(|| "room.toml".to_string());

        let config: RoomConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("ROOM_").split("_"))
            .extract()
            .map_err(|e| crate::error::RoomError::Config(e.to_string()))?;

        Ok(config)
    }
}
