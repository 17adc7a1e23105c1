use thiserror::Error;

/// Workspace-wide error taxonomy. One variant per failure family; `code()`
/// renders the stable string sent in `error` events and unary RPC responses.
#[derive(Debug, Error)]
pub enum RoomError {
    #[error("room not found: {room_id}")]
    RoomNotFound { room_id: String },

    #[error("poll not found: {poll_id}")]
    PollNotFound { poll_id: String },

    #[error("poll requires at least two options")]
    InvalidPoll,

    #[error("poll is closed: {poll_id}")]
    PollClosed { poll_id: String },

    #[error("llm not found: {llm_id}")]
    LlmNotFound { llm_id: String },

    #[error("llm id already in use: {llm_id}")]
    DuplicateLlmId { llm_id: String },

    #[error("llm provider error ({display_name}): {detail}")]
    LlmError { display_name: String, detail: String },

    #[error("store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RoomError {
    /// Short error code sent to clients in `error` events / unary RPC failures.
    pub fn code(&self) -> &'static str {
        match self {
            RoomError::RoomNotFound { .. } => "ROOM_NOT_FOUND",
            RoomError::PollNotFound { .. } => "POLL_NOT_FOUND",
            RoomError::InvalidPoll => "INVALID_POLL",
            RoomError::PollClosed { .. } => "POLL_CLOSED",
            RoomError::LlmNotFound { .. } => "LLM_NOT_FOUND",
            RoomError::DuplicateLlmId { .. } => "DUPLICATE_LLM_ID",
            RoomError::LlmError { .. } => "LLM_ERROR",
            RoomError::Store(_) => "STORE_ERROR",
            RoomError::Config(_) => "CONFIG_ERROR",
            RoomError::Serialization(_) => "SERIALIZATION_ERROR",
            RoomError::Io(_) => "IO_ERROR",
            RoomError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, RoomError>;
