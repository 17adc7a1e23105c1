pub mod client;
pub mod http;
pub mod mock;
pub mod types;

pub use client::ChatProviderClient;
pub use http::HttpChatProviderClient;
pub use mock::MockChatProviderClient;
pub use types::{ChatMessage, ChatRequest, ProviderDelta, ProviderError, ToolCallDelta, ToolDefinition};
