use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::types::{ChatRequest, ProviderDelta, ProviderError};

/// External Chat Provider contract: a streaming request/response pair, one
/// call producing a channel of deltas, no non-streaming fallback (the Chat
/// Provider has none).
#[async_trait]
pub trait ChatProviderClient: Send + Sync {
    /// Open a stream for `req`, forwarding every delta (or terminal error)
    /// onto `tx`. Returns once the provider stream ends; errors encountered
    /// mid-stream are sent through `tx` rather than returned here, matching
    /// the contract's "errors are surfaced as stream errors, not synthetic
    /// deltas."
    async fn stream_chat(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<Result<ProviderDelta, ProviderError>>,
    ) -> Result<(), ProviderError>;
}
