use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::warn;

use crate::client::ChatProviderClient;
use crate::types::{ChatRequest, ProviderDelta, ProviderError};

/// Talks to the external Chat Provider's streaming HTTP endpoint over SSE.
/// The provider is an opaque upstream service — this client only knows its
/// wire shape, not which vendor model sits behind it.
pub struct HttpChatProviderClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpChatProviderClient {
    pub fn new(base_url: impl Into<String>, timeout_ms: u64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .expect("http client builds with valid defaults");
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ChatProviderClient for HttpChatProviderClient {
    async fn stream_chat(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<Result<ProviderDelta, ProviderError>>,
    ) -> Result<(), ProviderError> {
        let url = format!("{}/v1/chat/stream", self.base_url);
        let response = self.http.post(&url).json(req).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            let _ = tx
                .send(Err(ProviderError::Api { status, message }))
                .await;
            return Ok(());
        }

        let mut stream = response.bytes_stream();
        let mut buf = String::new();

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => {
                    let _ = tx.send(Err(ProviderError::Http(e))).await;
                    return Ok(());
                }
            };
            buf.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(pos) = buf.find("\n\n") {
                let event = buf[..pos].to_string();
                buf.drain(..pos + 2);
                for line in event.lines() {
                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if data == "[DONE]" {
                        return Ok(());
                    }
                    match serde_json::from_str::<ProviderDelta>(data) {
                        Ok(delta) => {
                            if tx.send(Ok(delta)).await.is_err() {
                                return Ok(());
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to parse provider delta");
                            let _ = tx
                                .send(Err(ProviderError::Parse(e.to_string())))
                                .await;
                        }
                    }
                }
            }
        }

        Ok(())
    }
}
