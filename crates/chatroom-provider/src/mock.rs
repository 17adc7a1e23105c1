use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::client::ChatProviderClient;
use crate::types::{ChatRequest, ProviderDelta, ProviderError};

/// A scripted Chat Provider for tests. Two modes: a single shared script
/// consumed by the first caller (`new`), or a per-model script table
/// (`keyed`) so one instance can serve several concurrent LLMs at once —
/// e.g. an `@all` fan-out where each model needs its own deltas.
pub struct MockChatProviderClient {
    script: Mutex<Vec<Result<ProviderDelta, ProviderError>>>,
    by_model: Mutex<HashMap<String, Vec<Result<ProviderDelta, ProviderError>>>>,
}

impl MockChatProviderClient {
    /// Deltas are played back in order, oldest first, to whichever call
    /// arrives first (regardless of requested model).
    pub fn new(script: Vec<Result<ProviderDelta, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script),
            by_model: Mutex::new(HashMap::new()),
        }
    }

    /// Each model id gets its own script, looked up by `req.models[0]`.
    pub fn keyed(by_model: HashMap<String, Vec<Result<ProviderDelta, ProviderError>>>) -> Self {
        Self {
            script: Mutex::new(Vec::new()),
            by_model: Mutex::new(by_model),
        }
    }

    pub fn text(model: &str, content: &str) -> Result<ProviderDelta, ProviderError> {
        Ok(ProviderDelta {
            model: model.to_string(),
            content: Some(content.to_string()),
            ..Default::default()
        })
    }

    pub fn opt_out(model: &str) -> Result<ProviderDelta, ProviderError> {
        Ok(ProviderDelta {
            model: model.to_string(),
            opted_out: true,
            ..Default::default()
        })
    }
}

#[async_trait]
impl ChatProviderClient for MockChatProviderClient {
    async fn stream_chat(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<Result<ProviderDelta, ProviderError>>,
    ) -> Result<(), ProviderError> {
        let keyed_script = req.models.first().and_then(|model| {
            let mut guard = self.by_model.lock().expect("mock lock poisoned");
            guard.remove(model)
        });
        let script = match keyed_script {
            Some(s) => s,
            None => {
                let mut guard = self.script.lock().expect("mock lock poisoned");
                std::mem::take(&mut *guard)
            }
        };
        for item in script {
            if tx.send(item).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}
