use crate::ollama::InferenceClient;
use std::sync::Arc;
use tracing::warn;

/// Live view of the models installed on the inference runtime.
///
/// Listing failures are swallowed: an empty result means "unknown",
/// not "no models exist", and callers must treat it that way.
#[derive(Clone)]
pub struct ModelCatalog {
    client: Arc<dyn InferenceClient>,
}

impl ModelCatalog {
    pub fn new(client: Arc<dyn InferenceClient>) -> Self {
        Self { client }
    }

    pub async fn list_installed(&self) -> Vec<String> {
        match self.client.list().await {
            Ok(models) => models,
            Err(err) => {
                warn!("Model listing unavailable: {}", err);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ollama::testing::ScriptedClient;

    #[tokio::test]
    async fn returns_installed_models_in_runtime_order() {
        let catalog = ModelCatalog::new(Arc::new(ScriptedClient::new(["tiny", "mistral:7b"])));
        assert_eq!(catalog.list_installed().await, vec!["tiny", "mistral:7b"]);
    }

    #[tokio::test]
    async fn listing_failure_degrades_to_empty() {
        let catalog = ModelCatalog::new(Arc::new(ScriptedClient::with_unavailable_listing()));
        assert!(catalog.list_installed().await.is_empty());
    }
}
