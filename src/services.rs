//! Composition root shared by every engine in a process.

use std::sync::Arc;

use chat_provider::{ChatProvider, ProviderInitError};
use chat_provider_ollama::{OllamaProvider, OllamaProviderConfig};
use field_codec::FieldCodec;
use session_store::{SessionStore, SessionStoreError, SessionSummary};
use thiserror::Error;

use crate::config::EngineSettings;

#[derive(Debug, Error)]
pub enum ServicesError {
    #[error(transparent)]
    Provider(#[from] ProviderInitError),
    #[error(transparent)]
    Store(#[from] SessionStoreError),
}

/// Provider, store and settings handed to each engine. Cheap to clone.
#[derive(Clone)]
pub struct Services {
    pub provider: Arc<dyn ChatProvider>,
    pub store: SessionStore,
    pub settings: Arc<EngineSettings>,
}

impl Services {
    pub fn new(provider: Arc<dyn ChatProvider>, store: SessionStore, settings: EngineSettings) -> Self {
        Self {
            provider,
            store,
            settings: Arc::new(settings),
        }
    }

    /// Wires the Ollama provider and the session database described by
    /// `settings`, reading the encryption key from the environment.
    pub async fn from_settings(settings: EngineSettings) -> Result<Self, ServicesError> {
        let provider = OllamaProvider::new(
            OllamaProviderConfig::new()
                .with_base_url(settings.base_url.clone())
                .with_timeout(settings.timeout),
        )?;

        let codec = FieldCodec::from_env();
        let store = match settings.database_path.as_deref() {
            Some(path) => SessionStore::open(path, codec).await?,
            None => {
                tracing::warn!("no database_path configured; sessions live only in memory");
                SessionStore::open_in_memory(codec).await?
            }
        };

        tracing::info!(
            provider = provider.provider_id(),
            base_url = %settings.base_url,
            "conversation services ready"
        );
        Ok(Self::new(Arc::new(provider), store, settings))
    }

    /// Sessions visible to `owner`, newest first.
    pub async fn list_sessions(
        &self,
        owner: Option<&str>,
    ) -> Result<Vec<SessionSummary>, SessionStoreError> {
        self.store.list_sessions(owner).await
    }

    /// Removes a session and its messages.
    pub async fn delete_session(
        &self,
        session_id: i64,
        owner: Option<&str>,
    ) -> Result<(), SessionStoreError> {
        let _lock = self.store.lock_session(session_id).await;
        self.store.delete_session(session_id, owner).await
    }
}
