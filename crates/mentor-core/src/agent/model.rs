use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
#[allow(deprecated)]
use rig::client::completion::CompletionModelHandle;
use rig::client::{CompletionClient, EmbeddingsClient};
use rig::completion::{CompletionModel, CompletionRequest};
use rig::embeddings::EmbeddingModel;
use rig::message::AssistantContent;
use rig::providers::openai;
use rig::OneOrMany;

use crate::credential::Credential;

/// A chat completion endpoint bound to one credential and model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<OneOrMany<AssistantContent>>;
}

#[allow(deprecated)]
#[async_trait]
impl ChatModel for CompletionModelHandle<'static> {
    async fn complete(&self, request: CompletionRequest) -> Result<OneOrMany<AssistantContent>> {
        let response = self
            .completion(request)
            .await
            .map_err(|e| anyhow::anyhow!("LLM completion error: {e}"))?;
        Ok(response.choice)
    }
}

/// Text embedding function backing semantic recall.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// One vector per input, in input order.
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;
}

/// Adapts any rig embedding model.
pub struct RigEmbedder<M> {
    model: M,
}

impl<M> RigEmbedder<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }
}

#[async_trait]
impl<M> Embedder for RigEmbedder<M>
where
    M: EmbeddingModel + Send + Sync,
{
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = self
            .model
            .embed_texts(texts)
            .await
            .map_err(|e| anyhow::anyhow!("Embedding error: {e}"))?;
        Ok(embeddings
            .into_iter()
            .map(|e| e.vec.into_iter().map(|x| x as f32).collect())
            .collect())
    }
}

/// Builds credential-bound model clients. Called once per agent build.
pub trait ModelBackend: Send + Sync {
    fn chat_model(&self, credential: &Credential, model: &str) -> Result<Arc<dyn ChatModel>>;
    fn embedder(&self, credential: &Credential) -> Result<Arc<dyn Embedder>>;
}

/// OpenAI-compatible backend over rig's provider clients.
pub struct OpenAiBackend {
    api_base: String,
    embedding_model: String,
}

impl OpenAiBackend {
    pub fn new(api_base: impl Into<String>, embedding_model: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            embedding_model: embedding_model.into(),
        }
    }
}

impl ModelBackend for OpenAiBackend {
    #[allow(deprecated)]
    fn chat_model(&self, credential: &Credential, model: &str) -> Result<Arc<dyn ChatModel>> {
        let client: openai::CompletionsClient = openai::CompletionsClient::builder()
            .api_key(credential.expose())
            .base_url(&self.api_base)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create OpenAI client: {e}"))?;
        let model = client.completion_model(model);
        Ok(Arc::new(CompletionModelHandle::new(Arc::new(model))))
    }

    fn embedder(&self, credential: &Credential) -> Result<Arc<dyn Embedder>> {
        let client: openai::Client = openai::Client::builder()
            .api_key(credential.expose())
            .base_url(&self.api_base)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create OpenAI embeddings client: {e}"))?;
        let model = client.embedding_model(&self.embedding_model);
        Ok(Arc::new(RigEmbedder::new(model)))
    }
}
