use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use crate::agent::memory::{MemoryStore, StoredMessage};
use crate::agent::model::Embedder;
use crate::message::Role;

/// Seed for a subject's working memory.
pub const DEFAULT_WORKING_MEMORY_TEMPLATE: &str = "# Student Profile
- Name:
- Grade level:
- Subjects of interest:
- Learning style:
- Strengths:
- Areas to improve:
- Goals:
- Notes:
";

#[derive(Debug, Clone)]
pub struct MemoryOptions {
    /// Recency window over the current thread.
    pub last_messages: usize,
    /// Semantic recall hits per generation.
    pub top_k: usize,
    /// Neighbours included on each side of a recall hit.
    pub message_range: usize,
    pub working_memory_template: String,
}

impl Default for MemoryOptions {
    fn default() -> Self {
        Self {
            last_messages: 15,
            top_k: 5,
            message_range: 3,
            working_memory_template: DEFAULT_WORKING_MEMORY_TEMPLATE.to_string(),
        }
    }
}

/// The three memory channels supplied to one generation.
#[derive(Debug, Clone, Default)]
pub struct MemoryContext {
    pub working_memory: String,
    pub recent: Vec<StoredMessage>,
    pub recalled: Vec<StoredMessage>,
}

/// Binds the shared store to a credential-scoped embedder.
#[derive(Clone)]
pub struct MemoryBinding {
    store: Arc<MemoryStore>,
    embedder: Arc<dyn Embedder>,
    options: MemoryOptions,
}

impl MemoryBinding {
    pub fn new(store: Arc<MemoryStore>, embedder: Arc<dyn Embedder>, options: MemoryOptions) -> Self {
        Self {
            store,
            embedder,
            options,
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn options(&self) -> &MemoryOptions {
        &self.options
    }

    /// Gather working memory, the thread's recency window, and semantic
    /// recall for `query`. Embedding failures skip recall rather than fail.
    pub async fn load_context(
        &self,
        resource_id: &str,
        thread_id: &str,
        query: &str,
    ) -> Result<MemoryContext> {
        let working_memory = self
            .store
            .working_memory(resource_id, &self.options.working_memory_template)?;
        let recent = self
            .store
            .recent_messages(thread_id, self.options.last_messages)?;

        let recalled = if query.trim().is_empty() || self.options.top_k == 0 {
            Vec::new()
        } else {
            match self.embedder.embed(vec![query.to_string()]).await {
                Ok(vectors) => match vectors.first() {
                    Some(vector) => {
                        let exclude: Vec<i64> = recent.iter().map(|m| m.id).collect();
                        self.store.recall(
                            resource_id,
                            vector,
                            self.options.top_k,
                            self.options.message_range,
                            &exclude,
                        )?
                    }
                    None => Vec::new(),
                },
                Err(e) => {
                    warn!("Semantic recall skipped, embedding failed: {e}");
                    Vec::new()
                }
            }
        };

        debug!(
            "Memory context for '{resource_id}'/'{thread_id}': {} recent, {} recalled",
            recent.len(),
            recalled.len()
        );

        Ok(MemoryContext {
            working_memory,
            recent,
            recalled,
        })
    }

    /// Persist turns to the thread, embedding them in one batch.
    /// Turns are stored without vectors if embedding fails.
    pub async fn remember(
        &self,
        resource_id: &str,
        thread_id: &str,
        turns: &[(Role, String)],
    ) -> Result<()> {
        let texts: Vec<String> = turns.iter().map(|(_, t)| t.clone()).collect();
        let vectors: Vec<Option<Vec<f32>>> = match self.embedder.embed(texts).await {
            Ok(v) if v.len() == turns.len() => v.into_iter().map(Some).collect(),
            Ok(v) => {
                warn!(
                    "Embedder returned {} vectors for {} turns; storing without embeddings",
                    v.len(),
                    turns.len()
                );
                vec![None; turns.len()]
            }
            Err(e) => {
                warn!("Failed to embed turns, storing without embeddings: {e}");
                vec![None; turns.len()]
            }
        };

        for ((role, text), vector) in turns.iter().zip(vectors) {
            self.store.append_message(
                thread_id,
                resource_id,
                role.as_str(),
                text,
                vector.as_deref(),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Letter-frequency vectors: similar words land close together.
    struct LetterEmbedder;

    #[async_trait]
    impl Embedder for LetterEmbedder {
        async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0f32; 26];
                    for c in t.to_lowercase().chars().filter(|c| c.is_ascii_lowercase()) {
                        v[(c as u8 - b'a') as usize] += 1.0;
                    }
                    v
                })
                .collect())
        }
    }

    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        async fn embed(&self, _texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            anyhow::bail!("embedding endpoint unavailable")
        }
    }

    fn binding(embedder: Arc<dyn Embedder>) -> MemoryBinding {
        MemoryBinding::new(
            Arc::new(MemoryStore::in_memory().unwrap()),
            embedder,
            MemoryOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_first_context_is_seeded_template() {
        let memory = binding(Arc::new(LetterEmbedder));
        let ctx = memory.load_context("s1", "t1", "hello").await.unwrap();
        assert_eq!(ctx.working_memory, DEFAULT_WORKING_MEMORY_TEMPLATE);
        assert!(ctx.recent.is_empty());
        assert!(ctx.recalled.is_empty());
    }

    #[tokio::test]
    async fn test_remember_then_recall_across_threads() {
        let memory = binding(Arc::new(LetterEmbedder));
        memory
            .remember(
                "s1",
                "old-thread",
                &[
                    (Role::User, "photosynthesis".into()),
                    (Role::Assistant, "plants make sugar".into()),
                ],
            )
            .await
            .unwrap();

        let ctx = memory
            .load_context("s1", "new-thread", "photosynthesis again")
            .await
            .unwrap();
        assert!(ctx.recent.is_empty());
        assert!(ctx
            .recalled
            .iter()
            .any(|m| m.content == "photosynthesis" && m.thread_id == "old-thread"));
    }

    #[tokio::test]
    async fn test_recency_window_not_repeated_in_recall() {
        let memory = binding(Arc::new(LetterEmbedder));
        memory
            .remember("s1", "t1", &[(Role::User, "fractions".into())])
            .await
            .unwrap();

        let ctx = memory.load_context("s1", "t1", "fractions").await.unwrap();
        assert_eq!(ctx.recent.len(), 1);
        assert!(ctx.recalled.is_empty());
    }

    #[tokio::test]
    async fn test_embedding_failure_degrades() {
        let memory = binding(Arc::new(BrokenEmbedder));
        memory
            .remember("s1", "t1", &[(Role::User, "still saved".into())])
            .await
            .unwrap();

        let ctx = memory.load_context("s1", "t1", "saved").await.unwrap();
        assert_eq!(ctx.recent.len(), 1);
        assert_eq!(ctx.recent[0].content, "still saved");
        assert!(ctx.recalled.is_empty());
    }
}
