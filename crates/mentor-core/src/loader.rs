use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::OnceCell;
use tracing::info;

use crate::agent::memory::MemoryStore;
use crate::error::{AdapterError, Result};

/// Heavyweight dependencies shared by every agent build in the process.
pub struct ModuleSet {
    pub store: Arc<MemoryStore>,
}

/// One-shot loader for the [`ModuleSet`].
///
/// Concurrent callers share a single in-flight load. A failed load caches
/// nothing, so the next call starts over.
pub struct ModuleLoader {
    storage_path: PathBuf,
    cell: OnceCell<Arc<ModuleSet>>,
    attempts: AtomicUsize,
}

impl ModuleLoader {
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: storage_path.into(),
            cell: OnceCell::new(),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    pub async fn load(&self) -> Result<Arc<ModuleSet>> {
        self.cell
            .get_or_try_init(|| async {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                let path = self.storage_path.clone();
                let store = tokio::task::spawn_blocking(move || {
                    MemoryStore::open(&path)
                        .with_context(|| format!("opening memory store '{}'", path.display()))
                })
                .await
                .map_err(|e| AdapterError::DependencyLoad(e.into()))?
                .map_err(AdapterError::DependencyLoad)?;

                info!("Memory store ready at {}", self.storage_path.display());
                Ok::<_, AdapterError>(Arc::new(ModuleSet {
                    store: Arc::new(store),
                }))
            })
            .await
            .cloned()
    }

    /// Number of load attempts so far, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}
