//! Indexer protocol and the job type → indexer registry.
//!
//! Every built-in job type maps to a factory creating a fresh [`Indexer`]
//! for one job. Incremental support is a capability flag; indexers without
//! it are run in full mode by the runner.

pub mod base;
pub mod file;
pub mod page;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::JobConfig;
use crate::context::RunContext;

pub use base::{IndexerBase, ParentRecord};
pub use file::FileIndexer;
pub use page::PageIndexer;

#[async_trait]
pub trait Indexer: Send {
    fn supports_incremental(&self) -> bool {
        false
    }

    /// Index everything the job covers. Returns a human readable summary.
    async fn start_indexing(&mut self, ctx: &mut RunContext) -> Result<String>;

    /// Index what changed since the last run. Only called when
    /// [`supports_incremental`](Self::supports_incremental) is true.
    async fn start_incremental_indexing(&mut self, ctx: &mut RunContext) -> Result<String> {
        self.start_indexing(ctx).await
    }

    /// Per-item errors collected while indexing.
    fn errors(&self) -> &[String];

    /// Milliseconds since the indexer was created.
    fn duration_ms(&self) -> i64;

    /// Whether the last call ran in incremental mode.
    fn ran_incremental(&self) -> bool;
}

pub type IndexerFactory = Arc<dyn Fn(&JobConfig) -> Box<dyn Indexer> + Send + Sync>;

#[derive(Clone, Default)]
pub struct IndexerRegistry {
    factories: HashMap<String, IndexerFactory>,
}

impl IndexerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `file` and `page` indexers.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(
            "file",
            Arc::new(|job: &JobConfig| Box::new(FileIndexer::new(job.clone())) as Box<dyn Indexer>),
        );
        registry.register(
            "page",
            Arc::new(|job: &JobConfig| Box::new(PageIndexer::new(job.clone())) as Box<dyn Indexer>),
        );
        registry
    }

    pub fn register(&mut self, job_type: &str, factory: IndexerFactory) {
        self.factories.insert(job_type.to_string(), factory);
    }

    pub fn create(&self, job: &JobConfig) -> Option<Box<dyn Indexer>> {
        self.factories
            .get(job.job_type.as_str())
            .map(|factory| factory(job))
    }
}
