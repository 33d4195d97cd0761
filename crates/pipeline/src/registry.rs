//! Pipeline lookup
//!
//! Persisted pipeline definitions are owned elsewhere; this module only
//! defines the lookup seam and an in-memory store.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use assist_core::{Pipeline, PipelineError};

/// Source of pipeline definitions
pub trait PipelineRegistry: Send + Sync {
    fn get(&self, pipeline_id: &str) -> Option<Arc<Pipeline>>;

    /// Pipeline used when the caller does not name one
    fn preferred(&self) -> Option<Arc<Pipeline>>;
}

/// Resolve the pipeline for a run; `None` selects the preferred pipeline
pub fn resolve_pipeline(
    registry: &dyn PipelineRegistry,
    pipeline_id: Option<&str>,
) -> Result<Arc<Pipeline>, PipelineError> {
    match pipeline_id {
        Some(id) => registry
            .get(id)
            .ok_or_else(|| PipelineError::NotFound(id.to_string())),
        None => registry
            .preferred()
            .ok_or_else(|| PipelineError::NotFound("preferred pipeline".to_string())),
    }
}

#[derive(Default)]
struct StoreInner {
    pipelines: HashMap<String, Arc<Pipeline>>,
    preferred: Option<String>,
}

/// In-memory pipeline store
#[derive(Default)]
pub struct InMemoryPipelineStore {
    inner: RwLock<StoreInner>,
}

impl InMemoryPipelineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a pipeline; the first one added becomes preferred
    pub fn insert(&self, pipeline: Pipeline) -> Arc<Pipeline> {
        let pipeline = Arc::new(pipeline);
        let mut inner = self.inner.write();
        if inner.preferred.is_none() {
            inner.preferred = Some(pipeline.id.clone());
        }
        inner
            .pipelines
            .insert(pipeline.id.clone(), pipeline.clone());
        pipeline
    }

    pub fn with_pipeline(self, pipeline: Pipeline) -> Self {
        self.insert(pipeline);
        self
    }

    /// Remove a pipeline; removing the preferred one clears the preference
    pub fn remove(&self, pipeline_id: &str) -> Option<Arc<Pipeline>> {
        let mut inner = self.inner.write();
        if inner.preferred.as_deref() == Some(pipeline_id) {
            inner.preferred = None;
        }
        inner.pipelines.remove(pipeline_id)
    }

    /// Mark a stored pipeline as preferred; returns false if it is unknown
    pub fn set_preferred(&self, pipeline_id: &str) -> bool {
        let mut inner = self.inner.write();
        if !inner.pipelines.contains_key(pipeline_id) {
            return false;
        }
        inner.preferred = Some(pipeline_id.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.inner.read().pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PipelineRegistry for InMemoryPipelineStore {
    fn get(&self, pipeline_id: &str) -> Option<Arc<Pipeline>> {
        self.inner.read().pipelines.get(pipeline_id).cloned()
    }

    fn preferred(&self) -> Option<Arc<Pipeline>> {
        let inner = self.inner.read();
        inner
            .preferred
            .as_ref()
            .and_then(|id| inner.pipelines.get(id))
            .cloned()
    }
}
