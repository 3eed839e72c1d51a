//! Destination for finalized runs.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::run::{Run, RunId};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("run record rejected: {0}")]
    Rejected(String),
    #[error("run sink unavailable: {0}")]
    Unavailable(String),
}

/// Receives each finalized run exactly once.
#[async_trait]
pub trait RunSink: Send + Sync {
    async fn record(&self, run: &Run) -> Result<(), SinkError>;
}

#[derive(Debug, Default)]
pub struct InMemoryRunSink {
    runs: RwLock<Vec<Run>>,
}

impl InMemoryRunSink {
    pub async fn runs(&self) -> Vec<Run> {
        self.runs.read().await.clone()
    }

    pub async fn find(&self, run_id: &RunId) -> Option<Run> {
        self.runs.read().await.iter().find(|run| &run.id == run_id).cloned()
    }
}

#[async_trait]
impl RunSink for InMemoryRunSink {
    async fn record(&self, run: &Run) -> Result<(), SinkError> {
        run.check_invariants().map_err(|error| SinkError::Rejected(error.to_string()))?;

        let mut runs = self.runs.write().await;
        if runs.iter().any(|existing| existing.id == run.id) {
            return Err(SinkError::Rejected(format!("run {} was already recorded", run.id)));
        }
        runs.push(run.clone());
        Ok(())
    }
}
