//! Best-effort side-effect chains.
//!
//! Cross-service sequences like "add member → invalidate cache → send
//! notification" have no distributed transaction behind them. Each step is
//! attempted in order and individually caught: one failure never aborts the
//! later steps and never fails the primary request. Every attempt is logged
//! with the entity and step name so a partial run can be replayed by hand.

use std::future::Future;
use std::pin::Pin;

use tracing::{debug, warn};

use crate::Result;

type Step = (
    &'static str,
    Pin<Box<dyn Future<Output = Result<()>> + Send>>,
);

/// An ordered list of named best-effort attempts tied to one entity.
pub struct SideEffects {
    entity: String,
    steps: Vec<Step>,
}

impl SideEffects {
    /// Start a chain correlated to `entity` (e.g. `team:T1`).
    #[must_use]
    pub fn for_entity(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            steps: Vec::new(),
        }
    }

    /// Append a named step.
    #[must_use]
    pub fn then<F>(mut self, name: &'static str, fut: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.steps.push((name, Box::pin(fut)));
        self
    }

    /// Run every step in order. Returns the number of steps that failed.
    pub async fn run(self) -> usize {
        let mut failed = 0;
        for (name, fut) in self.steps {
            match fut.await {
                Ok(()) => debug!(entity = %self.entity, step = name, "Side effect applied"),
                Err(e) => {
                    failed += 1;
                    warn!(entity = %self.entity, step = name, error = %e, "Side effect failed, continuing");
                }
            }
        }
        failed
    }
}
