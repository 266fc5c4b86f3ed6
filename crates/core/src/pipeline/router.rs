use crate::error::{PipelineError, PipelineResult};
use crate::types::{RouteEntry, RouteSource, StepId};
use std::collections::BTreeMap;

/// Outcome of routing after a step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routing {
    pub next: Option<StepId>,
    pub source: RouteSource,
}

/// Chooses the next step: a runtime override wins over the static table
#[derive(Debug, Clone)]
pub struct Router {
    table: BTreeMap<StepId, RouteEntry>,
}

impl Router {
    pub fn new(table: BTreeMap<StepId, RouteEntry>) -> Self {
        Self { table }
    }

    pub fn has_route(&self, step: &StepId) -> bool {
        self.table.contains_key(step)
    }

    /// Decide where control goes after `current`. `override_id` is the
    /// step's `_next_step_id` output, if it produced a non-empty one.
    pub fn decide(&self, current: &StepId, override_id: Option<&str>) -> PipelineResult<Routing> {
        if let Some(target) = override_id.filter(|id| !id.is_empty()) {
            return Ok(Routing {
                next: Some(StepId::new(target)),
                source: RouteSource::Override,
            });
        }

        let entry = self
            .table
            .get(current)
            .ok_or_else(|| PipelineError::MissingRoute {
                step: current.clone(),
            })?;

        Ok(Routing {
            next: entry.next.clone().filter(|id| !id.as_str().is_empty()),
            source: RouteSource::Static,
        })
    }
}
