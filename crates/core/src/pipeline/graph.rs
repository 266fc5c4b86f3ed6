use crate::error::{PipelineError, PipelineResult};
use crate::types::StepId;
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use std::collections::{BTreeSet, HashMap};

/// Graph of possible control transfers between steps
pub struct RoutingGraph {
    /// Static routing table edges only
    static_graph: DiGraph<StepId, ()>,
    /// Static edges plus every override target a tool may emit
    full_graph: DiGraph<StepId, ()>,
    step_indices: HashMap<StepId, NodeIndex>,
}

impl RoutingGraph {
    pub fn new<'a>(steps: impl IntoIterator<Item = &'a StepId>) -> Self {
        let mut static_graph = DiGraph::new();
        let mut full_graph = DiGraph::new();
        let mut step_indices = HashMap::new();

        // Both graphs get the same nodes in the same order, so indices match
        for step in steps {
            let node = static_graph.add_node(step.clone());
            full_graph.add_node(step.clone());
            step_indices.insert(step.clone(), node);
        }

        Self {
            static_graph,
            full_graph,
            step_indices,
        }
    }

    fn index(&self, from: &StepId, step: &StepId) -> PipelineResult<NodeIndex> {
        self.step_indices.get(step).copied().ok_or_else(|| {
            PipelineError::config(
                Some(from),
                format!("routes to undefined step '{}'", step),
            )
        })
    }

    /// Add a routing table edge
    pub fn add_static_edge(&mut self, from: &StepId, to: &StepId) -> PipelineResult<()> {
        let (a, b) = (self.index(from, from)?, self.index(from, to)?);
        self.static_graph.add_edge(a, b, ());
        self.full_graph.add_edge(a, b, ());
        Ok(())
    }

    /// Add an edge a step can only take through the override signal
    pub fn add_override_edge(&mut self, from: &StepId, to: &StepId) -> PipelineResult<()> {
        let (a, b) = (self.index(from, from)?, self.index(from, to)?);
        self.full_graph.add_edge(a, b, ());
        Ok(())
    }

    /// Steps reachable from `start` by any route
    pub fn reachable_from(&self, start: &StepId) -> PipelineResult<BTreeSet<StepId>> {
        let start = self.index(start, start)?;
        let mut dfs = Dfs::new(&self.full_graph, start);
        let mut reached = BTreeSet::new();

        while let Some(node) = dfs.next(&self.full_graph) {
            reached.insert(self.full_graph[node].clone());
        }

        Ok(reached)
    }

    /// Whether the static table alone leads from `from` to `to`
    pub fn static_path_exists(&self, from: &StepId, to: &StepId) -> PipelineResult<bool> {
        let (a, b) = (self.index(from, from)?, self.index(from, to)?);
        Ok(has_path_connecting(&self.static_graph, a, b, None))
    }
}
