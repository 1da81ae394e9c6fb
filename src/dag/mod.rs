//! Session dependency graph.
//!
//! Pure, stateless analysis over `depends_on` declarations. The scheduler
//! uses it to reject cyclic phases before anything runs; the `graph` command
//! uses it for diagnostics.
//!
//! ## Example
//!
//! ```
//! use cadence::dag::{GraphBuilder, GraphNode};
//!
//! let graph = GraphBuilder::new(vec![
//!     GraphNode::new(1, [], 30),
//!     GraphNode::new(2, [], 45),
//!     GraphNode::new(3, [1, 2], 20),
//! ])
//! .build()
//! .unwrap();
//!
//! assert!(graph.validate().is_ok());
//! // Waves: [1, 2] then [3]
//! assert_eq!(graph.execution_waves().unwrap(), vec![vec![1, 2], vec![3]]);
//! assert_eq!(graph.critical_path().unwrap().sessions, vec![2, 3]);
//! ```

mod analysis;
mod builder;

pub use analysis::{CriticalPath, ParallelGroup};
pub use builder::{DependencyGraph, GraphBuilder, GraphNode, NodeIndex};

/// Everything the `graph` report shows for one phase.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GraphReport {
    pub phase: u32,
    pub name: String,
    pub sessions: usize,
    pub cycles: Vec<Vec<crate::state::SessionId>>,
    pub critical_path: Option<CriticalPath>,
    pub parallel_groups: Vec<ParallelGroup>,
    pub waves: Vec<Vec<crate::state::SessionId>>,
}

impl GraphReport {
    /// Analyse one phase of a plan. Structural errors (missing or duplicate
    /// ids) are returned; cycles are reported in the value.
    pub fn for_phase(
        state: &crate::state::AgentState,
        phase: &crate::state::Phase,
    ) -> Result<Self, crate::errors::GraphError> {
        let known = state.sessions().map(|s| s.id);
        let graph = DependencyGraph::for_phase(phase, known)?;
        let cycles = graph.find_cycles();
        let (critical_path, waves) = if cycles.is_empty() {
            (Some(graph.critical_path()?), graph.execution_waves()?)
        } else {
            (None, Vec::new())
        };
        Ok(Self {
            phase: phase.number,
            name: phase.name.clone(),
            sessions: graph.len(),
            cycles,
            critical_path,
            parallel_groups: graph.parallel_groups(),
            waves,
        })
    }

    pub fn is_valid(&self) -> bool {
        self.cycles.is_empty()
    }
}
