//! Analyses over a [`DependencyGraph`]: cycles, critical path, parallel
//! groups and execution waves.

use super::builder::{DependencyGraph, NodeIndex};
use crate::errors::GraphError;
use crate::state::SessionId;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// The longest dependency chain by estimated duration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CriticalPath {
    /// Session ids, root to leaf
    pub sessions: Vec<SessionId>,
    pub total_minutes: u64,
}

/// Sessions sharing an identical dependency set, which may run side by side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParallelGroup {
    pub depends_on: BTreeSet<SessionId>,
    pub sessions: Vec<SessionId>,
    pub sequential_minutes: u64,
    pub parallel_minutes: u64,
    pub time_saved_minutes: u64,
}

impl DependencyGraph {
    /// Every distinct elementary cycle, each in traversal order.
    ///
    /// Johnson's circuit search: for each start node `s` in declaration
    /// order, walk dependency edges inside the strongly connected component
    /// of `s` among nodes declared at or after `s`, and report every path
    /// that returns to `s`. Blocked sets keep the walk from re-exploring dead
    /// ends, so acyclic regions cost linear time. Cycles with the same member
    /// set are reported once.
    pub fn find_cycles(&self) -> Vec<Vec<SessionId>> {
        let mut seen: HashSet<Vec<SessionId>> = HashSet::new();
        let mut cycles = Vec::new();

        for start in 0..self.len() {
            let component = self.component_from(start);
            let mut search = CircuitSearch {
                start,
                component,
                blocked: vec![false; self.len()],
                blocked_by: vec![Vec::new(); self.len()],
                stack: Vec::new(),
            };
            search.circuit(self, start, &mut seen, &mut cycles);
        }
        cycles
    }

    /// Nodes at or after `start` that lie on a cycle through `start`: those
    /// reachable from it and able to reach it, without leaving the range.
    fn component_from(&self, start: NodeIndex) -> Vec<bool> {
        let forward = self.reach(start, |i| self.dependencies(i));
        let backward = self.reach(start, |i| self.dependents(i));
        forward
            .iter()
            .zip(&backward)
            .map(|(f, b)| *f && *b)
            .collect()
    }

    fn reach<'a>(
        &'a self,
        start: NodeIndex,
        next: impl Fn(NodeIndex) -> &'a [NodeIndex],
    ) -> Vec<bool> {
        let mut reached = vec![false; self.len()];
        reached[start] = true;
        let mut frontier = vec![start];
        while let Some(index) = frontier.pop() {
            for &other in next(index) {
                if other >= start && !reached[other] {
                    reached[other] = true;
                    frontier.push(other);
                }
            }
        }
        reached
    }

    /// Reject graphs containing any cycle.
    pub fn validate(&self) -> Result<(), GraphError> {
        let cycles = self.find_cycles();
        if cycles.is_empty() {
            Ok(())
        } else {
            Err(GraphError::CycleDetected { cycles })
        }
    }

    /// Longest chain of estimated minutes, read root to leaf.
    ///
    /// `longest(n) = minutes(n) + max(longest(d))` over the dependents `d`
    /// of `n`, memoized. Roots are the nodes without in-graph dependencies.
    /// Ties go to the node declared first.
    pub fn critical_path(&self) -> Result<CriticalPath, GraphError> {
        self.validate()?;

        let mut memo: Vec<Option<(u64, Option<NodeIndex>)>> = vec![None; self.len()];
        let mut best: Option<(u64, NodeIndex)> = None;
        for root in self.root_nodes() {
            let length = self.longest_from(root, &mut memo);
            if best.is_none_or(|(len, _)| length > len) {
                best = Some((length, root));
            }
        }

        let Some((total_minutes, mut current)) = best else {
            return Ok(CriticalPath::default());
        };
        let mut sessions = Vec::new();
        loop {
            if let Some(node) = self.node(current) {
                sessions.push(node.id);
            }
            match memo[current].and_then(|(_, next)| next) {
                Some(next) => current = next,
                None => break,
            }
        }
        Ok(CriticalPath {
            sessions,
            total_minutes,
        })
    }

    fn longest_from(&self, index: NodeIndex, memo: &mut [Option<(u64, Option<NodeIndex>)>]) -> u64 {
        if let Some((length, _)) = memo[index] {
            return length;
        }
        // Summed in u64: a chain of u32 estimates can exceed u32::MAX.
        let own = self.node(index).map_or(0, |n| u64::from(n.estimated_minutes));
        let mut best: Option<(u64, NodeIndex)> = None;
        for &dependent in self.dependents(index) {
            let length = self.longest_from(dependent, memo);
            if best.is_none_or(|(len, _)| length > len) {
                best = Some((length, dependent));
            }
        }
        let length = own.saturating_add(best.map_or(0, |(len, _)| len));
        memo[index] = Some((length, best.map(|(_, next)| next)));
        length
    }

    /// Sessions grouped by identical dependency sets; only groups of two or more.
    pub fn parallel_groups(&self) -> Vec<ParallelGroup> {
        let mut by_deps: BTreeMap<BTreeSet<SessionId>, Vec<NodeIndex>> = BTreeMap::new();
        for (i, node) in self.nodes().iter().enumerate() {
            by_deps.entry(node.depends_on.clone()).or_default().push(i);
        }

        by_deps
            .into_iter()
            .filter(|(_, members)| members.len() >= 2)
            .map(|(depends_on, members)| {
                let minutes: Vec<u64> = members
                    .iter()
                    .filter_map(|&i| self.node(i).map(|n| u64::from(n.estimated_minutes)))
                    .collect();
                let sequential_minutes: u64 = minutes.iter().sum();
                let parallel_minutes = minutes.iter().copied().max().unwrap_or(0);
                ParallelGroup {
                    depends_on,
                    sessions: members
                        .iter()
                        .filter_map(|&i| self.node(i).map(|n| n.id))
                        .collect(),
                    sequential_minutes,
                    parallel_minutes,
                    time_saved_minutes: sequential_minutes - parallel_minutes,
                }
            })
            .collect()
    }

    /// Layer the graph: wave `k` holds the sessions whose in-graph
    /// dependencies all sit in waves before `k`.
    pub fn execution_waves(&self) -> Result<Vec<Vec<SessionId>>, GraphError> {
        self.validate()?;

        let mut in_degree: Vec<usize> = (0..self.len()).map(|i| self.dependencies(i).len()).collect();
        let mut current: Vec<NodeIndex> = self.root_nodes();
        let mut waves = Vec::new();

        while !current.is_empty() {
            let mut next = Vec::new();
            for &index in &current {
                for &dependent in self.dependents(index) {
                    in_degree[dependent] -= 1;
                    if in_degree[dependent] == 0 {
                        next.push(dependent);
                    }
                }
            }
            next.sort_unstable();
            waves.push(
                current
                    .iter()
                    .filter_map(|&i| self.node(i).map(|n| n.id))
                    .collect(),
            );
            current = next;
        }
        Ok(waves)
    }
}

/// State of one Johnson search rooted at `start`.
struct CircuitSearch {
    start: NodeIndex,
    component: Vec<bool>,
    blocked: Vec<bool>,
    /// `blocked_by[w]`: nodes to unblock once `w` is unblocked
    blocked_by: Vec<Vec<NodeIndex>>,
    stack: Vec<NodeIndex>,
}

impl CircuitSearch {
    fn circuit(
        &mut self,
        graph: &DependencyGraph,
        index: NodeIndex,
        seen: &mut HashSet<Vec<SessionId>>,
        cycles: &mut Vec<Vec<SessionId>>,
    ) -> bool {
        let mut found = false;
        self.stack.push(index);
        self.blocked[index] = true;

        for &dep in graph.dependencies(index) {
            if !self.component[dep] {
                continue;
            }
            if dep == self.start {
                let cycle: Vec<SessionId> = self
                    .stack
                    .iter()
                    .filter_map(|&i| graph.node(i).map(|n| n.id))
                    .collect();
                let mut key = cycle.clone();
                key.sort_unstable();
                if seen.insert(key) {
                    cycles.push(cycle);
                }
                found = true;
            } else if !self.blocked[dep] && self.circuit(graph, dep, seen, cycles) {
                found = true;
            }
        }

        if found {
            self.unblock(index);
        } else {
            for &dep in graph.dependencies(index) {
                if self.component[dep] && !self.blocked_by[dep].contains(&index) {
                    self.blocked_by[dep].push(index);
                }
            }
        }
        self.stack.pop();
        found
    }

    fn unblock(&mut self, index: NodeIndex) {
        self.blocked[index] = false;
        for other in std::mem::take(&mut self.blocked_by[index]) {
            if self.blocked[other] {
                self.unblock(other);
            }
        }
    }
}
