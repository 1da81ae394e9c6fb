//! Plan files.
//!
//! A plan is the JSON description of a project's phases and sessions. It is
//! read once by `cadence init` and turned into a fresh [`AgentState`]:
//!
//! ```json
//! {
//!   "project": "shop",
//!   "phases": [
//!     { "number": 1, "name": "Core", "sessions": [
//!       { "id": 1, "title": "Schema", "domain": "backend", "estimated_minutes": 30 },
//!       { "id": 2, "title": "Cart", "domain": "frontend", "depends_on": [1] }
//!     ]}
//!   ]
//! }
//! ```

use crate::dag::DependencyGraph;
use crate::state::{AgentState, Domain, Phase, Session, SessionId};
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSession {
    pub id: SessionId,
    pub title: String,
    #[serde(default)]
    pub domain: Domain,
    #[serde(default)]
    pub depends_on: Vec<SessionId>,
    #[serde(default)]
    pub estimated_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanPhase {
    pub number: u32,
    pub name: String,
    #[serde(default)]
    pub sessions: Vec<PlanSession>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanFile {
    pub project: String,
    pub phases: Vec<PlanPhase>,
}

impl PlanFile {
    /// Load a plan from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse plan JSON: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self).context("Failed to serialize plan")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write plan file: {}", path.display()))?;
        Ok(())
    }

    pub fn session_count(&self) -> usize {
        self.phases.iter().map(|p| p.sessions.len()).sum()
    }

    /// Dependencies that point at a session in a later phase. Such a
    /// session can only run if phases are driven out of order.
    pub fn forward_dependencies(&self) -> Vec<(SessionId, SessionId)> {
        let phase_of: HashMap<SessionId, u32> = self
            .phases
            .iter()
            .flat_map(|p| p.sessions.iter().map(move |s| (s.id, p.number)))
            .collect();
        let mut forward = Vec::new();
        for phase in &self.phases {
            for session in &phase.sessions {
                for dep in &session.depends_on {
                    if phase_of.get(dep).is_some_and(|n| *n > phase.number) {
                        forward.push((session.id, *dep));
                    }
                }
            }
        }
        forward
    }

    /// Build a fresh state, rejecting duplicate ids, unknown dependencies
    /// and cycles anywhere in the plan.
    pub fn into_state(self) -> Result<AgentState> {
        if self.project.trim().is_empty() {
            bail!("Plan has no project name");
        }
        let mut numbers = HashSet::new();
        for phase in &self.phases {
            if !numbers.insert(phase.number) {
                bail!("Duplicate phase number: {}", phase.number);
            }
        }

        let mut phases: Vec<Phase> = self
            .phases
            .into_iter()
            .map(|p| {
                let sessions = p
                    .sessions
                    .into_iter()
                    .map(|s| {
                        Session::new(s.id, &s.title, s.domain)
                            .with_dependencies(s.depends_on)
                            .with_estimate(s.estimated_minutes)
                    })
                    .collect();
                Phase::new(p.number, &p.name, sessions)
            })
            .collect();
        phases.sort_by_key(|p| p.number);

        let all: Vec<Session> = phases.iter().flat_map(|p| p.sessions.clone()).collect();
        let graph = DependencyGraph::from_sessions(&all).context("Invalid plan")?;
        graph.validate().context("Invalid plan")?;

        Ok(AgentState::new(&self.project, phases))
    }
}
