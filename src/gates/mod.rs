//! Who answers a checkpoint.
//!
//! The orchestrator asks a [`DecisionSource`] for an action at every gate.
//! Three sources ship with the crate: [`AutoApprove`] for unattended runs,
//! [`QueuedDecisions`] for scripted answers, and the interactive
//! [`ApprovalGate`].

use crate::checkpoint::{Checkpoint, CheckpointAction, CheckpointType};
use crate::state::SessionId;
use crate::ui::render;
use anyhow::{Context, Result};
use async_trait::async_trait;
use dialoguer::{Select, theme::ColorfulTheme};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

#[async_trait]
pub trait DecisionSource: Send + Sync {
    /// Choose an action for a blocking checkpoint.
    async fn decide(&self, checkpoint: &Checkpoint) -> Result<CheckpointAction>;

    /// Show an advisory checkpoint that does not wait for an answer.
    async fn acknowledge(&self, _checkpoint: &Checkpoint) -> Result<()> {
        Ok(())
    }
}

/// PROCEED at every gate.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoApprove;

#[async_trait]
impl DecisionSource for AutoApprove {
    async fn decide(&self, checkpoint: &Checkpoint) -> Result<CheckpointAction> {
        tracing::debug!(
            session = checkpoint.session_id,
            checkpoint = %checkpoint.kind,
            "Auto-approved"
        );
        Ok(CheckpointAction::Proceed)
    }
}

/// Pre-recorded answers per session, PROCEED once a queue runs dry.
#[derive(Default)]
pub struct QueuedDecisions {
    queues: Mutex<HashMap<SessionId, VecDeque<CheckpointAction>>>,
    seen: Mutex<Vec<(SessionId, CheckpointType)>>,
}

impl QueuedDecisions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next answers for one session, in order.
    pub async fn push(&self, session: SessionId, actions: impl IntoIterator<Item = CheckpointAction>) {
        self.queues
            .lock()
            .await
            .entry(session)
            .or_default()
            .extend(actions);
    }

    /// Every checkpoint presented so far, blocking or advisory.
    pub async fn seen(&self) -> Vec<(SessionId, CheckpointType)> {
        self.seen.lock().await.clone()
    }
}

#[async_trait]
impl DecisionSource for QueuedDecisions {
    async fn decide(&self, checkpoint: &Checkpoint) -> Result<CheckpointAction> {
        self.seen
            .lock()
            .await
            .push((checkpoint.session_id, checkpoint.kind));
        let action = self
            .queues
            .lock()
            .await
            .get_mut(&checkpoint.session_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(CheckpointAction::Proceed);
        Ok(action)
    }

    async fn acknowledge(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.seen
            .lock()
            .await
            .push((checkpoint.session_id, checkpoint.kind));
        Ok(())
    }
}

/// Interactive terminal gate.
pub struct ApprovalGate {
    approve_all: AtomicBool,
    /// One prompt on the terminal at a time
    prompt_lock: Mutex<()>,
}

impl ApprovalGate {
    pub fn new(approve_all: bool) -> Self {
        Self {
            approve_all: AtomicBool::new(approve_all),
            prompt_lock: Mutex::new(()),
        }
    }

    fn prompt(checkpoint: &Checkpoint) -> Result<Option<CheckpointAction>> {
        let mut items: Vec<String> = checkpoint.options.iter().map(|o| o.label.clone()).collect();
        items.push("Proceed, and auto-approve remaining checkpoints (--yes)".to_string());

        let selection = Select::with_theme(&ColorfulTheme::default())
            .with_prompt(format!("{} for session #{}", checkpoint.kind, checkpoint.session_id))
            .items(&items)
            .default(0)
            .interact()
            .context("Checkpoint prompt failed")?;

        Ok(checkpoint.options.get(selection).map(|o| o.action))
    }
}

#[async_trait]
impl DecisionSource for ApprovalGate {
    async fn decide(&self, checkpoint: &Checkpoint) -> Result<CheckpointAction> {
        let _guard = self.prompt_lock.lock().await;
        println!("{}", render::checkpoint_block(&checkpoint.display()));

        if self.approve_all.load(Ordering::SeqCst) {
            println!("  {} (--yes)", console::style("Auto-approved").dim());
            return Ok(CheckpointAction::Proceed);
        }

        let cp = checkpoint.clone();
        let choice = tokio::task::spawn_blocking(move || Self::prompt(&cp))
            .await
            .context("Checkpoint prompt task panicked")??;

        match choice {
            Some(action) => Ok(action),
            None => {
                self.approve_all.store(true, Ordering::SeqCst);
                Ok(CheckpointAction::Proceed)
            }
        }
    }

    async fn acknowledge(&self, checkpoint: &Checkpoint) -> Result<()> {
        let _guard = self.prompt_lock.lock().await;
        println!("{}", render::checkpoint_block(&checkpoint.display()));
        Ok(())
    }
}
