//! Progress events emitted while phases run.

use crate::checkpoint::CheckpointType;
use crate::executor::Stage;
use crate::state::SessionId;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// How a session left the scheduler's hands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettledAs {
    Completed { commit: String },
    Skipped,
    Paused,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    PhaseStarted {
        phase: u32,
        name: String,
        sessions: usize,
    },
    SessionStarted {
        phase: u32,
        session: SessionId,
        title: String,
    },
    StageFinished {
        session: SessionId,
        stage: Stage,
        tests_written: u32,
        tests_passing: u32,
        coverage: Option<f64>,
    },
    CheckpointReached {
        session: SessionId,
        checkpoint: CheckpointType,
    },
    SessionSettled {
        session: SessionId,
        outcome: SettledAs,
    },
    PhaseFinished {
        phase: u32,
        completed: usize,
        failed: usize,
        deadlocked: bool,
    },
}

/// Optional event sink; sending never fails the caller.
#[derive(Debug, Clone, Default)]
pub struct EventSink(Option<mpsc::Sender<SessionEvent>>);

impl EventSink {
    pub fn new(tx: mpsc::Sender<SessionEvent>) -> Self {
        Self(Some(tx))
    }

    pub fn none() -> Self {
        Self(None)
    }

    pub async fn emit(&self, event: SessionEvent) {
        if let Some(ref tx) = self.0 {
            let _ = tx.send(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = SessionEvent::SessionSettled {
            session: 4,
            outcome: SettledAs::Failed {
                error: "boom".into(),
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"session_settled\""));
        assert!(json.contains("\"failed\""));
    }

    #[tokio::test]
    async fn test_sink_delivers_and_none_is_silent() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = EventSink::new(tx);
        sink.emit(SessionEvent::CheckpointReached {
            session: 1,
            checkpoint: CheckpointType::AfterRed,
        })
        .await;
        assert!(matches!(
            rx.recv().await,
            Some(SessionEvent::CheckpointReached { session: 1, .. })
        ));

        EventSink::none()
            .emit(SessionEvent::PhaseStarted {
                phase: 1,
                name: "x".into(),
                sessions: 0,
            })
            .await;
    }
}
