//! Live progress for `cadence run`.
//!
//! Consumes [`SessionEvent`]s from the scheduler. Output modes:
//! - `full`: progress bar per in-flight session plus a phase header bar
//! - `minimal`: one line per settled session
//! - `json`: one JSON event per line, for machine consumption

use crate::events::{SessionEvent, SettledAs};
use crate::executor::Stage;
use crate::state::SessionId;
use crate::ui::icons::{CHECK, CROSS, GATE, PAUSE, RUNNING, SKIP, SPARKLE, WAVE};
use crate::ui::render::format_duration;
use console::{Term, style};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Output mode for the run UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UiMode {
    /// Progress bars and colors
    #[default]
    Full,
    /// Single-line status updates
    Minimal,
    /// JSON-formatted events
    Json,
}

impl std::str::FromStr for UiMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "minimal" => Self::Minimal,
            _ => Self::Full,
        })
    }
}

impl UiMode {
    pub fn parse(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

/// Stages a session goes through, for bar positions.
const STAGES: u64 = 4;

fn stage_position(stage: Stage) -> u64 {
    match stage {
        Stage::Red => 1,
        Stage::Green => 2,
        Stage::Refactor => 3,
        Stage::Commit => 4,
    }
}

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓░")
}

pub struct RunUI {
    mode: UiMode,
    multi: MultiProgress,
    /// Settled sessions of the current phase
    header_bar: ProgressBar,
    session_bars: Mutex<HashMap<SessionId, ProgressBar>>,
    phase_started: Mutex<Option<Instant>>,
    verbose: bool,
    term: Term,
}

impl RunUI {
    pub fn new(mode: UiMode, verbose: bool) -> Self {
        let multi = if mode == UiMode::Full {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };
        let header_bar = multi.add(ProgressBar::new(0));
        header_bar.set_style(bar_style("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}"));
        header_bar.set_prefix("Phase");

        Self {
            mode,
            multi,
            header_bar,
            session_bars: Mutex::new(HashMap::new()),
            phase_started: Mutex::new(None),
            verbose,
            term: Term::stdout(),
        }
    }

    pub fn mode(&self) -> UiMode {
        self.mode
    }

    pub fn handle_event(&self, event: &SessionEvent) {
        match self.mode {
            UiMode::Json => self.handle_json(event),
            UiMode::Minimal => self.handle_minimal(event),
            UiMode::Full => self.handle_full(event),
        }
    }

    /// Tear down any bars still drawn.
    pub fn finish(&self) {
        if let Ok(mut bars) = self.session_bars.lock() {
            for (_, bar) in bars.drain() {
                bar.finish_and_clear();
            }
        }
        self.header_bar.finish_and_clear();
    }

    fn handle_json(&self, event: &SessionEvent) {
        if let Ok(json) = serde_json::to_string(event) {
            let _ = writeln!(&self.term, "{}", json);
        }
    }

    fn handle_minimal(&self, event: &SessionEvent) {
        let line = match event {
            SessionEvent::PhaseStarted {
                phase,
                name,
                sessions,
            } => format!("Phase {}: {} ({} sessions)", phase, name, sessions),
            SessionEvent::SessionStarted { session, title, .. } if self.verbose => {
                format!("> #{} {}", session, title)
            }
            SessionEvent::SessionSettled { session, outcome } => match outcome {
                SettledAs::Completed { commit } => format!("✓ #{} ({})", session, commit),
                SettledAs::Skipped => format!("- #{} skipped", session),
                SettledAs::Paused => format!("|| #{} paused", session),
                SettledAs::Failed { error } => format!("✗ #{} ({})", session, error),
            },
            SessionEvent::PhaseFinished {
                phase,
                completed,
                failed,
                deadlocked,
            } => format!(
                "Done: phase {} {} completed, {} failed{}",
                phase,
                completed,
                failed,
                if *deadlocked { ", deadlocked" } else { "" }
            ),
            _ => return,
        };
        let _ = writeln!(&self.term, "{}", line);
    }

    fn handle_full(&self, event: &SessionEvent) {
        match event {
            SessionEvent::PhaseStarted {
                phase,
                name,
                sessions,
            } => self.on_phase_started(*phase, name, *sessions),
            SessionEvent::SessionStarted { session, title, .. } => {
                self.on_session_started(*session, title)
            }
            SessionEvent::StageFinished {
                session,
                stage,
                tests_written,
                tests_passing,
                coverage,
            } => self.on_stage_finished(*session, *stage, *tests_written, *tests_passing, *coverage),
            SessionEvent::CheckpointReached {
                session,
                checkpoint,
            } => {
                self.with_bar(*session, |bar| {
                    bar.set_message(format!("{}{}", GATE, checkpoint));
                });
            }
            SessionEvent::SessionSettled { session, outcome } => {
                self.on_session_settled(*session, outcome)
            }
            SessionEvent::PhaseFinished {
                phase,
                completed,
                failed,
                deadlocked,
            } => self.on_phase_finished(*phase, *completed, *failed, *deadlocked),
        }
    }

    fn with_bar(&self, session: SessionId, f: impl FnOnce(&ProgressBar)) {
        if let Ok(bars) = self.session_bars.lock()
            && let Some(bar) = bars.get(&session)
        {
            f(bar);
        }
    }

    fn on_phase_started(&self, phase: u32, name: &str, sessions: usize) {
        if let Ok(mut started) = self.phase_started.lock() {
            *started = Some(Instant::now());
        }
        self.multi.println("").ok();
        self.multi
            .println(format!(
                "{}{} Phase {}: {}",
                WAVE,
                style("═".repeat(40)).cyan(),
                style(phase).yellow().bold(),
                style(name).bold()
            ))
            .ok();
        self.header_bar.reset();
        self.header_bar.set_length(sessions as u64);
        self.header_bar.set_prefix(format!("Phase {}", phase));
        self.header_bar.set_message(format!("{} sessions", sessions));
    }

    fn on_session_started(&self, session: SessionId, title: &str) {
        let bar = self.multi.add(ProgressBar::new(STAGES));
        bar.set_style(bar_style("  {prefix:.bold} [{bar:20.green/white}] {msg}"));
        bar.set_prefix(format!("#{}", session));
        bar.set_message(format!("{}{}", RUNNING, title));
        bar.enable_steady_tick(Duration::from_millis(100));
        if let Ok(mut bars) = self.session_bars.lock() {
            // A resumed session may already have a bar from a previous pause.
            if let Some(old) = bars.insert(session, bar) {
                old.finish_and_clear();
            }
        }

        if self.verbose {
            self.multi
                .println(format!("  {} #{} {}", style("▶").cyan(), session, title))
                .ok();
        }
    }

    fn on_stage_finished(
        &self,
        session: SessionId,
        stage: Stage,
        tests_written: u32,
        tests_passing: u32,
        coverage: Option<f64>,
    ) {
        self.with_bar(session, |bar| {
            bar.set_position(stage_position(stage));
            let coverage = coverage
                .map(|c| format!(", {:.1}%", c))
                .unwrap_or_default();
            bar.set_message(format!(
                "{} {}/{} passing{}",
                style(stage.as_str().to_uppercase()).cyan(),
                tests_passing,
                tests_written,
                coverage
            ));
        });
    }

    fn on_session_settled(&self, session: SessionId, outcome: &SettledAs) {
        let bar = self
            .session_bars
            .lock()
            .ok()
            .and_then(|mut bars| bars.remove(&session));

        let message = match outcome {
            SettledAs::Completed { commit } => {
                format!("{}{} {}", CHECK, style("complete").green(), style(commit).dim())
            }
            SettledAs::Skipped => format!("{}{}", SKIP, style("skipped").dim()),
            SettledAs::Paused => format!("{}{}", PAUSE, style("paused").yellow()),
            SettledAs::Failed { error } => format!("{}{}", CROSS, style(error).red()),
        };
        match bar {
            Some(bar) => {
                if matches!(outcome, SettledAs::Completed { .. }) {
                    bar.set_position(STAGES);
                }
                bar.finish_with_message(message);
            }
            None => {
                self.multi
                    .println(format!("  #{} {}", session, message))
                    .ok();
            }
        }
        self.header_bar.inc(1);
    }

    fn on_phase_finished(&self, phase: u32, completed: usize, failed: usize, deadlocked: bool) {
        self.header_bar.finish_and_clear();
        let elapsed = self
            .phase_started
            .lock()
            .ok()
            .and_then(|started| started.map(|t| t.elapsed()))
            .unwrap_or_default();

        let headline = if failed == 0 && !deadlocked {
            format!(
                "{}Phase {} settled: {} completed",
                SPARKLE,
                style(phase).yellow().bold(),
                style(completed).green().bold()
            )
        } else {
            format!(
                "{}Phase {} settled: {} completed, {} failed{}",
                CROSS,
                style(phase).yellow().bold(),
                style(completed).green(),
                style(failed).red().bold(),
                if deadlocked {
                    style(", deadlocked").red().to_string()
                } else {
                    String::new()
                }
            )
        };
        self.multi
            .println(format!("{} ({})", headline, format_duration(elapsed)))
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointType;

    #[test]
    fn test_ui_mode_parse() {
        assert_eq!(UiMode::parse("json"), UiMode::Json);
        assert_eq!(UiMode::parse("MINIMAL"), UiMode::Minimal);
        assert_eq!(UiMode::parse("full"), UiMode::Full);
        assert_eq!(UiMode::parse("anything_else"), UiMode::Full);
    }

    #[test]
    fn test_stage_positions_are_ordered() {
        assert!(stage_position(Stage::Red) < stage_position(Stage::Green));
        assert!(stage_position(Stage::Refactor) < stage_position(Stage::Commit));
        assert_eq!(stage_position(Stage::Commit), STAGES);
    }

    #[test]
    fn test_full_mode_tracks_session_bars() {
        let ui = RunUI::new(UiMode::Full, false);
        ui.handle_event(&SessionEvent::PhaseStarted {
            phase: 1,
            name: "Core".into(),
            sessions: 2,
        });
        ui.handle_event(&SessionEvent::SessionStarted {
            phase: 1,
            session: 7,
            title: "Schema".into(),
        });
        ui.handle_event(&SessionEvent::CheckpointReached {
            session: 7,
            checkpoint: CheckpointType::BeforeStart,
        });
        ui.handle_event(&SessionEvent::StageFinished {
            session: 7,
            stage: Stage::Green,
            tests_written: 4,
            tests_passing: 4,
            coverage: Some(90.0),
        });
        assert_eq!(ui.session_bars.lock().unwrap().get(&7).unwrap().position(), 2);

        ui.handle_event(&SessionEvent::SessionSettled {
            session: 7,
            outcome: SettledAs::Completed {
                commit: "abc".into(),
            },
        });
        assert!(ui.session_bars.lock().unwrap().is_empty());
        assert_eq!(ui.header_bar.position(), 1);
        ui.finish();
    }

    #[test]
    fn test_quiet_modes_do_not_create_bars() {
        let ui = RunUI::new(UiMode::Json, false);
        ui.handle_event(&SessionEvent::SessionStarted {
            phase: 1,
            session: 1,
            title: "x".into(),
        });
        assert!(ui.session_bars.lock().unwrap().is_empty());
        assert_eq!(ui.mode(), UiMode::Json);
    }
}
