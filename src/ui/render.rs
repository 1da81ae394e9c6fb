//! Plain-string renderers for checkpoints, status and graph reports.
//!
//! Everything here returns a `String` so callers decide where it goes.

use crate::checkpoint::CheckpointDisplay;
use crate::dag::GraphReport;
use crate::scheduler::PhaseRunResult;
use crate::state::{AgentState, Phase, PhaseStatus, Session, SessionStatus, StatusKind};
use crate::ui::icons::{
    BLOCKER, CHECK, CLOCK, COMMIT, CROSS, FILE, GATE, GREEN, PAUSE, PROGRESS, RED, REFACTOR,
    RUNNING, SKIP, WAITING, WAVE,
};
use console::{Emoji, style};
use std::fmt::Write;
use std::time::Duration;

const RULE_WIDTH: usize = 60;

fn rule() -> String {
    style("═".repeat(RULE_WIDTH)).cyan().to_string()
}

/// The block shown when a session reaches a checkpoint.
pub fn checkpoint_block(display: &CheckpointDisplay) -> String {
    let mut out = String::new();
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", rule());
    let _ = writeln!(
        out,
        "{}{}  {}",
        GATE,
        style(&display.title).yellow().bold(),
        style(&display.session).bold()
    );
    let _ = writeln!(out, "{}", rule());
    let _ = writeln!(out, "  {}", display.message);

    if !display.metrics.is_empty() {
        let _ = writeln!(out);
        let width = display.metrics.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
        for (label, value) in &display.metrics {
            let _ = writeln!(out, "  {:<width$}  {}", label, style(value).cyan(), width = width);
        }
    }

    if !display.files.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "  {}", style("Files:").underlined());
        for file in &display.files {
            let _ = writeln!(out, "    {}{}", FILE, file);
        }
        if display.hidden_files > 0 {
            let _ = writeln!(
                out,
                "    {}",
                style(format!("... and {} more", display.hidden_files)).dim()
            );
        }
    }

    if !display.options.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "  {}", style("Options:").underlined());
        for option in &display.options {
            let _ = writeln!(out, "    {}", option);
        }
    }
    out
}

pub fn status_icon(kind: StatusKind) -> Emoji<'static, 'static> {
    match kind {
        StatusKind::NotStarted => WAITING,
        StatusKind::InProgress => RUNNING,
        StatusKind::RedPhase => RED,
        StatusKind::GreenPhase => GREEN,
        StatusKind::RefactorPhase => REFACTOR,
        StatusKind::AwaitingApproval => PAUSE,
        StatusKind::Blocked => BLOCKER,
        StatusKind::Completed => CHECK,
        StatusKind::Skipped => SKIP,
        StatusKind::Error => CROSS,
    }
}

/// One line describing a session.
pub fn session_line(session: &Session) -> String {
    let kind = session.kind();
    let status = match kind {
        StatusKind::Completed => style(kind.to_string()).green(),
        StatusKind::Error => style(kind.to_string()).red(),
        StatusKind::AwaitingApproval | StatusKind::Blocked => style(kind.to_string()).yellow(),
        StatusKind::NotStarted | StatusKind::Skipped => style(kind.to_string()).dim(),
        _ => style(kind.to_string()).cyan(),
    };

    let detail = match &session.status {
        SessionStatus::Completed {
            commit,
            coverage,
            duration_secs,
            ..
        } => format!(
            "{}{} coverage {:.1}%, {}",
            COMMIT,
            commit,
            coverage,
            format_duration(Duration::from_secs(*duration_secs))
        ),
        SessionStatus::AwaitingApproval { checkpoint } => match checkpoint.decision {
            Some(action) => format!("at {} (decision: {})", checkpoint.kind, action),
            None => format!("at {}", checkpoint.kind),
        },
        SessionStatus::Blocked { blocker_id, .. } => format!("blocker {}", blocker_id),
        SessionStatus::Error { reason } => reason.clone(),
        _ if session.metrics.tests_written > 0 => format!(
            "{}/{} tests passing",
            session.metrics.tests_passing, session.metrics.tests_written
        ),
        _ => String::new(),
    };

    let deps = if session.depends_on.is_empty() {
        String::new()
    } else {
        let ids: Vec<String> = session.depends_on.iter().map(|d| format!("#{}", d)).collect();
        format!(" {}", style(format!("after {}", ids.join(", "))).dim())
    };

    let mut line = format!(
        "  {}#{} {} ({}) {}",
        status_icon(kind),
        session.id,
        style(&session.title).bold(),
        session.domain,
        status
    );
    if !detail.is_empty() {
        let _ = write!(line, "  {}", style(detail).dim());
    }
    line.push_str(&deps);
    if session.retry_count > 0 {
        let _ = write!(line, " {}", style(format!("[{} errors]", session.retry_count)).red());
    }
    line
}

fn phase_heading(phase: &Phase) -> String {
    let status = match phase.status() {
        PhaseStatus::Completed => style("completed").green(),
        PhaseStatus::InProgress => style("in progress").cyan(),
        PhaseStatus::NotStarted => style("not started").dim(),
    };
    let done = phase
        .sessions
        .iter()
        .filter(|s| matches!(s.kind(), StatusKind::Completed | StatusKind::Skipped))
        .count();
    format!(
        "Phase {}: {} [{}] {}/{}",
        style(phase.number).yellow().bold(),
        style(&phase.name).bold(),
        status,
        done,
        phase.sessions.len()
    )
}

/// The `status` command's report.
pub fn status_report(state: &AgentState) -> String {
    let mut out = String::new();
    let (done, total) = state.progress();
    let _ = writeln!(
        out,
        "{}{} ({}) {}/{} sessions done",
        PROGRESS,
        style(&state.project).bold(),
        state.status,
        done,
        total
    );
    if let Some(cursor) = state.current {
        match cursor.session {
            Some(session) => {
                let _ = writeln!(out, "  Current: phase {}, session #{}", cursor.phase, session);
            }
            None => {
                let _ = writeln!(out, "  Current: phase {}", cursor.phase);
            }
        }
    }

    for phase in &state.phases {
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", phase_heading(phase));
        for session in &phase.sessions {
            let _ = writeln!(out, "{}", session_line(session));
        }
    }

    let open: Vec<_> = state.open_blockers().collect();
    if !open.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", style("Open blockers:").yellow().bold());
        for blocker in open {
            let _ = writeln!(
                out,
                "  {}{} #{} {}",
                BLOCKER,
                style(&blocker.id).dim(),
                blocker.session_id,
                blocker.description
            );
        }
    }
    out
}

fn id_list(ids: &[u32]) -> String {
    ids.iter()
        .map(|id| format!("#{}", id))
        .collect::<Vec<_>>()
        .join(", ")
}

/// The `graph` command's report for one phase.
pub fn graph_report(report: &GraphReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Phase {}: {} ({} sessions)",
        style(report.phase).yellow().bold(),
        style(&report.name).bold(),
        report.sessions
    );

    if !report.is_valid() {
        for cycle in &report.cycles {
            let _ = writeln!(
                out,
                "  {}{} {}",
                CROSS,
                style("Cycle:").red().bold(),
                id_list(cycle)
            );
        }
        return out;
    }

    if let Some(path) = &report.critical_path
        && !path.sessions.is_empty()
    {
        let chain: Vec<String> = path.sessions.iter().map(|id| format!("#{}", id)).collect();
        let _ = writeln!(
            out,
            "  {}Critical path: {} ({} min)",
            CLOCK,
            chain.join(" → "),
            path.total_minutes
        );
    }

    for (i, wave) in report.waves.iter().enumerate() {
        let parallel = if wave.len() > 1 {
            style(" (parallel)").green().to_string()
        } else {
            String::new()
        };
        let _ = writeln!(out, "  {}Wave {}: {}{}", WAVE, i + 1, id_list(wave), parallel);
    }

    if !report.parallel_groups.is_empty() {
        let _ = writeln!(out, "  {}", style("Parallel groups:").underlined());
        for group in &report.parallel_groups {
            let after = if group.depends_on.is_empty() {
                "no dependencies".to_string()
            } else {
                let deps: Vec<u32> = group.depends_on.iter().copied().collect();
                format!("after {}", id_list(&deps))
            };
            let _ = writeln!(
                out,
                "    {}: {}  saves {} min ({} → {})",
                after,
                id_list(&group.sessions),
                group.time_saved_minutes,
                group.sequential_minutes,
                group.parallel_minutes
            );
        }
    }
    out
}

/// Summary printed after a phase run.
pub fn run_summary(result: &PhaseRunResult) -> String {
    let mut out = String::new();
    let headline = if result.is_complete() {
        format!("{}Phase {} {}", CHECK, result.phase, style("complete").green().bold())
    } else if !result.failed.is_empty() || result.deadlocked {
        format!("{}Phase {} {}", CROSS, result.phase, style("stopped").red().bold())
    } else {
        format!("{}Phase {} {}", PAUSE, result.phase, style("paused").yellow().bold())
    };
    let _ = writeln!(out, "{}", headline);
    let _ = writeln!(
        out,
        "  {}/{} completed in {}",
        result.completed.len(),
        result.total_sessions,
        format_duration(result.duration)
    );

    let lists: [(&str, &[u32]); 5] = [
        ("Skipped", &result.skipped),
        ("Paused", &result.paused),
        ("Blocked", &result.blocked),
        ("Waiting", &result.waiting),
        ("Unreachable", &result.unreachable),
    ];
    for (label, ids) in lists {
        if !ids.is_empty() {
            let _ = writeln!(out, "  {}: {}", label, id_list(ids));
        }
    }
    for failure in &result.failed {
        let _ = writeln!(
            out,
            "  {}#{} {}",
            CROSS,
            failure.session,
            style(&failure.error).red()
        );
    }
    if result.deadlocked {
        let _ = writeln!(
            out,
            "  {}",
            style("Some sessions can never start: a dependency failed or was skipped").red()
        );
    }
    out
}

/// Format a duration for display.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs > 0 {
        format!("{}s", secs)
    } else {
        format!("{}ms", d.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::Checkpoint;
    use crate::state::{Domain, Phase};
    use chrono::Utc;
    use console::strip_ansi_codes;

    fn plain(s: String) -> String {
        strip_ansi_codes(&s).to_string()
    }

    #[test]
    fn test_checkpoint_block_lists_options_and_caps_files() {
        let mut session = Session::new(3, "Cart page", Domain::Frontend);
        session.metrics.tests_written = 4;
        session.modified_files = (0..12).map(|i| format!("src/file_{}.rs", i)).collect();
        let block = plain(checkpoint_block(&Checkpoint::after_red(&session).display()));

        assert!(block.contains("AFTER_RED"));
        assert!(block.contains("#3 Cart page"));
        assert!(block.contains("1. Proceed to GREEN"));
        assert!(block.contains("5. Pause here"));
        assert!(block.contains("src/file_9.rs"));
        assert!(!block.contains("src/file_10.rs"));
        assert!(block.contains("and 2 more"));
    }

    #[test]
    fn test_status_report_shows_sessions_and_blockers() {
        let mut state = AgentState::new(
            "shop",
            vec![Phase::new(
                1,
                "Core",
                vec![
                    Session::new(1, "Schema", Domain::Backend),
                    Session::new(2, "Cart", Domain::Frontend).with_dependencies([1]),
                ],
            )],
        );
        state.add_blocker(2, "waiting on API keys", Utc::now()).unwrap();
        let report = plain(status_report(&state));

        assert!(report.contains("shop"));
        assert!(report.contains("0/2 sessions done"));
        assert!(report.contains("#1 Schema (backend) NOT_STARTED"));
        assert!(report.contains("BLOCKED"));
        assert!(report.contains("after #1"));
        assert!(report.contains("waiting on API keys"));
    }

    #[test]
    fn test_graph_report_for_cycle_lists_members() {
        let report = GraphReport {
            phase: 1,
            name: "Loop".into(),
            sessions: 3,
            cycles: vec![vec![1, 2, 3]],
            critical_path: None,
            parallel_groups: vec![],
            waves: vec![],
        };
        let text = plain(graph_report(&report));
        assert!(text.contains("Cycle:"));
        assert!(text.contains("#1, #2, #3"));
    }

    #[test]
    fn test_run_summary_mentions_deadlock() {
        let mut result = PhaseRunResult::new(2, 3);
        result.completed = vec![1];
        result.record_failure(2, "boom", 1);
        result.unreachable = vec![3];
        result.deadlocked = true;
        let text = plain(run_summary(&result));
        assert!(text.contains("stopped"));
        assert!(text.contains("Unreachable: #3"));
        assert!(text.contains("boom"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::from_secs(45)), "45s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }
}
