//! Integration tests for the `cadence` binary.
//!
//! Each test builds a throwaway project with a plan and, where sessions are
//! run, a shell executor configured in `.cadence/cadence.toml`.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn cadence() -> Command {
    cargo_bin_cmd!("cadence")
}

const PLAN: &str = r#"{
    "project": "shop",
    "phases": [
        {"number": 1, "name": "Core", "sessions": [
            {"id": 1, "title": "Schema", "domain": "backend", "estimated_minutes": 30},
            {"id": 2, "title": "Styles", "domain": "frontend", "estimated_minutes": 20},
            {"id": 3, "title": "Cart", "domain": "backend", "depends_on": [1, 2], "estimated_minutes": 40}
        ]}
    ]
}"#;

/// Reports passing tests and good coverage for every session; session ids
/// listed in `$FAIL` fail their RED stage.
const EXECUTOR_SCRIPT: &str = r#"
for id in $FAIL; do
  if [ "$id" = "$CADENCE_SESSION_ID" ] && [ "$CADENCE_STAGE" = "red" ]; then
    echo "cannot write tests" >&2
    exit 1
  fi
done
case "$CADENCE_STAGE" in
  red) echo '{"tests_written": 3, "tests_failing": 3, "files": ["tests/t.rs"]}' ;;
  green) echo '{"tests_passing": 3, "coverage": 90}' ;;
  refactor) echo '{"tests_passing": 3, "coverage": 92}' ;;
  commit) echo "commit-$CADENCE_SESSION_ID" ;;
esac
"#;

fn write_plan(dir: &Path, plan: &str) -> std::path::PathBuf {
    let path = dir.join("plan.json");
    fs::write(&path, plan).unwrap();
    path
}

fn init_project(plan: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    let plan_path = write_plan(dir.path(), plan);
    cadence()
        .current_dir(dir.path())
        .args(["init", "--plan"])
        .arg(&plan_path)
        .assert()
        .success();
    dir
}

fn configure_executor(dir: &TempDir, fail_ids: &str) {
    let config = format!(
        "[project]\nname = \"shop\"\n\n[executors.default]\ncommand = \"sh\"\nargs = [\"-c\", '''FAIL=\"{}\"{}''']\ntimeout_secs = 30\n",
        fail_ids, EXECUTOR_SCRIPT
    );
    fs::write(dir.path().join(".cadence/cadence.toml"), config).unwrap();
}

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        cadence().arg("--help").assert().success();
    }

    #[test]
    fn test_version() {
        cadence().arg("--version").assert().success();
    }

    #[test]
    fn test_status_without_init() {
        let dir = TempDir::new().unwrap();
        cadence()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .failure()
            .stderr(predicate::str::contains("cadence init"));
    }

    #[test]
    fn test_project_dir_flag() {
        let dir = init_project(PLAN);
        cadence()
            .arg("--project-dir")
            .arg(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("shop"));
    }
}

mod init {
    use super::*;

    #[test]
    fn test_init_creates_state_and_config() {
        let dir = TempDir::new().unwrap();
        let plan_path = write_plan(dir.path(), PLAN);
        cadence()
            .current_dir(dir.path())
            .args(["init", "--plan"])
            .arg(&plan_path)
            .assert()
            .success()
            .stdout(predicate::str::contains("1 phases and 3 sessions"));

        assert!(dir.path().join(".cadence/plan.json").exists());
        assert!(dir.path().join(".cadence/cadence.toml").exists());
        assert!(dir.path().join(".cadence/state/shop.json").exists());
    }

    #[test]
    fn test_init_refuses_to_overwrite_without_force() {
        let dir = init_project(PLAN);
        let plan_path = dir.path().join("plan.json");
        cadence()
            .current_dir(dir.path())
            .args(["init", "--plan"])
            .arg(&plan_path)
            .assert()
            .failure()
            .stderr(predicate::str::contains("--force"));

        cadence()
            .current_dir(dir.path())
            .args(["init", "--force", "--plan"])
            .arg(&plan_path)
            .assert()
            .success();
    }

    #[test]
    fn test_init_rejects_cyclic_plan() {
        let dir = TempDir::new().unwrap();
        let plan_path = write_plan(
            dir.path(),
            r#"{"project": "loop", "phases": [{"number": 1, "name": "A", "sessions": [
                {"id": 1, "title": "a", "depends_on": [3]},
                {"id": 2, "title": "b", "depends_on": [1]},
                {"id": 3, "title": "c", "depends_on": [2]}
            ]}]}"#,
        );
        cadence()
            .current_dir(dir.path())
            .args(["init", "--plan"])
            .arg(&plan_path)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Cycle detected"));
        assert!(!dir.path().join(".cadence/state/loop.json").exists());
    }

    #[test]
    fn test_init_rejects_unknown_dependency() {
        let dir = TempDir::new().unwrap();
        let plan_path = write_plan(
            dir.path(),
            r#"{"project": "p", "phases": [{"number": 1, "name": "A", "sessions": [
                {"id": 1, "title": "a", "depends_on": [42]}
            ]}]}"#,
        );
        cadence()
            .current_dir(dir.path())
            .args(["init", "--plan"])
            .arg(&plan_path)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown dependency 42"));
    }
}

mod graph {
    use super::*;

    #[test]
    fn test_graph_reports_critical_path_and_waves() {
        let dir = init_project(PLAN);
        cadence()
            .current_dir(dir.path())
            .arg("graph")
            .assert()
            .success()
            .stdout(predicate::str::contains("Critical path: #1 → #3 (70 min)"))
            .stdout(predicate::str::contains("Wave 1: #1, #2"))
            .stdout(predicate::str::contains("Wave 2: #3"));
    }

    #[test]
    fn test_graph_json() {
        let dir = init_project(PLAN);
        let output = cadence()
            .current_dir(dir.path())
            .args(["graph", "--json", "--phase", "1"])
            .output()
            .unwrap();
        assert!(output.status.success());
        let reports: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(reports[0]["critical_path"]["sessions"], serde_json::json!([1, 3]));
        assert_eq!(reports[0]["parallel_groups"][0]["sessions"], serde_json::json!([1, 2]));
    }

    #[test]
    fn test_graph_unknown_phase() {
        let dir = init_project(PLAN);
        cadence()
            .current_dir(dir.path())
            .args(["graph", "--phase", "9"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Phase 9 not found"));
    }
}

#[cfg(unix)]
mod run {
    use super::*;

    #[test]
    fn test_run_without_executor_fails() {
        let dir = init_project(PLAN);
        cadence()
            .current_dir(dir.path())
            .args(["--yes", "run"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("No executors configured"));
    }

    #[test]
    fn test_run_completes_phase() {
        let dir = init_project(PLAN);
        configure_executor(&dir, "");

        cadence()
            .current_dir(dir.path())
            .args(["--yes", "run", "--ui", "minimal"])
            .assert()
            .success()
            .stdout(predicate::str::contains("#3 (commit-3)"))
            .stdout(predicate::str::contains("3/3 completed"));

        cadence()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("3/3 sessions done"))
            .stdout(predicate::str::contains("commit-1"));

        // Nothing left to do on a second run.
        cadence()
            .current_dir(dir.path())
            .args(["--yes", "run", "--ui", "minimal"])
            .assert()
            .success();
    }

    #[test]
    fn test_run_failure_is_isolated() {
        let dir = init_project(PLAN);
        configure_executor(&dir, "1");

        cadence()
            .current_dir(dir.path())
            .args(["--yes", "run", "--ui", "minimal"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("#2 (commit-2)"))
            .stdout(predicate::str::contains("Unreachable: #3"))
            .stderr(predicate::str::contains("1 session(s) failed"));

        let output = cadence()
            .current_dir(dir.path())
            .args(["status", "--json"])
            .output()
            .unwrap();
        let state: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        let sessions = &state["phases"][0]["sessions"];
        assert_eq!(sessions[0]["status"]["state"], "red_phase");
        assert_eq!(sessions[0]["retry_count"], 1);
        assert_eq!(sessions[1]["status"]["state"], "completed");
        assert_eq!(sessions[2]["status"]["state"], "not_started");
    }

    #[test]
    fn test_run_json_ui_emits_events() {
        let dir = init_project(PLAN);
        configure_executor(&dir, "");

        cadence()
            .current_dir(dir.path())
            .args(["--yes", "run", "--ui", "json", "--sequential"])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""type":"phase_started""#))
            .stdout(predicate::str::contains(r#""type":"session_settled""#))
            .stdout(predicate::str::contains(r#""type":"phase_finished""#));
    }

    #[test]
    fn test_stop_on_error() {
        let dir = init_project(PLAN);
        configure_executor(&dir, "1 2");

        cadence()
            .current_dir(dir.path())
            .args(["--yes", "run", "--ui", "minimal", "--stop-on-error"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Stopped after session"));
    }
}

mod decisions {
    use super::*;

    #[test]
    fn test_respond_requires_a_paused_session() {
        let dir = init_project(PLAN);
        cadence()
            .current_dir(dir.path())
            .args(["respond", "1", "proceed"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("not awaiting approval"));
    }

    #[test]
    fn test_respond_rejects_unknown_action() {
        let dir = init_project(PLAN);
        cadence()
            .current_dir(dir.path())
            .args(["respond", "1", "maybe"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid action"));
    }

    #[test]
    fn test_blocker_add_and_resolve() {
        let dir = init_project(PLAN);
        let output = cadence()
            .current_dir(dir.path())
            .args(["blocker", "add", "2", "waiting on design"])
            .output()
            .unwrap();
        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        let id = stdout
            .lines()
            .find_map(|l| l.strip_prefix("Resolve with `cadence blocker resolve "))
            .map(|rest| rest.trim_end_matches('`').to_string())
            .unwrap();

        cadence()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("BLOCKED"))
            .stdout(predicate::str::contains("waiting on design"));

        cadence()
            .current_dir(dir.path())
            .args(["blocker", "resolve", &id])
            .assert()
            .success();

        cadence()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("BLOCKED").not());
    }

    #[test]
    fn test_blocker_resolve_unknown() {
        let dir = init_project(PLAN);
        cadence()
            .current_dir(dir.path())
            .args(["blocker", "resolve", "nope"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Blocker nope not found"));
    }
}

mod configuration {
    use super::*;

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = init_project(PLAN);
        fs::write(
            dir.path().join(".cadence/cadence.toml"),
            "[scheduler]\nmax_concurrent = 0\n\n[coverage]\nserver_threshold = 60.0\nclient_threshold = 70.0\n",
        )
        .unwrap();
        cadence()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("max_concurrent is 0"))
            .stdout(predicate::str::contains("below coverage.client_threshold"));
    }

    #[test]
    fn test_config_show_includes_env_override() {
        let dir = init_project(PLAN);
        cadence()
            .current_dir(dir.path())
            .env("CADENCE_MAX_CONCURRENT", "5")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("max_concurrent = 5"));
    }
}

mod reset {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_reset_with_force_discards_progress() {
        let dir = init_project(PLAN);
        configure_executor(&dir, "");
        cadence()
            .current_dir(dir.path())
            .args(["--yes", "run", "--ui", "minimal"])
            .assert()
            .success();

        cadence()
            .current_dir(dir.path())
            .args(["reset", "--force"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Reset complete"));

        cadence()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("0/3 sessions done"));
    }
}
