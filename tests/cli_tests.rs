//! Integration tests for the `tapeout` binary.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn tapeout() -> Command {
    cargo_bin_cmd!("tapeout")
}

/// A pipeline document with one real (shell-backed) synthesis step.
const BASIC_DOC: &str = r#"
DESIGN_NAME = "cpu"
CLOCK_PERIOD = 10.0

[meta]
version = 2
flow = ["Mock.Synthesis"]

[[steps]]
id = "Mock.Synthesis"
command = ["sh", "-c", "printf 'module cpu; endmodule' > \"$STEP_DIR/$DESIGN_NAME.nl.v\"; echo '%METRIC synthesis__cells 42'"]
outputs = ["netlist"]

[[steps.consumes]]
name = "CLOCK_PERIOD"
kind = "float"
"#;

fn project(doc: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("config.toml"), doc).unwrap();
    dir
}

#[test]
fn test_help() {
    tapeout().arg("--help").assert().success();
}

#[test]
fn test_version() {
    tapeout().arg("--version").assert().success();
}

#[test]
fn test_check_prints_pipeline_and_configuration() {
    let dir = project(BASIC_DOC);
    tapeout()
        .current_dir(dir.path())
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("Mock.Synthesis"))
        .stdout(predicate::str::contains("CLOCK_PERIOD = 10"))
        .stdout(predicate::str::contains("DESIGN_NAME = cpu"));
}

#[test]
fn test_set_override_wins_over_document() {
    let dir = project(BASIC_DOC);
    tapeout()
        .current_dir(dir.path())
        .args(["check", "--set", "CLOCK_PERIOD=5.5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("CLOCK_PERIOD = 5.5"));
}

#[test]
fn test_run_produces_run_directory_and_final_state() {
    let dir = project(BASIC_DOC);
    tapeout()
        .current_dir(dir.path())
        .args(["run", "--tag", "t1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("completed"));

    let run_dir = dir.path().join("runs/t1");
    assert!(run_dir.join("resolved.json").exists());
    assert!(run_dir.join("01-mock-synthesis/cpu.nl.v").exists());
    let state = fs::read_to_string(run_dir.join("state.json")).unwrap();
    assert!(state.contains("netlist"));
    assert!(state.contains("synthesis__cells"));
}

#[test]
fn test_run_failing_step_exits_nonzero() {
    let doc = r#"
DESIGN_NAME = "cpu"

[meta]
version = 2
flow = ["Mock.Broken"]

[[steps]]
id = "Mock.Broken"
command = ["sh", "-c", "echo 'tool died' >&2; exit 1"]
"#;
    let dir = project(doc);
    tapeout()
        .current_dir(dir.path())
        .args(["run", "--tag", "t1"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("aborted"));
}

#[test]
fn test_run_deferred_failure_exits_with_code_two() {
    let doc = r#"
DESIGN_NAME = "cpu"

[meta]
version = 2
flow = ["Mock.SoftCheck"]

[[steps]]
id = "Mock.SoftCheck"
command = ["sh", "-c", "exit 2"]
deferred_exit_codes = [2]
"#;
    let dir = project(doc);
    tapeout()
        .current_dir(dir.path())
        .args(["run", "--tag", "t1"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("deferred"));

    // The flow still produced a final state.
    assert!(dir.path().join("runs/t1/state.json").exists());
}

#[test]
fn test_substitution_removes_step_from_pipeline() {
    let doc = r#"
DESIGN_NAME = "cpu"

[meta]
version = 2
flow = ["Mock.A", "Mock.B"]

[meta.substituting_steps]
"Mock.A" = ""

[[steps]]
id = "Mock.A"
command = ["true"]

[[steps]]
id = "Mock.B"
command = ["true"]
"#;
    let dir = project(doc);
    tapeout()
        .current_dir(dir.path())
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("Mock.B"))
        .stdout(predicate::str::contains("Mock.A").not());
}

#[test]
fn test_unknown_step_id_fails_before_running() {
    let doc = r#"
DESIGN_NAME = "cpu"

[meta]
version = 2
flow = ["Mock.Missing"]
"#;
    let dir = project(doc);
    tapeout()
        .current_dir(dir.path())
        .args(["run", "--tag", "t1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Mock.Missing"));

    // Nothing ran, so no run directory appeared.
    assert!(!dir.path().join("runs/t1").exists());
}

#[test]
fn test_unsupported_schema_version_is_rejected() {
    let doc = r#"
DESIGN_NAME = "cpu"

[meta]
version = 1
flow = ["Mock.A"]

[[steps]]
id = "Mock.A"
command = ["true"]
"#;
    let dir = project(doc);
    tapeout()
        .current_dir(dir.path())
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("version"));
}

#[test]
fn test_steps_command_lists_registered_steps() {
    let dir = project(BASIC_DOC);
    tapeout()
        .current_dir(dir.path())
        .arg("steps")
        .assert()
        .success()
        .stdout(predicate::str::contains("Mock.Synthesis"))
        .stdout(predicate::str::contains("netlist"));
}

#[test]
fn test_gated_flow_skips_disabled_step() {
    let doc = r#"
DESIGN_NAME = "cpu"
RUN_B = false

[meta]
version = 2
flow = "classic"

[[flows]]
name = "classic"
steps = ["Mock.A", "Mock.B"]

[flows.gates]
"Mock.B" = ["RUN_B"]

[[flows.variables]]
name = "RUN_B"
kind = "bool"
default = true

[[steps]]
id = "Mock.A"
command = ["true"]

[[steps]]
id = "Mock.B"
command = ["true"]
"#;
    let dir = project(doc);
    tapeout()
        .current_dir(dir.path())
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("Mock.A"))
        .stdout(predicate::str::contains("Mock.B").not());
}
