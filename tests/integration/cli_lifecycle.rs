//! CLI-level sandbox lifecycle against a live Docker daemon.

use predicates::prelude::*;

use crate::common::{docker_available, TestHome};

fn seeded_home() -> TestHome {
    let home = TestHome::new();
    home.write_config(r#"{"per_agent_overrides": {"claude": "alpine:3.20"}}"#);
    home
}

#[test]
fn create_list_delete_round_trip() {
    if !docker_available() {
        eprintln!("skipping: docker not available");
        return;
    }
    let home = seeded_home();

    home.vibekit()
        .args([
            "local", "create", "--name", "it-lifecycle", "--agent", "claude",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("it-lifecycle"));

    home.vibekit()
        .args(["local", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("it-lifecycle"))
        .stdout(predicate::str::contains("claude"));

    home.vibekit()
        .args(["local", "list", "--agent", "codex"])
        .assert()
        .success()
        .stdout(predicate::str::contains("it-lifecycle").not());

    home.vibekit()
        .args(["local", "list", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"agent\": \"claude\""));

    home.vibekit()
        .args(["local", "delete", "it-lifecycle", "--force"])
        .assert()
        .success()
        .stdout(predicate::str::contains("deleted it-lifecycle"));

    home.vibekit()
        .args(["local", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("it-lifecycle").not());
}

#[test]
fn run_prints_buffered_output_and_propagates_exit_code() {
    if !docker_available() {
        eprintln!("skipping: docker not available");
        return;
    }
    let home = seeded_home();

    home.vibekit()
        .args([
            "local", "run", "--agent", "claude", "--command", "echo from-sandbox",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("from-sandbox"));

    home.vibekit()
        .args(["local", "run", "--agent", "claude", "--command", "exit 7"])
        .assert()
        .code(7);
}

#[test]
fn dangerous_command_is_rejected() {
    if !docker_available() {
        eprintln!("skipping: docker not available");
        return;
    }
    let home = seeded_home();

    home.vibekit()
        .args(["local", "run", "--agent", "claude", "--command", "rm -rf /"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("rejected"));
}
