#![allow(dead_code)]
use assert_cmd::Command;
use std::path::Path;
use tempfile::TempDir;

/// Isolated vibekit home for one test, so config and tokens never touch
/// the real user directory.
pub struct TestHome {
    pub dir: TempDir,
}

impl TestHome {
    pub fn new() -> Self {
        TestHome {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Seed the config document, e.g. with per-agent overrides.
    pub fn write_config(&self, json: &str) {
        std::fs::create_dir_all(self.path()).unwrap();
        std::fs::write(self.path().join("config.json"), json).unwrap();
    }

    pub fn vibekit(&self) -> Command {
        let mut cmd = Command::cargo_bin("vibekit").unwrap();
        cmd.env("VIBEKIT_HOME", self.path());
        cmd
    }
}

pub fn vibekit() -> Command {
    Command::cargo_bin("vibekit").unwrap()
}

/// Docker-dependent tests bail out early on machines without a daemon.
pub fn docker_available() -> bool {
    std::process::Command::new("docker")
        .args(["info"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
