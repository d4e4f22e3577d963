#![allow(dead_code)]

use std::path::PathBuf;

use assert_cmd::Command;
use tempfile::TempDir;
use wiremock::MockServer;

pub struct TestEnv {
    pub registry: MockServer,
    pub home_dir: TempDir,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self {
            registry: MockServer::start().await,
            home_dir: TempDir::new().unwrap(),
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.home_dir.path().join("node.toml")
    }

    pub fn fcr(&self) -> Command {
        let mut cmd = Command::cargo_bin("fcr").unwrap();
        let path = self.home_dir.path();
        cmd.env("HOME", path);
        cmd.env("XDG_CONFIG_HOME", path.join(".config"));
        cmd.env("APPDATA", path);
        cmd.env("RUST_LOG", "warn");
        cmd
    }

    /// `fcr` with `--config` pointing at a freshly initialised client config.
    pub fn fcr_client(&self) -> Command {
        self.fcr()
            .arg("--config")
            .arg(self.config_path())
            .arg("init")
            .arg("--role")
            .arg("client")
            .arg("--registry-url")
            .arg(self.registry.uri())
            .assert()
            .success();

        let mut cmd = self.fcr();
        cmd.arg("--config").arg(self.config_path());
        cmd
    }
}
