//! Command-line tests for the taskdeck binary.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// A taskdeck command running in an empty directory with no TASKDECK_*
/// variables inherited from the caller.
fn taskdeck(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("taskdeck");
    cmd.current_dir(dir.path());
    for key in [
        "TASKDECK_CONFIG",
        "TASKDECK_HOST",
        "TASKDECK_PORT",
        "TASKDECK_DB_PATH",
        "TASKDECK_STATIC_DIR",
        "TASKDECK_TOKEN_TTL_HOURS",
        "TASKDECK_LOG_LEVEL",
        "TASKDECK_LOG_FORMAT",
        "TASKDECK_PASSWORD",
    ] {
        cmd.env_remove(key);
    }
    cmd
}

mod cli_basics {
    use super::*;

    #[test]
    fn test_help_lists_commands() {
        let dir = TempDir::new().unwrap();
        taskdeck(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("migrate"))
            .stdout(predicate::str::contains("create-user"));
    }

    #[test]
    fn test_version() {
        let dir = TempDir::new().unwrap();
        taskdeck(&dir)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_unknown_command_fails() {
        let dir = TempDir::new().unwrap();
        taskdeck(&dir).arg("frobnicate").assert().failure();
    }
}

mod database {
    use super::*;

    #[test]
    fn test_migrate_creates_database() {
        let dir = TempDir::new().unwrap();
        taskdeck(&dir)
            .args(["migrate", "--db-path", "state/app.db"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Database ready"));
        assert!(dir.path().join("state/app.db").exists());
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let dir = TempDir::new().unwrap();
        for _ in 0..2 {
            taskdeck(&dir)
                .args(["migrate", "--db-path", "app.db"])
                .assert()
                .success();
        }
    }

    #[test]
    fn test_create_user_then_duplicate() {
        let dir = TempDir::new().unwrap();
        let args = [
            "create-user",
            "--db-path",
            "app.db",
            "--email",
            "Ada@Example.com",
            "--name",
            "Ada",
            "--password",
            "password123",
        ];
        taskdeck(&dir)
            .args(args)
            .assert()
            .success()
            .stdout(predicate::str::contains("<ada@example.com>"));
        taskdeck(&dir)
            .args(args)
            .assert()
            .failure()
            .stderr(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_create_user_rejects_short_password() {
        let dir = TempDir::new().unwrap();
        taskdeck(&dir)
            .args([
                "create-user",
                "--db-path",
                "app.db",
                "--email",
                "ada@example.com",
                "--name",
                "Ada",
                "--password",
                "short",
            ])
            .assert()
            .failure()
            .stderr(predicate::str::contains("at least 8"));
    }

    #[test]
    fn test_db_path_comes_from_config_file() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("taskdeck.toml"),
            "[database]\npath = \"from-config.db\"\n",
        )
        .unwrap();
        taskdeck(&dir).arg("migrate").assert().success();
        assert!(dir.path().join("from-config.db").exists());
    }
}

mod config {
    use super::*;

    #[test]
    fn test_config_show_prints_defaults() {
        let dir = TempDir::new().unwrap();
        taskdeck(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[server]"))
            .stdout(predicate::str::contains("port = 8080"))
            .stdout(predicate::str::contains("token_ttl_hours = 168"));
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("taskdeck.toml"), "[server]\nport = 9000\n").unwrap();
        taskdeck(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("port = 9000"));
        taskdeck(&dir)
            .env("TASKDECK_PORT", "9100")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("port = 9100"));
    }

    #[test]
    fn test_validate_reports_warnings() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("custom.toml"),
            "[auth]\nmin_password_length = 4\n",
        )
        .unwrap();
        taskdeck(&dir)
            .args(["config", "validate", "--config", "custom.toml"])
            .assert()
            .success()
            .stdout(predicate::str::contains("min_password_length"));
    }

    #[test]
    fn test_invalid_config_file_fails() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("taskdeck.toml"), "[server]\nport = \"eighty\"\n").unwrap();
        taskdeck(&dir)
            .args(["config", "validate"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to parse"));
    }

    #[test]
    fn test_missing_explicit_config_fails() {
        let dir = TempDir::new().unwrap();
        taskdeck(&dir)
            .args(["config", "show", "--config", "nope.toml"])
            .assert()
            .failure();
    }
}
