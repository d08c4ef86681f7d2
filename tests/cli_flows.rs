//! CLI-level flows through the `pass` binary: headless prompts via the
//! `PASS_CLI_*` test environment, exit-code contract, stdout hygiene.

use assert_cmd::Command;
use predicates::prelude::*;
use serial_test::serial;
use tempfile::TempDir;

const PASSWORD: &str = "CorrectHorseBattery!";

fn pass(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("pass").unwrap();
    cmd.env_clear()
        .env("PATH", std::env::var_os("PATH").unwrap_or_default())
        .env("PASS_CLI_TEST", "1")
        .env("PASS_CLI_VAULT", dir.path().join("vault.enc"))
        .env("PASS_CLI_PASSWORD", PASSWORD);
    cmd
}

fn init_vault(dir: &TempDir) {
    pass(dir)
        .args(["init", "--no-audit"])
        .assert()
        .success()
        .stdout(predicate::str::contains("vault created"));
}

fn add_github(dir: &TempDir) {
    pass(dir)
        .env("PASS_CLI_SECRET", "s3cret-value")
        .args(["add", "github", "--username", "octocat"])
        .assert()
        .success();
}

#[test]
#[serial]
fn init_add_get_quiet_round_trip() {
    let dir = TempDir::new().unwrap();
    init_vault(&dir);
    add_github(&dir);

    pass(&dir)
        .args(["get", "github", "--quiet", "--no-usage"])
        .assert()
        .success()
        .stdout("s3cret-value\n");

    pass(&dir)
        .args(["get", "github", "--field", "username", "--quiet"])
        .assert()
        .success()
        .stdout("octocat\n");
}

#[test]
#[serial]
fn get_without_quiet_never_prints_the_secret() {
    let dir = TempDir::new().unwrap();
    init_vault(&dir);
    add_github(&dir);

    pass(&dir)
        .args(["get", "github", "--no-clipboard"])
        .assert()
        .success()
        .stdout(predicate::str::contains("s3cret-value").not())
        .stdout(predicate::str::contains("octocat"));
}

#[test]
#[serial]
fn wrong_password_exits_with_the_security_code() {
    let dir = TempDir::new().unwrap();
    init_vault(&dir);
    add_github(&dir);

    pass(&dir)
        .env("PASS_CLI_PASSWORD", "WrongHorseEntirely!")
        .args(["get", "github", "--quiet"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("wrong password or corrupted vault"))
        .stdout(predicate::str::contains("s3cret-value").not());
}

#[test]
#[serial]
fn unknown_service_is_a_user_error() {
    let dir = TempDir::new().unwrap();
    init_vault(&dir);

    pass(&dir)
        .args(["get", "nope", "--quiet"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("nope"));
}

#[test]
#[serial]
fn duplicate_add_is_rejected() {
    let dir = TempDir::new().unwrap();
    init_vault(&dir);
    add_github(&dir);

    pass(&dir)
        .env("PASS_CLI_SECRET", "other")
        .args(["add", "github", "--username", "someone"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("already exists"));
}

#[test]
#[serial]
fn list_shows_services_but_no_secrets() {
    let dir = TempDir::new().unwrap();
    init_vault(&dir);
    add_github(&dir);

    pass(&dir)
        .args(["list", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("github"))
        .stdout(predicate::str::contains("octocat"))
        .stdout(predicate::str::contains("s3cret-value").not());

    pass(&dir)
        .args(["list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("SERVICE"))
        .stdout(predicate::str::contains("github"));
}

#[test]
#[serial]
fn delete_then_get_reports_not_found() {
    let dir = TempDir::new().unwrap();
    init_vault(&dir);
    add_github(&dir);

    pass(&dir).args(["delete", "github"]).assert().success();
    pass(&dir)
        .args(["get", "github", "--quiet"])
        .assert()
        .code(1);
}

#[test]
#[serial]
fn audit_log_verifies_and_reports_tampering() {
    let dir = TempDir::new().unwrap();
    pass(&dir)
        .args(["init"])
        .assert()
        .success();
    add_github(&dir);

    pass(&dir)
        .args(["verify-audit"])
        .assert()
        .success()
        .stdout(predicate::str::contains("audit chain intact"));

    // Corrupt one byte of the log.
    let log_path = dir.path().join("audit.log");
    let mut content = std::fs::read(&log_path).unwrap();
    let mid = content.len() / 2;
    content[mid] = content[mid].wrapping_add(1);
    std::fs::write(&log_path, content).unwrap();

    pass(&dir)
        .args(["verify-audit"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("audit log chain broken"));
}

#[test]
#[serial]
fn generate_prints_a_password_of_the_requested_length() {
    let dir = TempDir::new().unwrap();
    let output = pass(&dir)
        .args(["generate", "--length", "16"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let printed = String::from_utf8(output).unwrap();
    assert_eq!(printed.trim_end().chars().count(), 16);
}

#[test]
#[serial]
fn weak_init_password_is_refused() {
    let dir = TempDir::new().unwrap();
    pass(&dir)
        .env("PASS_CLI_PASSWORD", "short")
        .args(["init"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("at least 12 characters"));
    assert!(!dir.path().join("vault.enc").exists());
}

#[test]
#[serial]
fn vault_remove_requires_force_in_headless_mode() {
    let dir = TempDir::new().unwrap();
    init_vault(&dir);

    pass(&dir)
        .args(["vault", "remove"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("cancelled"));
    assert!(dir.path().join("vault.enc").exists());

    pass(&dir)
        .args(["vault", "remove", "--force"])
        .assert()
        .success();
    assert!(!dir.path().join("vault.enc").exists());
}

#[test]
#[serial]
fn backup_create_and_info() {
    let dir = TempDir::new().unwrap();
    init_vault(&dir);
    add_github(&dir);

    pass(&dir)
        .args(["vault", "backup", "create"])
        .assert()
        .success()
        .stdout(predicate::str::contains("backup written"));

    pass(&dir)
        .args(["vault", "backup", "info"])
        .assert()
        .success()
        .stdout(predicate::str::contains("manual.backup"));
}

#[test]
#[serial]
fn change_password_flow() {
    let dir = TempDir::new().unwrap();
    init_vault(&dir);
    add_github(&dir);

    pass(&dir)
        .env("PASS_CLI_NEW_PASSWORD", "TheNewPassword99$")
        .args(["change-password"])
        .assert()
        .success()
        .stdout(predicate::str::contains("master password changed"));

    // Old password no longer unlocks.
    pass(&dir)
        .args(["unlock"])
        .assert()
        .code(3);

    pass(&dir)
        .env("PASS_CLI_PASSWORD", "TheNewPassword99$")
        .args(["unlock"])
        .assert()
        .success()
        .stdout(predicate::str::contains("vault unlocked"));
}

#[test]
#[serial]
fn no_command_prints_nothing_in_test_mode() {
    let dir = TempDir::new().unwrap();
    pass(&dir).assert().success().stdout("");
}
