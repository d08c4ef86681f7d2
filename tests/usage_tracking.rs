//! Usage tracking across working directories (serialized: these tests
//! change the process cwd).

use pass_cli::crypto::Argon2Params;
use pass_cli::keychain::NoopStore;
use pass_cli::model::{Credential, SecretBytes};
use pass_cli::storage::Storage;
use pass_cli::vault::{InitOptions, VaultService};
use serial_test::serial;
use tempfile::TempDir;

const PASSWORD: &str = "CorrectHorseBattery!";

fn fast_opts() -> InitOptions {
    InitOptions {
        audit: false,
        argon2: Argon2Params {
            memory_kib: 8,
            time_cost: 1,
            parallelism: 1,
        },
        kdf_iterations: Some(1_000),
        ..InitOptions::default()
    }
}

struct CwdGuard(std::path::PathBuf);

impl CwdGuard {
    fn enter(path: &std::path::Path) -> Self {
        let old = std::env::current_dir().unwrap();
        std::env::set_current_dir(path).unwrap();
        Self(old)
    }
}

impl Drop for CwdGuard {
    fn drop(&mut self) {
        let _ = std::env::set_current_dir(&self.0);
    }
}

#[test]
#[serial]
fn get_records_one_usage_record_per_location() {
    let vault_dir = TempDir::new().unwrap();
    let project_a = TempDir::new().unwrap();
    let project_b = TempDir::new().unwrap();

    let vault = VaultService::with_parts(
        vault_dir.path().join("vault.enc"),
        Storage::os(),
        Box::new(NoopStore),
    )
    .unwrap();
    vault.init(PASSWORD, fast_opts()).unwrap();
    vault
        .add(Credential::new("github", "u", SecretBytes::from_str("p")))
        .unwrap();

    let loc_a = {
        let _cwd = CwdGuard::enter(project_a.path());
        vault.get("github", true).unwrap();
        vault.get("github", true).unwrap();
        std::env::current_dir().unwrap().display().to_string()
    };
    let loc_b = {
        let _cwd = CwdGuard::enter(project_b.path());
        vault.get("github", true).unwrap();
        std::env::current_dir().unwrap().display().to_string()
    };
    assert_ne!(loc_a, loc_b);

    let got = vault.get("github", false).unwrap();
    assert_eq!(got.usage.len(), 2, "one record per distinct directory");
    assert_eq!(got.usage[&loc_a].access_count, 2);
    assert_eq!(got.usage[&loc_b].access_count, 1);
    assert_eq!(got.usage[&loc_a].location, loc_a);

    // Usage is part of the persisted payload.
    vault.lock();
    vault.unlock(PASSWORD).unwrap();
    let reloaded = vault.get("github", false).unwrap();
    assert_eq!(reloaded.usage[&loc_a].access_count, 2);
    assert_eq!(reloaded.usage[&loc_b].access_count, 1);
}

#[test]
#[serial]
fn usage_inside_a_git_repository_records_the_root() {
    let vault_dir = TempDir::new().unwrap();
    let repo = TempDir::new().unwrap();
    std::fs::create_dir(repo.path().join(".git")).unwrap();
    let nested = repo.path().join("crates").join("deep");
    std::fs::create_dir_all(&nested).unwrap();

    let vault = VaultService::with_parts(
        vault_dir.path().join("vault.enc"),
        Storage::os(),
        Box::new(NoopStore),
    )
    .unwrap();
    vault.init(PASSWORD, fast_opts()).unwrap();
    vault
        .add(Credential::new("github", "u", SecretBytes::from_str("p")))
        .unwrap();

    let location = {
        let _cwd = CwdGuard::enter(&nested);
        vault.get("github", true).unwrap();
        std::env::current_dir().unwrap().display().to_string()
    };

    let got = vault.get("github", false).unwrap();
    let record = &got.usage[&location];
    let git_repo = record.git_repo.as_deref().expect("git root discovered");
    assert!(
        location.starts_with(git_repo),
        "git root {git_repo} should contain {location}"
    );
    assert!(!git_repo.contains("crates"), "root is the repo, not the leaf");
}

#[test]
#[serial]
fn writes_never_touch_usage() {
    let vault_dir = TempDir::new().unwrap();
    let vault = VaultService::with_parts(
        vault_dir.path().join("vault.enc"),
        Storage::os(),
        Box::new(NoopStore),
    )
    .unwrap();
    vault.init(PASSWORD, fast_opts()).unwrap();
    vault
        .add(Credential::new("github", "u", SecretBytes::from_str("p")))
        .unwrap();
    vault
        .update(
            "github",
            pass_cli::model::CredentialPatch {
                notes: Some(Some("edited".into())),
                ..Default::default()
            },
        )
        .unwrap();

    let got = vault.get("github", false).unwrap();
    assert!(got.usage.is_empty(), "add/update must not record usage");
}
