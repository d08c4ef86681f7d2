//! End-to-end lifecycle scenarios against the public vault API.

use pass_cli::audit::AUDIT_LOG_FILE;
use pass_cli::crypto::Argon2Params;
use pass_cli::error::VaultError;
use pass_cli::keychain::NoopStore;
use pass_cli::model::{Credential, CredentialPatch, SecretBytes};
use pass_cli::storage::Storage;
use pass_cli::vault::{InitOptions, VaultService, VaultStatus};
use tempfile::TempDir;

const PASSWORD: &str = "CorrectHorseBattery!";

fn fast_opts(with_recovery: bool, audit: bool) -> InitOptions {
    InitOptions {
        with_recovery,
        audit,
        argon2: Argon2Params {
            memory_kib: 8,
            time_cost: 1,
            parallelism: 1,
        },
        kdf_iterations: Some(1_000),
        ..InitOptions::default()
    }
}

fn vault_in(dir: &TempDir) -> VaultService {
    VaultService::with_parts(
        dir.path().join("vault.enc"),
        Storage::os(),
        Box::new(NoopStore),
    )
    .unwrap()
}

fn cred(service: &str, username: &str, password: &str) -> Credential {
    Credential::new(service, username, SecretBytes::from_str(password))
}

#[test]
fn scenario_init_add_lock_unlock_get() {
    let dir = TempDir::new().unwrap();
    let vault = vault_in(&dir);

    vault.init(PASSWORD, fast_opts(false, true)).unwrap();
    vault.add(cred("github", "u", "p")).unwrap();
    vault.lock();
    vault.unlock(PASSWORD).unwrap();

    let got = vault.get("github", false).unwrap();
    assert_eq!(got.username, "u");
    assert_eq!(got.password, SecretBytes::from_str("p"));
}

#[test]
fn scenario_wrong_password_changes_nothing_on_disk() {
    let dir = TempDir::new().unwrap();
    let vault = vault_in(&dir);
    vault.init(PASSWORD, fast_opts(false, false)).unwrap();
    vault.add(cred("github", "u", "p")).unwrap();
    vault.lock();

    let before = std::fs::read(vault.path()).unwrap();
    let err = vault.unlock("WrongHorse!!!").unwrap_err();
    assert!(matches!(err, VaultError::WrongCredentials));
    assert_eq!(err.exit_code(), 3);
    assert_eq!(std::fs::read(vault.path()).unwrap(), before);
}

#[test]
fn scenario_full_recovery_round_trip() {
    let dir = TempDir::new().unwrap();
    let vault = vault_in(&dir);
    let outcome = vault.init(PASSWORD, fast_opts(true, false)).unwrap();
    let handout = outcome.recovery.expect("mnemonic requested");
    assert_eq!(handout.mnemonic.split_whitespace().count(), 24);
    assert_eq!(handout.challenge_positions.len(), 6);

    vault.add(cred("github", "u", "p")).unwrap();
    vault.add(cred("aws", "root", "q")).unwrap();
    let via_password: Vec<String> = vault
        .list()
        .unwrap()
        .iter()
        .map(|m| m.service.clone())
        .collect();
    vault.lock();

    // Present the 6 challenge words.
    let words: Vec<&str> = handout.mnemonic.split_whitespace().collect();
    let challenge: Vec<String> = handout
        .challenge_positions
        .iter()
        .map(|&p| words[p as usize].to_string())
        .collect();
    vault.unlock_with_mnemonic(&challenge, None).unwrap();
    assert_eq!(vault.status(), VaultStatus::UnlockedViaRecovery);

    // Same credential set as a password unlock.
    let via_recovery: Vec<String> = vault
        .list()
        .unwrap()
        .iter()
        .map(|m| m.service.clone())
        .collect();
    assert_eq!(via_password, via_recovery);

    // Mutations stay gated until a new password is set.
    assert!(matches!(
        vault.add(cred("gated", "u", "p")),
        Err(VaultError::State(_))
    ));

    vault.set_password_after_recovery("NewPass-For-Recovery1").unwrap();
    vault.lock();
    vault.unlock("NewPass-For-Recovery1").unwrap();
    assert!(matches!(
        vault.unlock(PASSWORD),
        Err(VaultError::WrongCredentials)
    ));
}

#[test]
fn wrong_but_valid_bip39_words_are_rejected() {
    let dir = TempDir::new().unwrap();
    let vault = vault_in(&dir);
    vault.init(PASSWORD, fast_opts(true, false)).unwrap();
    vault.lock();

    let wrong: Vec<String> = ["zoo", "wrap", "yellow", "youth", "zebra", "wisdom"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert!(matches!(
        vault.unlock_with_mnemonic(&wrong, None),
        Err(VaultError::WrongCredentials)
    ));
}

#[test]
fn change_password_swaps_which_password_unlocks() {
    let dir = TempDir::new().unwrap();
    let vault = vault_in(&dir);
    vault.init(PASSWORD, fast_opts(false, false)).unwrap();
    vault.add(cred("svc", "u", "p")).unwrap();

    vault.change_password(PASSWORD, "TheNewPassword99$").unwrap();
    vault.lock();
    assert!(matches!(
        vault.unlock(PASSWORD),
        Err(VaultError::WrongCredentials)
    ));
    vault.unlock("TheNewPassword99$").unwrap();
    assert_eq!(vault.get("svc", false).unwrap().username, "u");
}

#[test]
fn arbitrary_mutation_sequence_survives_relock() {
    let dir = TempDir::new().unwrap();
    let vault = vault_in(&dir);
    vault.init(PASSWORD, fast_opts(false, false)).unwrap();

    for i in 0..8 {
        vault.add(cred(&format!("svc{i}"), "user", "pw")).unwrap();
    }
    for i in (0..8).step_by(2) {
        vault.delete(&format!("svc{i}")).unwrap();
    }
    vault
        .update(
            "svc3",
            CredentialPatch {
                password: Some(SecretBytes::from_str("rotated")),
                category: Some(Some("infra".into())),
                ..CredentialPatch::default()
            },
        )
        .unwrap();

    let snapshot: Vec<(String, u64)> = vault
        .list()
        .unwrap()
        .iter()
        .map(|m| (m.service.clone(), m.modified_count))
        .collect();
    vault.lock();
    vault.unlock(PASSWORD).unwrap();
    let reloaded: Vec<(String, u64)> = vault
        .list()
        .unwrap()
        .iter()
        .map(|m| (m.service.clone(), m.modified_count))
        .collect();
    assert_eq!(snapshot, reloaded);
    assert_eq!(
        vault.get("svc3", false).unwrap().password,
        SecretBytes::from_str("rotated")
    );
}

#[test]
fn scenario_audit_chain_over_a_script_of_operations() {
    let dir = TempDir::new().unwrap();
    let vault = vault_in(&dir);
    vault.init(PASSWORD, fast_opts(false, true)).unwrap();
    vault.add(cred("a", "u", "p")).unwrap();
    vault.add(cred("b", "u", "p")).unwrap();
    vault
        .update(
            "a",
            CredentialPatch {
                notes: Some(Some("rotated".into())),
                ..CredentialPatch::default()
            },
        )
        .unwrap();
    vault.delete("b").unwrap();

    assert!(vault.verify_audit().unwrap() >= 5);

    // Flip one bit in the hmac of the update entry; verification must name
    // that exact sequence number.
    let log_path = dir.path().join(AUDIT_LOG_FILE);
    let content = std::fs::read_to_string(&log_path).unwrap();
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
    let idx = lines.iter().position(|l| l.contains("\"update\"")).unwrap();
    let expect_seq = (idx + 1) as u64;

    let mut entry: pass_cli::audit::AuditEntry = serde_json::from_str(&lines[idx]).unwrap();
    let mut raw = hex::decode(&entry.hmac).unwrap();
    raw[7] ^= 0x01;
    entry.hmac = hex::encode(raw);
    lines[idx] = serde_json::to_string(&entry).unwrap();
    std::fs::write(&log_path, lines.join("\n") + "\n").unwrap();

    match vault.verify_audit() {
        Err(VaultError::AuditChainBroken { seq }) => assert_eq!(seq, expect_seq),
        other => panic!("expected a broken chain, got {other:?}"),
    }
}

#[test]
fn migrate_v1_to_v2_end_to_end() {
    let dir = TempDir::new().unwrap();
    let vault = vault_in(&dir);
    vault.init(PASSWORD, fast_opts(false, false)).unwrap();
    vault.add(cred("keep", "u", "p")).unwrap();

    let before = std::fs::read(vault.path()).unwrap();
    let handout = vault
        .migrate_with_params(
            None,
            Argon2Params {
                memory_kib: 8,
                time_cost: 1,
                parallelism: 1,
            },
        )
        .unwrap();
    let after = std::fs::read(vault.path()).unwrap();
    assert_ne!(before, after, "envelope rewrapped");

    vault.lock();
    vault.unlock(PASSWORD).unwrap();
    assert_eq!(vault.get("keep", false).unwrap().username, "u");
    vault.lock();

    let words: Vec<&str> = handout.mnemonic.split_whitespace().collect();
    let challenge: Vec<String> = handout
        .challenge_positions
        .iter()
        .map(|&p| words[p as usize].to_string())
        .collect();
    vault.unlock_with_mnemonic(&challenge, None).unwrap();
    assert_eq!(vault.get("keep", false).unwrap().username, "u");
}
