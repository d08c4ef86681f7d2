pub mod audit;
pub mod clipboard;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod keychain;
pub mod keys;
pub mod metadata;
pub mod model;
pub mod policy;
pub mod recovery;
pub mod storage;
pub mod vault;

use std::io::IsTerminal;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use zeroize::Zeroizing;

use crate::clipboard::{ClipboardWriter, NoopClipboard, SystemClipboard};
use crate::error::VaultError;
use crate::model::{Credential, CredentialPatch, SecretBytes};
use crate::recovery::RecoveryHandout;
use crate::vault::{credential_field, InitOptions, VaultService};

/// Command-line interface.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "pass",
    version,
    about = "Local offline credential vault with mnemonic recovery"
)]
pub struct Cli {
    /// Path to the vault file (defaults to the platform data dir)
    #[arg(long, env = "PASS_CLI_VAULT")]
    pub vault: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Create a new vault
    Init {
        /// Skip the HMAC-chained audit log
        #[arg(long, default_value_t = false)]
        no_audit: bool,

        /// Generate a 24-word recovery mnemonic
        #[arg(long, default_value_t = false)]
        with_recovery: bool,

        /// Replace an existing vault file
        #[arg(long, default_value_t = false)]
        overwrite: bool,
    },
    /// Check that the master password unlocks the vault
    Unlock,
    /// Store a new credential
    Add {
        /// Service name (the unique key)
        service: String,

        /// Username for the service (prompted when omitted)
        #[arg(long)]
        username: Option<String>,

        #[arg(long)]
        url: Option<String>,

        #[arg(long)]
        notes: Option<String>,

        #[arg(long)]
        category: Option<String>,

        /// Generate the password instead of prompting for one
        #[arg(long, default_value_t = false)]
        generate: bool,
    },
    /// Read a credential. Usage is recorded (including under --quiet);
    /// pass --no-usage to opt out.
    Get {
        service: String,

        /// Field to fetch: password, username, url, notes, totp
        #[arg(long, short = 'f')]
        field: Option<String>,

        /// Print the secret itself to stdout (for scripting)
        #[arg(long, short = 'q', default_value_t = false)]
        quiet: bool,

        /// Skip the clipboard copy
        #[arg(long, default_value_t = false)]
        no_clipboard: bool,

        /// Skip usage recording for this read
        #[arg(long, default_value_t = false)]
        no_usage: bool,
    },
    /// Update fields of a stored credential
    Update {
        service: String,

        #[arg(long)]
        username: Option<String>,

        #[arg(long)]
        url: Option<String>,

        #[arg(long)]
        notes: Option<String>,

        #[arg(long)]
        category: Option<String>,

        /// Prompt for a new password
        #[arg(long, default_value_t = false)]
        password: bool,
    },
    /// Remove a credential
    Delete { service: String },
    /// List stored credentials (no secrets)
    List {
        #[arg(long, value_enum, default_value_t = ListFormat::Table)]
        format: ListFormat,
    },
    /// Generate a random password
    Generate {
        #[arg(long, default_value_t = policy::DEFAULT_GENERATED_LEN)]
        length: usize,

        /// Letters and digits only
        #[arg(long, default_value_t = false)]
        no_symbols: bool,
    },
    /// Change the master password
    ChangePassword {
        /// Recover with the mnemonic challenge words instead of the old
        /// password
        #[arg(long, default_value_t = false)]
        recover: bool,
    },
    /// Verify the audit log HMAC chain
    VerifyAudit,
    /// Vault-level maintenance
    Vault {
        #[command(subcommand)]
        command: VaultCommands,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum VaultCommands {
    /// Manual backups
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },
    /// Upgrade a v1 vault to v2 and enable recovery
    Migrate,
    /// Delete the vault and its artifacts (manual backups are kept)
    Remove {
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum BackupAction {
    /// Create a timestamped snapshot
    Create,
    /// Restore the newest verifiable backup (or a specific file)
    Restore {
        #[arg(long)]
        file: Option<PathBuf>,

        /// Skip the confirmation prompt
        #[arg(long, default_value_t = false)]
        force: bool,

        /// Report which backup would be restored without writing
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// List backups, newest first
    Info,
    /// List the credentials inside a backup without restoring it
    Preview {
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum, PartialEq, Eq)]
pub enum ListFormat {
    Table,
    Json,
}

/// CLI-boundary error: exit code plus user-facing message.
#[derive(Debug, Clone)]
pub struct CliError {
    pub code: i32,
    pub kind: &'static str,
    pub message: String,
    pub hint: Option<String>,
}

pub type CliResult<T = ()> = std::result::Result<T, CliError>;

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for CliError {}

impl CliError {
    fn usage(message: impl Into<String>) -> Self {
        CliError {
            code: 1,
            kind: "usage",
            message: message.into(),
            hint: None,
        }
    }

    fn system(message: impl Into<String>) -> Self {
        CliError {
            code: 2,
            kind: "system",
            message: message.into(),
            hint: None,
        }
    }
}

impl From<VaultError> for CliError {
    fn from(err: VaultError) -> Self {
        let hint = match &err {
            VaultError::WrongCredentials => {
                Some("your data is intact; check the password and try again".to_string())
            }
            VaultError::State(msg) if msg.contains("no vault found") => {
                Some("run `pass init` to create one".to_string())
            }
            VaultError::AuditChainBroken { .. } => {
                Some("the log was modified outside the vault; inspect it before trusting history".to_string())
            }
            _ => None,
        };
        let kind = match &err {
            VaultError::WrongCredentials
            | VaultError::VerificationFailed
            | VaultError::AuditChainBroken { .. } => "security",
            VaultError::Io(_)
            | VaultError::PermissionDenied(_)
            | VaultError::DiskFull(_)
            | VaultError::Corrupted(_)
            | VaultError::SaveVerificationFailed
            | VaultError::UnsupportedVersion(_) => "system",
            _ => "usage",
        };
        CliError {
            code: err.exit_code(),
            kind,
            message: err.to_string(),
            hint,
        }
    }
}

/// Entry point used by the `pass` binary.
pub fn run() -> CliResult<()> {
    let cli = Cli::parse();
    init_tracing();

    let Some(command) = cli.command.clone() else {
        print_first_run_guidance();
        return Ok(());
    };

    let vault_path = resolve_vault_path(cli.vault.clone())?;
    let vault = VaultService::open(vault_path).map_err(CliError::from)?;

    match command {
        Commands::Init {
            no_audit,
            with_recovery,
            overwrite,
        } => cmd_init(&vault, no_audit, with_recovery, overwrite),
        Commands::Unlock => cmd_unlock(&vault),
        Commands::Add {
            service,
            username,
            url,
            notes,
            category,
            generate,
        } => cmd_add(&vault, service, username, url, notes, category, generate),
        Commands::Get {
            service,
            field,
            quiet,
            no_clipboard,
            no_usage,
        } => cmd_get(&vault, &service, field.as_deref(), quiet, no_clipboard, no_usage),
        Commands::Update {
            service,
            username,
            url,
            notes,
            category,
            password,
        } => cmd_update(&vault, &service, username, url, notes, category, password),
        Commands::Delete { service } => cmd_delete(&vault, &service),
        Commands::List { format } => cmd_list(&vault, format),
        Commands::Generate { length, no_symbols } => cmd_generate(length, no_symbols),
        Commands::ChangePassword { recover } => cmd_change_password(&vault, recover),
        Commands::VerifyAudit => cmd_verify_audit(&vault),
        Commands::Vault { command } => match command {
            VaultCommands::Backup { action } => cmd_backup(&vault, action),
            VaultCommands::Migrate => cmd_migrate(&vault),
            VaultCommands::Remove { force } => cmd_remove(&vault, force),
        },
    }
}

// ----------------------------------------------------------------------
// Command handlers
// ----------------------------------------------------------------------

fn cmd_init(
    vault: &VaultService,
    no_audit: bool,
    with_recovery: bool,
    overwrite: bool,
) -> CliResult<()> {
    let password = prompt_new_master_password("Master password for the new vault")?;
    let opts = InitOptions {
        with_recovery,
        overwrite,
        audit: !no_audit,
        ..InitOptions::default()
    };
    let outcome = vault.init(&password, opts)?;

    println!(
        "{} vault created at {}",
        "ok:".green().bold(),
        vault.path().display()
    );
    println!("password strength: {}", outcome.strength);
    if let Some(handout) = outcome.recovery {
        print_mnemonic_handout(&handout);
    }
    Ok(())
}

fn cmd_unlock(vault: &VaultService) -> CliResult<()> {
    let password = prompt_master_password()?;
    vault.unlock(&password)?;
    let count = vault.list()?.len();
    println!(
        "{} vault unlocked ({} credential{})",
        "ok:".green().bold(),
        count,
        if count == 1 { "" } else { "s" }
    );
    Ok(())
}

fn cmd_add(
    vault: &VaultService,
    service: String,
    username: Option<String>,
    url: Option<String>,
    notes: Option<String>,
    category: Option<String>,
    generate: bool,
) -> CliResult<()> {
    let password = prompt_master_password()?;
    vault.unlock(&password)?;

    let username = match username {
        Some(u) => u,
        None => prompt_line(&format!("Username for {service}"))?,
    };
    let secret: Zeroizing<String> = if generate {
        let generated = policy::generate_password(policy::DEFAULT_GENERATED_LEN, true);
        println!("generated a {}-character password", generated.chars().count());
        generated
    } else {
        prompt_credential_secret(&format!("Password for {service}"))?
    };

    let mut credential = Credential::new(service.clone(), username, SecretBytes::from_str(&secret));
    credential.url = url;
    credential.notes = notes;
    credential.category = category;
    vault.add(credential)?;
    println!("{} stored credential for '{service}'", "ok:".green().bold());
    Ok(())
}

fn cmd_get(
    vault: &VaultService,
    service: &str,
    field: Option<&str>,
    quiet: bool,
    no_clipboard: bool,
    no_usage: bool,
) -> CliResult<()> {
    let password = prompt_master_password()?;
    vault.unlock(&password)?;

    let field_name = field.unwrap_or("password");
    let credential = if field.is_some() && !no_usage {
        // Field reads count through the per-field map instead of a plain
        // access bump.
        let credential = vault.get(service, false)?;
        vault.record_field_access(service, field_name)?;
        credential
    } else {
        vault.get(service, !no_usage)?
    };
    let value = credential_field(&credential, field_name)?;

    if quiet {
        // The one sanctioned path for a secret to reach stdout.
        println!("{}", *value);
        return Ok(());
    }

    println!("service:  {}", credential.service);
    println!("username: {}", credential.username);
    if let Some(url) = &credential.url {
        println!("url:      {url}");
    }
    if no_clipboard {
        println!(
            "{} re-run with --quiet to print the {field_name}, or without --no-clipboard to copy it",
            "note:".yellow()
        );
        return Ok(());
    }

    let mut clip: Box<dyn ClipboardWriter> = if test_mode() {
        Box::new(NoopClipboard)
    } else {
        Box::new(SystemClipboard::new())
    };
    match clip.copy_text(&value) {
        Ok(()) => println!("{} {field_name} copied to clipboard", "ok:".green().bold()),
        Err(err) => println!("{} {err}; re-run with --quiet to print it", "note:".yellow()),
    }
    Ok(())
}

fn cmd_update(
    vault: &VaultService,
    service: &str,
    username: Option<String>,
    url: Option<String>,
    notes: Option<String>,
    category: Option<String>,
    password: bool,
) -> CliResult<()> {
    let master = prompt_master_password()?;
    vault.unlock(&master)?;

    let new_secret = if password {
        Some(prompt_credential_secret(&format!("New password for {service}"))?)
    } else {
        None
    };
    let patch = CredentialPatch {
        username,
        password: new_secret.map(|s| SecretBytes::from_str(&s)),
        url: url.map(Some),
        notes: notes.map(Some),
        category: category.map(Some),
        totp_secret: None,
    };
    if patch.is_empty() {
        return Err(CliError::usage(
            "nothing to update: pass at least one of --username/--url/--notes/--category/--password",
        ));
    }
    vault.update(service, patch)?;
    println!("{} updated '{service}'", "ok:".green().bold());
    Ok(())
}

fn cmd_delete(vault: &VaultService, service: &str) -> CliResult<()> {
    let password = prompt_master_password()?;
    vault.unlock(&password)?;
    vault.delete(service)?;
    println!("{} deleted '{service}'", "ok:".green().bold());
    Ok(())
}

fn cmd_list(vault: &VaultService, format: ListFormat) -> CliResult<()> {
    let password = prompt_master_password()?;
    vault.unlock(&password)?;
    let listing = vault.list()?;

    match format {
        ListFormat::Json => {
            let json = serde_json::to_string_pretty(&listing)
                .map_err(|e| CliError::system(format!("listing serialization: {e}")))?;
            println!("{json}");
        }
        ListFormat::Table => {
            if listing.is_empty() {
                println!("vault is empty");
                return Ok(());
            }
            let width = listing
                .iter()
                .map(|m| m.service.len())
                .max()
                .unwrap_or(7)
                .max(7);
            println!("{:<width$}  {:<20}  {:<10}  {}", "SERVICE", "USERNAME", "READS", "UPDATED");
            for meta in &listing {
                let reads: u64 = meta.usage.values().map(|u| u.access_count).sum();
                println!(
                    "{:<width$}  {:<20}  {:<10}  {}",
                    meta.service,
                    truncate(&meta.username, 20),
                    reads,
                    meta.updated_at.format("%Y-%m-%d %H:%M"),
                );
            }
        }
    }
    Ok(())
}

fn cmd_generate(length: usize, no_symbols: bool) -> CliResult<()> {
    if length == 0 || length > 256 {
        return Err(CliError::usage("length must be between 1 and 256"));
    }
    let password = policy::generate_password(length, !no_symbols);
    println!("{}", *password);
    Ok(())
}

fn cmd_change_password(vault: &VaultService, recover: bool) -> CliResult<()> {
    if recover {
        let words = prompt_recovery_words()?;
        let passphrase = prompt_optional_passphrase()?;
        vault.unlock_with_mnemonic(&words, passphrase.as_deref().map(|s| s.as_str()))?;
        let new = prompt_new_master_password("New master password")?;
        vault.set_password_after_recovery(&new)?;
        println!("{} master password reset via recovery", "ok:".green().bold());
    } else {
        let old = prompt_master_password()?;
        vault.unlock(&old)?;
        let new = prompt_new_master_password("New master password")?;
        vault.change_password(&old, &new)?;
        println!("{} master password changed", "ok:".green().bold());
    }
    Ok(())
}

fn cmd_verify_audit(vault: &VaultService) -> CliResult<()> {
    let entries = vault.verify_audit()?;
    println!(
        "{} audit chain intact ({entries} entr{})",
        "ok:".green().bold(),
        if entries == 1 { "y" } else { "ies" }
    );
    Ok(())
}

fn cmd_backup(vault: &VaultService, action: BackupAction) -> CliResult<()> {
    match action {
        BackupAction::Create => {
            let path = vault.create_backup()?;
            println!("{} backup written to {}", "ok:".green().bold(), path.display());
        }
        BackupAction::Info => {
            let backups = vault.list_backups()?;
            if backups.is_empty() {
                println!("no backups found");
            } else {
                for path in backups {
                    println!("{}", path.display());
                }
            }
        }
        BackupAction::Preview { file } => {
            let password = prompt_master_password()?;
            let (path, listing) = vault.preview_backup(&password, file.as_deref())?;
            println!("backup {} holds {} credential(s):", path.display(), listing.len());
            for meta in listing {
                println!("  {}  ({})", meta.service, meta.username);
            }
        }
        BackupAction::Restore {
            file,
            force,
            dry_run,
        } => {
            let password = prompt_master_password()?;
            if dry_run {
                let chosen = vault.restore_backup(&password, file.as_deref(), true)?;
                println!("would restore {}", chosen.display());
                return Ok(());
            }
            if !force && !confirm("Replace the current vault with the backup?")? {
                return Err(CliError::usage("restore cancelled"));
            }
            let chosen = vault.restore_backup(&password, file.as_deref(), false)?;
            println!("{} restored {}", "ok:".green().bold(), chosen.display());
        }
    }
    Ok(())
}

fn cmd_migrate(vault: &VaultService) -> CliResult<()> {
    let password = prompt_master_password()?;
    vault.unlock(&password)?;
    let handout = vault.migrate(None)?;
    println!("{} vault migrated to format v2", "ok:".green().bold());
    print_mnemonic_handout(&handout);
    Ok(())
}

fn cmd_remove(vault: &VaultService, force: bool) -> CliResult<()> {
    if !force && !confirm("Permanently delete the vault and its audit log?")? {
        return Err(CliError::usage("removal cancelled"));
    }
    vault.remove()?;
    println!("{} vault removed", "ok:".green().bold());
    Ok(())
}

// ----------------------------------------------------------------------
// Prompts and output helpers
// ----------------------------------------------------------------------

fn test_mode() -> bool {
    std::env::var_os("PASS_CLI_TEST").is_some()
}

fn env_secret(name: &str) -> Option<Zeroizing<String>> {
    std::env::var(name).ok().map(Zeroizing::new)
}

/// Existing master password. In `PASS_CLI_TEST` mode the suite supplies it
/// via `PASS_CLI_PASSWORD` to stay headless.
fn prompt_master_password() -> CliResult<Zeroizing<String>> {
    if test_mode() {
        if let Some(pw) = env_secret("PASS_CLI_PASSWORD") {
            return Ok(pw);
        }
    }
    dialoguer::Password::new()
        .with_prompt("Master password")
        .interact()
        .map(Zeroizing::new)
        .map_err(|e| CliError::system(format!("password prompt: {e}")))
}

/// New master password, confirmed. Test override: `PASS_CLI_NEW_PASSWORD`,
/// falling back to `PASS_CLI_PASSWORD`.
fn prompt_new_master_password(prompt: &str) -> CliResult<Zeroizing<String>> {
    if test_mode() {
        if let Some(pw) = env_secret("PASS_CLI_NEW_PASSWORD").or_else(|| env_secret("PASS_CLI_PASSWORD")) {
            return Ok(pw);
        }
    }
    dialoguer::Password::new()
        .with_prompt(prompt)
        .with_confirmation("Repeat to confirm", "passwords do not match")
        .interact()
        .map(Zeroizing::new)
        .map_err(|e| CliError::system(format!("password prompt: {e}")))
}

/// A credential's secret value. Test override: `PASS_CLI_SECRET`.
fn prompt_credential_secret(prompt: &str) -> CliResult<Zeroizing<String>> {
    if test_mode() {
        if let Some(secret) = env_secret("PASS_CLI_SECRET") {
            return Ok(secret);
        }
    }
    dialoguer::Password::new()
        .with_prompt(prompt)
        .interact()
        .map(Zeroizing::new)
        .map_err(|e| CliError::system(format!("secret prompt: {e}")))
}

fn prompt_line(prompt: &str) -> CliResult<String> {
    if test_mode() {
        if let Ok(value) = std::env::var("PASS_CLI_USERNAME") {
            return Ok(value);
        }
    }
    dialoguer::Input::<String>::new()
        .with_prompt(prompt)
        .interact_text()
        .map_err(|e| CliError::system(format!("input prompt: {e}")))
}

/// The 6 challenge words. Test override: `PASS_CLI_WORDS`, space-separated.
fn prompt_recovery_words() -> CliResult<Vec<String>> {
    if test_mode() {
        if let Ok(words) = std::env::var("PASS_CLI_WORDS") {
            return Ok(words.split_whitespace().map(|w| w.to_string()).collect());
        }
    }
    let mut words = Vec::with_capacity(recovery::CHALLENGE_WORDS);
    for i in 1..=recovery::CHALLENGE_WORDS {
        let word = dialoguer::Input::<String>::new()
            .with_prompt(format!("Challenge word {i} of {}", recovery::CHALLENGE_WORDS))
            .interact_text()
            .map_err(|e| CliError::system(format!("word prompt: {e}")))?;
        words.push(word);
    }
    Ok(words)
}

fn prompt_optional_passphrase() -> CliResult<Option<Zeroizing<String>>> {
    if test_mode() {
        return Ok(env_secret("PASS_CLI_RECOVERY_PASSPHRASE"));
    }
    let value = dialoguer::Password::new()
        .with_prompt("Mnemonic passphrase (empty if none)")
        .allow_empty_password(true)
        .interact()
        .map_err(|e| CliError::system(format!("passphrase prompt: {e}")))?;
    Ok(if value.is_empty() {
        None
    } else {
        Some(Zeroizing::new(value))
    })
}

fn confirm(prompt: &str) -> CliResult<bool> {
    if test_mode() {
        // Headless runs must pass --force for destructive actions.
        return Ok(false);
    }
    dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .map_err(|e| CliError::system(format!("confirmation prompt: {e}")))
}

fn print_mnemonic_handout(handout: &RecoveryHandout) {
    println!();
    println!("{}", "RECOVERY MNEMONIC (shown exactly once)".yellow().bold());
    println!("Write these 24 words down, in order, and store them offline:");
    println!();
    for (i, word) in handout.mnemonic.split_whitespace().enumerate() {
        let marker = if handout.challenge_positions.contains(&(i as u8)) {
            "*"
        } else {
            " "
        };
        print!("{:>3}{marker} {:<12}", i + 1, word);
        if (i + 1) % 4 == 0 {
            println!();
        }
    }
    println!();
    let positions: Vec<String> = handout
        .challenge_positions
        .iter()
        .map(|p| (p + 1).to_string())
        .collect();
    println!(
        "Recovery will quiz you for the {} starred words (positions {}).",
        handout.challenge_positions.len(),
        positions.join(", ")
    );
    println!("The vault cannot re-display this phrase later.");
}

fn print_first_run_guidance() {
    if test_mode() {
        return;
    }
    println!("pass-cli: a local, offline credential vault");
    println!();
    println!("  pass init --with-recovery   create a vault with a recovery mnemonic");
    println!("  pass add <service>          store a credential");
    println!("  pass get <service>          copy a password to the clipboard");
    println!("  pass list                   show what is stored");
    println!();
    println!("Run `pass --help` for the full command set.");
}

fn resolve_vault_path(cli_path: Option<PathBuf>) -> CliResult<PathBuf> {
    if let Some(path) = cli_path {
        return Ok(path);
    }
    let dirs = directories::ProjectDirs::from("com", "rawwerks", "pass-cli")
        .ok_or_else(|| CliError::system("could not determine a platform data directory"))?;
    let dir = dirs.data_dir();
    std::fs::create_dir_all(dir)
        .map_err(|e| CliError::system(format!("creating {}: {e}", dir.display())))?;
    Ok(dir.join("vault.enc"))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal());
    // A second init (tests call run() repeatedly) is fine to ignore.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_core_commands() {
        let cli = Cli::try_parse_from(["pass", "get", "github", "--field", "username", "--quiet"])
            .unwrap();
        match cli.command {
            Some(Commands::Get {
                service,
                field,
                quiet,
                no_clipboard,
                no_usage,
            }) => {
                assert_eq!(service, "github");
                assert_eq!(field.as_deref(), Some("username"));
                assert!(quiet);
                assert!(!no_clipboard);
                assert!(!no_usage);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn cli_parses_vault_subcommands() {
        let cli = Cli::try_parse_from(["pass", "vault", "backup", "restore", "--dry-run"]).unwrap();
        match cli.command {
            Some(Commands::Vault {
                command:
                    VaultCommands::Backup {
                        action: BackupAction::Restore { dry_run, force, file },
                    },
            }) => {
                assert!(dry_run);
                assert!(!force);
                assert!(file.is_none());
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn cli_error_maps_vault_errors_to_exit_codes() {
        let err: CliError = VaultError::WrongCredentials.into();
        assert_eq!(err.code, 3);
        assert_eq!(err.kind, "security");
        assert!(err.hint.is_some());

        let err: CliError = VaultError::NotFound("svc".into()).into();
        assert_eq!(err.code, 1);
        assert_eq!(err.kind, "usage");

        let err: CliError = VaultError::UnsupportedVersion(7).into();
        assert_eq!(err.code, 2);
        assert_eq!(err.kind, "system");
    }

    #[test]
    fn truncate_respects_width() {
        assert_eq!(truncate("short", 20), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
    }
}
