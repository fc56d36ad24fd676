//! privage: secrets manager over a directory of age-encrypted files
//!
//! Setup:
//!   init [--piv-slot hex]   - create an identity and a config file
//!   key                     - print the private key
//!   status                  - show config, identity and repository
//!
//! Secrets:
//!   add <category> <label>  - encrypt a generated credential, or the file <label>
//!   delete <label>          - remove an encrypted file
//!   list [filter]           - list headers, optionally filtered
//!   show <label> [field]    - print a credential (or one field)
//!   cat <label>             - print any decrypted body
//!   clipboard <label>       - copy a credential password to the clipboard
//!   decrypt <label>         - write the decrypted body to <label>
//!   reencrypt               - re-encrypt plaintext copies of existing secrets
//!   rotate                  - move the repository to a new identity

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::{Path, PathBuf};

use privage_core::config::{self, Config, CONFIG_FILE, IDENTITY_FILE, IDENTITY_TYPE_PIV};
use privage_core::Slot;
use privage_secrets::identity::{self, IdentityKind};
use privage_secrets::{
    rotate, token, Identity, ReencryptOptions, Repository, RotateOptions, SystemClipboard, Token,
};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "privage",
    version,
    about = "Secrets manager over age-encrypted files",
    long_about = "privage: keep each secret in its own age-encrypted file, with encrypted metadata"
)]
struct Cli {
    /// Path to the config file (default: ./.privage.conf, then ~/.privage.conf)
    #[arg(long, short = 'c', env = "PRIVAGE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "PRIVAGE_LOG", default_value = "warn", global = true)]
    log: String,

    /// Log format (json, text)
    #[arg(long, env = "PRIVAGE_LOG_FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an identity file and a config file in the current directory
    Init {
        /// Wrap the identity with the key in this token slot (hex, e.g. 9a)
        #[arg(long, short = 'p')]
        piv_slot: Option<Slot>,
    },

    /// Print the private key of the identity
    Key,

    /// Show configuration, identity and repository status
    Status,

    // ── secrets ────────────────────────────────────────────────────────────────

    /// Encrypt a new secret
    ///
    /// With category "credential" a credential with a random password is
    /// generated. Any other category encrypts the file named <label> in
    /// the repository directory.
    Add { category: String, label: String },

    /// Delete the encrypted file holding <label>
    Delete { label: String },

    /// List secrets, optionally only those whose category or label contains <filter>
    #[command(alias = "ls")]
    List { filter: Option<String> },

    /// Print a credential, or a single field of it
    Show { label: String, field: Option<String> },

    /// Print the decrypted content of any secret
    Cat { label: String },

    /// Copy the password of a credential to the clipboard
    Clipboard { label: String },

    /// Write the decrypted content of <label> to a file of that name
    Decrypt { label: String },

    /// Re-encrypt secrets whose plaintext file exists in the repository
    ///
    /// Without flags only lists the candidates.
    Reencrypt {
        /// Re-encrypt the candidates
        #[arg(long, short = 'f')]
        force: bool,
        /// Re-encrypt and delete the plaintext files afterwards
        #[arg(long)]
        clean: bool,
    },

    /// Re-encrypt every secret to a new identity
    ///
    /// First run without --clean: creates <identity>.rotate and writes a
    /// .rotate copy of every file. Then run with --clean to delete the old
    /// files and install the new identity.
    Rotate {
        /// Finish the rotation
        #[arg(long)]
        clean: bool,
        /// Wrap the new identity with the key in this token slot (hex)
        #[arg(long, short = 'p')]
        piv_slot: Option<Slot>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log, &cli.log_format);

    if let Commands::Init { piv_slot } = cli.command {
        return cmd_init(cli.config.as_deref(), piv_slot);
    }

    let mut session = Session::open(cli.config.as_deref())?;
    let result = run(&mut session, cli.command);
    if let Err(e) = session.token.close() {
        tracing::warn!(error = %e, "closing token");
    }
    result
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries secrets; logs go to stderr
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── session ────────────────────────────────────────────────────────────────────

/// Config, repository and token for one command.
struct Session {
    config_path: Option<PathBuf>,
    config: Config,
    repo: Repository,
    token: Box<dyn Token>,
}

impl Session {
    fn open(explicit: Option<&Path>) -> Result<Self> {
        let config_path = config::discover(explicit);
        let config = match &config_path {
            Some(path) => Config::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => Config::default(),
        };
        let repo = Repository::from_config(&config);
        let token = token::open().context("opening token driver")?;
        Ok(Self {
            config_path,
            config,
            repo,
            token,
        })
    }

    /// The configured identity, which must be ready.
    fn identity(&mut self) -> Result<Identity> {
        let identity = identity::load_configured(&self.config, self.token.as_mut());
        identity
            .key()
            .with_context(|| format!("identity {}", identity.path().display()))?;
        Ok(identity)
    }
}

fn run(session: &mut Session, command: Commands) -> Result<()> {
    match command {
        Commands::Init { piv_slot } => cmd_init(session.config_path.as_deref(), piv_slot),
        Commands::Key => cmd_key(session),
        Commands::Status => cmd_status(session),
        Commands::Add { category, label } => cmd_add(session, &category, &label),
        Commands::Delete { label } => cmd_delete(session, &label),
        Commands::List { filter } => cmd_list(session, filter.as_deref()),
        Commands::Show { label, field } => cmd_show(session, &label, field.as_deref()),
        Commands::Cat { label } => cmd_cat(session, &label),
        Commands::Clipboard { label } => cmd_clipboard(session, &label),
        Commands::Decrypt { label } => cmd_decrypt(session, &label),
        Commands::Reencrypt { force, clean } => cmd_reencrypt(session, force, clean),
        Commands::Rotate { clean, piv_slot } => cmd_rotate(session, clean, piv_slot),
    }
}

// ── setup commands ─────────────────────────────────────────────────────────────

fn cmd_init(explicit: Option<&Path>, piv_slot: Option<Slot>) -> Result<()> {
    let cwd = std::env::current_dir().context("reading current directory")?;
    let config_path = explicit
        .map(config::expand_tilde)
        .unwrap_or_else(|| cwd.join(CONFIG_FILE));
    if config_path.exists() {
        bail!("config file {} already exists", config_path.display());
    }

    let identity_path = cwd.join(IDENTITY_FILE);
    let mut token = token::open().context("opening token driver")?;
    let recipient = identity::create_file(&identity_path, token.as_mut(), piv_slot)
        .with_context(|| format!("creating identity {}", identity_path.display()))?;
    token.close().context("closing token")?;

    let config = Config {
        identity_path: identity_path.clone(),
        identity_type: if piv_slot.is_some() {
            IDENTITY_TYPE_PIV.to_string()
        } else {
            String::new()
        },
        identity_piv_slot: piv_slot.map(|s| s.to_string()).unwrap_or_default(),
        secrets_repository_path: cwd.clone(),
        ..Config::default()
    };
    config
        .save(&config_path)
        .with_context(|| format!("writing config {}", config_path.display()))?;

    println!("identity:   {}", identity_path.display());
    println!("public key: {recipient}");
    println!("config:     {}", config_path.display());
    println!("repository: {}", cwd.display());
    Ok(())
}

fn cmd_key(session: &mut Session) -> Result<()> {
    let identity = session.identity()?;
    let text = identity::secret_key_text(identity.key()?);
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", text.as_str())?;
    Ok(())
}

fn cmd_status(session: &mut Session) -> Result<()> {
    match &session.config_path {
        Some(path) => println!("config:     {}", path.display()),
        None => println!("config:     none found, using defaults"),
    }

    let identity = identity::load_configured(&session.config, session.token.as_mut());
    let kind = match identity.kind() {
        IdentityKind::Raw => "age key".to_string(),
        IdentityKind::Token(slot) => format!("token-wrapped (slot {slot})"),
    };
    println!("identity:   {} ({kind})", identity.path().display());
    match identity.recipient() {
        Some(recipient) => println!("public key: {recipient}"),
        None => {
            let reason = identity
                .error()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "not loaded".into());
            println!("public key: unavailable: {reason}");
        }
    }

    println!("repository: {}", session.repo.root().display());
    if identity.is_ready() {
        let count = session.repo.count(&identity).context("scanning repository")?;
        println!("files:      {count} encrypted with this identity");
    }
    Ok(())
}

// ── secret commands ────────────────────────────────────────────────────────────

fn cmd_add(session: &mut Session, category: &str, label: &str) -> Result<()> {
    let identity = session.identity()?;
    let report = session
        .repo
        .add(&identity, category, label)
        .with_context(|| format!("adding {label}"))?;
    println!(
        "added {}/{} as {}",
        report.header.category,
        report.header.label,
        report.path.display()
    );
    Ok(())
}

fn cmd_delete(session: &mut Session, label: &str) -> Result<()> {
    let identity = session.identity()?;
    match session.repo.delete(&identity, label)? {
        Some(path) => println!("deleted {label} ({})", path.display()),
        None => println!("no secret with label {label}"),
    }
    Ok(())
}

fn cmd_list(session: &mut Session, filter: Option<&str>) -> Result<()> {
    let identity = session.identity()?;
    let listing = session.repo.list(&identity, filter)?;
    listing.render(&mut std::io::stdout().lock())?;
    Ok(())
}

fn cmd_show(session: &mut Session, label: &str, field: Option<&str>) -> Result<()> {
    let identity = session.identity()?;
    session
        .repo
        .show(&identity, label, field, &mut std::io::stdout().lock())
        .with_context(|| format!("showing {label}"))?;
    Ok(())
}

fn cmd_cat(session: &mut Session, label: &str) -> Result<()> {
    let identity = session.identity()?;
    let mut stdout = std::io::stdout().lock();
    session
        .repo
        .cat(&identity, label, &mut stdout)
        .with_context(|| format!("decrypting {label}"))?;
    stdout.flush()?;
    Ok(())
}

fn cmd_clipboard(session: &mut Session, label: &str) -> Result<()> {
    let identity = session.identity()?;
    session
        .repo
        .clipboard(&identity, label, &mut SystemClipboard)
        .with_context(|| format!("copying password of {label}"))?;
    eprintln!("password of {label} copied to clipboard");
    Ok(())
}

fn cmd_decrypt(session: &mut Session, label: &str) -> Result<()> {
    let identity = session.identity()?;
    let path = session
        .repo
        .decrypt(&identity, label)
        .with_context(|| format!("decrypting {label}"))?;
    println!("decrypted {label} to {}", path.display());
    Ok(())
}

fn cmd_reencrypt(session: &mut Session, force: bool, clean: bool) -> Result<()> {
    let identity = session.identity()?;
    let report = session
        .repo
        .reencrypt(&identity, ReencryptOptions { force, clean })?;

    if report.candidates.is_empty() {
        println!("no decrypted files to re-encrypt");
        return Ok(());
    }
    if report.dry_run {
        println!("{} decrypted files can be re-encrypted:", report.candidates.len());
        for header in &report.candidates {
            println!("  {:<20} {}", header.category, header.label);
        }
        println!("run with --force to re-encrypt, --clean to also delete them");
        return Ok(());
    }

    println!("re-encrypted {} files", report.written.len());
    for path in &report.removed {
        println!("  removed {}", path.display());
    }
    Ok(())
}

fn cmd_rotate(session: &mut Session, clean: bool, piv_slot: Option<Slot>) -> Result<()> {
    // an interrupted clean may already have moved the identity file to its backup
    let identity = if clean {
        identity::load_configured(&session.config, session.token.as_mut())
    } else {
        session.identity()?
    };
    let options = RotateOptions {
        clean,
        slot: piv_slot,
    };
    let report = rotate(&session.repo, &identity, session.token.as_mut(), options)
        .context("rotating identity")?;

    if clean {
        println!(
            "removed {} old files, renamed {} rotated files",
            report.removed.len(),
            report.renamed.len()
        );
        if let Some(backup) = &report.backup {
            println!("previous identity moved to {}", backup.display());
        }
        println!("new identity installed at {}", identity.path().display());
        return Ok(());
    }

    if report.created_key {
        println!("created rotation key {}", report.rotation_key.display());
    }
    println!(
        "re-encrypted {} files ({} already done)",
        report.rewritten.len(),
        report.already_rotated
    );
    println!("run `privage rotate --clean` to finish");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use privage_secrets::DisabledToken;
    use std::fs;

    fn session(dir: &Path) -> Session {
        let config = Config {
            identity_path: dir.join(IDENTITY_FILE),
            secrets_repository_path: dir.to_path_buf(),
            ..Config::default()
        };
        identity::create_file(&config.identity_path(), &mut DisabledToken, None).unwrap();
        let repo = Repository::from_config(&config);
        Session {
            config_path: None,
            config,
            repo,
            token: Box::new(DisabledToken),
        }
    }

    fn rotated_files(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.to_string_lossy().ends_with(".rotate.age"))
            .collect()
    }

    #[test]
    fn test_rotate_clean_resumes_after_identity_backup() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        let plain = dir.path().join("a.txt");
        fs::write(&plain, b"alpha").unwrap();
        cmd_add(&mut session, "docs", "a.txt").unwrap();
        fs::remove_file(&plain).unwrap();
        cmd_rotate(&mut session, false, None).unwrap();

        // state left by a clean that stopped right after the identity backup
        let old = session.identity().unwrap();
        for entry in session.repo.entries(&old).unwrap() {
            fs::remove_file(entry.path).unwrap();
        }
        for path in rotated_files(dir.path()) {
            let name = path.file_name().unwrap().to_str().unwrap().replace(".rotate.age", ".age");
            fs::rename(&path, path.with_file_name(name)).unwrap();
        }
        let key = session.config.identity_path();
        fs::rename(&key, dir.path().join("privage-key.txt-manual.bak")).unwrap();
        assert!(session.identity().is_err());

        cmd_rotate(&mut session, true, None).unwrap();

        assert!(key.exists());
        assert!(!privage_secrets::rotate::rotation_key_path(&key).exists());
        let current = session.identity().unwrap();
        assert_eq!(session.repo.count(&current).unwrap(), 1);
        let mut out = Vec::new();
        session.repo.cat(&current, "a.txt", &mut out).unwrap();
        assert_eq!(out, b"alpha");
    }

    #[test]
    fn test_rotate_clean_without_rotation_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());

        let err = cmd_rotate(&mut session, true, None).unwrap_err();
        assert!(format!("{err:#}").contains("no rotation in progress"), "{err:#}");
        assert!(session.config.identity_path().exists());
    }
}
