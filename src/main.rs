use std::env;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use secrecy::{ExposeSecret, SecretString};
use solana_sdk::signer::Signer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

mod amount;
mod app;
mod config;
mod console;
mod error;
mod flow;
mod holdings;
mod journal;
mod network;
mod pending;
mod store;
mod swap;
mod tx;
mod util;
mod wallet;

fn main() -> Result<()> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    let runtime = builder.build().context("build tokio runtime")?;
    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    let cli = parse_cli_args()?;
    if let Err(err) = util::paths::ensure_data_dir_exists() {
        eprintln!("Failed to create data dir: {err}");
    }
    init_tracing(cli.verbose);

    match cli.mode {
        CliMode::ListUnconfirmed => list_unconfirmed(),
        CliMode::ImportWallet {
            user_id,
            display_name,
        } => {
            let cfg = load_config(&cli.config_path)?;
            import_wallet(&cfg, &user_id, display_name)
        }
        CliMode::Console { user_id } => {
            let cfg = load_config(&cli.config_path)?;
            app::run(cfg, &user_id).await
        }
    }
}

fn load_config(path: &Path) -> Result<config::Config> {
    if !path.exists() {
        return Err(anyhow!(
            "config file {} not found; pass -f /path/to/config.yml",
            path.display()
        ));
    }
    let cfg = config::Config::load_from_path(path)?;
    util::logging::init_redactions(cfg.secret_values());
    Ok(cfg)
}

fn import_wallet(cfg: &config::Config, user_id: &str, display_name: Option<String>) -> Result<()> {
    let secret = read_private_key()?;
    let keypair = wallet::parse_base58_keypair(secret.expose_secret())?;
    let vault = wallet::PassphraseVault::new(cfg.account.encryption_key.clone());
    let encrypted_key = vault.encrypt(&keypair)?;
    let wallet_address = keypair.pubkey().to_string();

    let users = store::FileUserStore::new(cfg.users_path()?);
    users.upsert(store::User {
        id: user_id.to_string(),
        wallet_address: wallet_address.clone(),
        encrypted_key,
        display_name,
    })?;
    tracing::info!(event = "wallet_imported", user = %user_id, wallet = %wallet_address);
    println!("Imported wallet {wallet_address} for user {user_id}");
    Ok(())
}

fn read_private_key() -> Result<SecretString> {
    if let Ok(value) = env::var("SELLFLOW_IMPORT_PRIVATE_KEY") {
        if !value.trim().is_empty() {
            return Ok(SecretString::new(value));
        }
    }
    eprint!("Base58 private key: ");
    std::io::stderr().flush().ok();
    let key = rpassword::read_password().context("read private key")?;
    if key.trim().is_empty() {
        return Err(anyhow!("private key cannot be empty"));
    }
    Ok(SecretString::new(key))
}

fn list_unconfirmed() -> Result<()> {
    let path = util::paths::default_journal_path()?;
    let entries = journal::unresolved_entries(&path)?;
    if entries.is_empty() {
        println!("No unconfirmed transactions in {}", path.display());
        return Ok(());
    }
    for entry in entries {
        println!(
            "{}  {:<11}  {}  {} -> {}  amount={}",
            entry.at,
            format!("{:?}", entry.state).to_lowercase(),
            entry.signature,
            entry.input_mint,
            entry.output_mint,
            entry.amount_native
        );
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum CliMode {
    Console {
        user_id: String,
    },
    ImportWallet {
        user_id: String,
        display_name: Option<String>,
    },
    ListUnconfirmed,
}

#[derive(Clone, Debug)]
struct CliArgs {
    config_path: PathBuf,
    verbose: bool,
    mode: CliMode,
}

#[derive(Clone, Debug, Parser)]
#[command(
    name = "sellflow",
    version,
    about = "Interactive Solana token sells through the Jupiter Ultra swap API."
)]
struct RawCliArgs {
    #[arg(
        short = 'f',
        long = "config",
        value_name = "path",
        env = "SELLFLOW_CONFIG_PATH"
    )]
    config_path: Option<PathBuf>,
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
    #[arg(long = "user", value_name = "id")]
    user: Option<String>,
    #[arg(long = "import-wallet", value_name = "id")]
    import_wallet: Option<String>,
    #[arg(long = "display-name", value_name = "name")]
    display_name: Option<String>,
    #[arg(long = "list-unconfirmed")]
    list_unconfirmed: bool,
}

fn parse_cli_args() -> Result<CliArgs> {
    normalize_cli_args(RawCliArgs::parse())
}

#[cfg(test)]
fn parse_cli_args_from<I, T>(args: I) -> Result<CliArgs>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let raw = RawCliArgs::try_parse_from(args).map_err(|err| anyhow!(err.to_string()))?;
    normalize_cli_args(raw)
}

fn normalize_cli_args(raw: RawCliArgs) -> Result<CliArgs> {
    let selected = [
        raw.user.is_some(),
        raw.import_wallet.is_some(),
        raw.list_unconfirmed,
    ]
    .iter()
    .filter(|flag| **flag)
    .count();
    if selected > 1 {
        return Err(anyhow!(
            "--user, --import-wallet and --list-unconfirmed are mutually exclusive"
        ));
    }
    if raw.display_name.is_some() && raw.import_wallet.is_none() {
        return Err(anyhow!("--display-name requires --import-wallet"));
    }

    let mode = if raw.list_unconfirmed {
        CliMode::ListUnconfirmed
    } else if let Some(user_id) = raw.import_wallet {
        CliMode::ImportWallet {
            user_id: non_empty_id(user_id, "--import-wallet")?,
            display_name: raw.display_name,
        }
    } else if let Some(user_id) = raw.user {
        CliMode::Console {
            user_id: non_empty_id(user_id, "--user")?,
        }
    } else {
        return Err(anyhow!(
            "one of --user <id>, --import-wallet <id> or --list-unconfirmed is required"
        ));
    };

    let config_path = match raw.config_path {
        Some(path) => path,
        None => util::paths::default_config_path()?,
    };
    Ok(CliArgs {
        config_path,
        verbose: raw.verbose,
        mode,
    })
}

fn non_empty_id(value: String, flag: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("{flag} requires a non-empty user id"));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod cli_tests {
    use super::*;

    #[test]
    fn parse_console_mode() {
        let cli = parse_cli_args_from(["sellflow", "--user", "42", "-f", "config.yml"])
            .expect("parse cli args");
        assert_eq!(
            cli.mode,
            CliMode::Console {
                user_id: "42".to_string()
            }
        );
        assert_eq!(cli.config_path, PathBuf::from("config.yml"));
    }

    #[test]
    fn parse_import_wallet_with_display_name() {
        let cli = parse_cli_args_from([
            "sellflow",
            "--import-wallet",
            "42",
            "--display-name",
            "alice",
            "-f",
            "config.yml",
        ])
        .expect("parse cli args");
        assert_eq!(
            cli.mode,
            CliMode::ImportWallet {
                user_id: "42".to_string(),
                display_name: Some("alice".to_string()),
            }
        );
    }

    #[test]
    fn parse_list_unconfirmed() {
        let cli = parse_cli_args_from(["sellflow", "--list-unconfirmed", "-f", "config.yml"])
            .expect("parse cli args");
        assert_eq!(cli.mode, CliMode::ListUnconfirmed);
    }

    #[test]
    fn parse_requires_a_mode() {
        let err = parse_cli_args_from(["sellflow", "-f", "config.yml"]).expect_err("should fail");
        assert!(err.to_string().contains("is required"));
    }

    #[test]
    fn parse_rejects_conflicting_modes() {
        let err = parse_cli_args_from(["sellflow", "--user", "42", "--list-unconfirmed"])
            .expect_err("should fail");
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn parse_rejects_display_name_without_import() {
        let err = parse_cli_args_from(["sellflow", "--user", "42", "--display-name", "bob"])
            .expect_err("should fail");
        assert!(err.to_string().contains("--display-name requires"));
    }

    #[test]
    fn parse_rejects_blank_user_id() {
        let err = parse_cli_args_from(["sellflow", "--user", "  ", "-f", "config.yml"])
            .expect_err("should fail");
        assert!(err.to_string().contains("non-empty user id"));
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "info,sellflow=debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let error_log_path = match util::paths::default_error_log_path() {
        Ok(path) => Some(path),
        Err(err) => {
            eprintln!("Failed to resolve error log path: {err}");
            None
        }
    };

    install_error_log_panic_hook(error_log_path.clone());

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(move || {
            let writer: Box<dyn Write + Send> = match error_log_path.as_ref() {
                Some(path) => match OpenOptions::new().create(true).append(true).open(path) {
                    Ok(file) => Box::new(file),
                    Err(err) => {
                        eprintln!("Failed to open error log {}: {err}", path.display());
                        Box::new(std::io::sink())
                    }
                },
                None => Box::new(std::io::sink()),
            };
            util::logging::RedactingWriter::new(writer)
        })
        .with_ansi(false)
        .with_filter(tracing_subscriber::filter::LevelFilter::WARN);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(|| util::logging::RedactingWriter::new(std::io::stderr()));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(filter)
        .init();
}

fn install_error_log_panic_hook(error_log_path: Option<PathBuf>) {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        if let Some(path) = error_log_path.as_ref() {
            if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
                let message = panic_message(info).replace('\n', "\\n");
                let mut line = format!("utc={} panic message={message}", utc_timestamp());
                if let Some(location) = info.location() {
                    line.push_str(&format!(
                        " location={}:{}",
                        location.file(),
                        location.line()
                    ));
                }
                let scrubbed = util::logging::scrub_sensitive(&line);
                let _ = writeln!(file, "{scrubbed}");
            }
        }
        default_hook(info);
    }));
}

fn utc_timestamp() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "0000-00-00T00:00:00Z".to_string())
}

fn panic_message(info: &std::panic::PanicHookInfo<'_>) -> String {
    if let Some(message) = info.payload().downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = info.payload().downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
