use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Client;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "vanish", about = "Vanish: self-destructing secret links", version)]
struct Cli {
    /// Vanish server URL (default: http://localhost:8080 or $VANISH_SERVER)
    #[arg(long, env = "VANISH_SERVER", default_value = "http://localhost:8080")]
    server: String,

    /// Data directory for local commands (default: $VANISH_DATA_DIR or the platform data dir)
    #[arg(long, env = "VANISH_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Vanish HTTP server
    Serve {
        /// Port to listen on (default: $VANISH_PORT or 8080)
        #[arg(long, env = "VANISH_PORT", default_value = "8080")]
        port: u16,
        /// Host to bind (default: $VANISH_HOST or 0.0.0.0)
        #[arg(long, env = "VANISH_HOST", default_value = "0.0.0.0")]
        host: String,
    },
    /// Run one sweep pass against the local store (server must be stopped)
    Sweep,
    /// Destroy a link's secret sections now
    Expire {
        /// Link identifier
        id: String,
    },
    /// Destroy all of a link's content now
    Kill {
        /// Link identifier
        id: String,
    },
    /// Import a directory of legacy `<uuid>.json` link files
    Import {
        /// Directory holding the legacy files
        dir: PathBuf,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.command {
        Commands::Serve { .. } => "info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("VANISH_LOG_LEVEL")
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Serve { port, host } => cmd_serve(host, port, cli.data_dir).await,
        Commands::Sweep => cmd_sweep(cli.data_dir.as_ref()),
        Commands::Expire { id } => cmd_control(&cli.server, &id, "expire").await,
        Commands::Kill { id } => cmd_control(&cli.server, &id, "kill").await,
        Commands::Import { dir } => cmd_import(cli.data_dir.as_ref(), &dir),
    }
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_serve(host: String, port: u16, data_dir: Option<PathBuf>) -> Result<()> {
    let cfg = vanish_server::ServerConfig {
        host,
        port,
        data_dir,
        ..Default::default()
    };

    vanish_server::run(cfg).await
}

fn open_local(data_dir: Option<&PathBuf>) -> Result<vanish_server::Vault> {
    let dir = vanish_server::resolve_data_dir(data_dir)?;
    vanish_server::open_vault(&dir)
        .with_context(|| format!("open vault in {} (is the server running?)", dir.display()))
}

fn cmd_sweep(data_dir: Option<&PathBuf>) -> Result<()> {
    let vault = open_local(data_dir)?;
    let report = vault.sweep().context("sweep")?;
    println!(
        "moved {} record(s) to trash ({} scanned, {} expired, {} failed)",
        report.trashed, report.scanned, report.expired, report.failed
    );
    if report.failed > 0 {
        anyhow::bail!("{} record(s) could not be swept", report.failed);
    }
    Ok(())
}

async fn cmd_control(server: &str, id: &str, action: &str) -> Result<()> {
    let client = Client::new();
    let resp = client
        .post(format!("{}/api/expire", server.trim_end_matches('/')))
        .json(&serde_json::json!({ "uuid": id, "action": action }))
        .send()
        .await
        .context("HTTP request failed")?;

    let status = resp.status();
    let json: Value = resp.json().await.unwrap_or_default();

    if status.is_success() {
        let outcome = json["outcome"].as_str().unwrap_or("ok");
        println!("✓ {id}: {}", outcome.replace('_', " "));
        Ok(())
    } else {
        anyhow::bail!(
            "server returned {status}: {}",
            json["error"].as_str().unwrap_or("")
        );
    }
}

fn cmd_import(data_dir: Option<&PathBuf>, dir: &PathBuf) -> Result<()> {
    let vault = open_local(data_dir)?;
    let report = vanish_server::import::import_dir(&vault, dir)?;
    println!(
        "imported {} record(s); skipped {} existing, {} legacy-format, {} with unsupported password hashes; {} failed",
        report.imported,
        report.existing,
        report.legacy_shape,
        report.unsupported_password,
        report.failed
    );
    Ok(())
}
