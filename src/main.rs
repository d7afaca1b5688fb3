//! secretsweep — hard-coded secret scanner CLI.
//!
//! Entry point and error handling boundary. Uses `anyhow` for
//! ergonomic error propagation and user-facing messages.

mod cli;

use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use secretsweep::client::Client;
use secretsweep::config::Config;
use secretsweep::constants::ENV_LOG;
use secretsweep::download;
use secretsweep::env::Env;
use secretsweep::output::DiscoveryReport;
use secretsweep::store::SqliteStore;

use cli::args::{Cli, Command, GetDiscoveriesArgs, ScanFlags, UpdateDiscoveriesArgs};

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    }
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let mut env = Env::real();
    if let Some(path) = &cli.dotenv {
        env = env
            .with_dotenv(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
    }
    let cwd = std::env::current_dir().ok();
    let mut config = Config::load(cwd.as_deref(), &env).context("failed to load configuration")?;
    if let Some(path) = &cli.sqlite {
        config.database.sqlite = Some(path.clone());
    }

    match cli.command {
        Command::Download(args) => {
            let dir = config.models_dir();
            let timeout = config.scanner_config().clone_timeout;
            let files = download::download_model(&env, &args.model, &dir, timeout)
                .await
                .with_context(|| format!("failed to download model '{}'", args.model))?;
            eprintln!(
                "  {} {} ({files} files) → {}",
                "✔".green().bold(),
                args.model.bold(),
                dir.display()
            );
            Ok(0)
        }
        command => {
            let client = open_client(&config).await?;
            run_command(&client, &mut config, command).await
        }
    }
}

async fn run_command(client: &Client, config: &mut Config, command: Command) -> Result<i32> {
    let cancel = CancellationToken::new();
    let guard = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            guard.cancel();
        }
    });

    match command {
        Command::AddRules(args) => {
            let ids = client
                .add_rules_from_file(&args.file)
                .await
                .with_context(|| format!("failed to load rules from {}", args.file.display()))?;
            eprintln!("  {} {} rule(s) added", "✔".green().bold(), ids.len());
            if let Some(path) = &args.export {
                let n = client
                    .export_rules(path, None)
                    .await
                    .with_context(|| format!("failed to export rules to {}", path.display()))?;
                eprintln!("  {} {n} rule(s) exported to {}", "✔".green().bold(), path.display());
            }
            Ok(0)
        }
        Command::Scan(args) => {
            let client = configured(client, config, &args.flags);
            let ids = client.scan(&args.repo_url, &args.options(), &cancel).await?;
            Ok(report_scan(&args.repo_url, ids.len()))
        }
        Command::ScanWiki(args) => {
            let client = configured(client, config, &args.flags);
            let ids = client.scan_wiki(&args.repo_url, &args.options(), &cancel).await?;
            Ok(report_scan(&args.repo_url, ids.len()))
        }
        Command::ScanPath(args) => {
            let client = configured(client, config, &args.flags);
            let ids = client.scan_path(&args.path, &args.options(), &cancel).await?;
            Ok(report_scan(&args.path.display().to_string(), ids.len()))
        }
        Command::ScanSnapshot(args) => {
            let client = configured(client, config, &args.flags);
            let ids = client
                .scan_snapshot(&args.repo_url, &args.branch, &args.options(), &cancel)
                .await?;
            Ok(report_scan(&args.repo_url, ids.len()))
        }
        Command::ScanPr(args) => {
            let client = configured(client, config, &args.flags);
            let ids = client
                .scan_pull_request(&args.repo_url, args.pr, &args.flags.options(), &cancel)
                .await?;
            Ok(report_scan(&args.repo_url, ids.len()))
        }
        Command::ScanUser(args) => {
            let client = configured(client, config, &args.flags);
            let results = client.scan_user(&args.user, &args.flags.options(), &cancel).await?;
            let mut total = 0;
            for (url, count) in &results {
                report_scan(url, *count);
                total += count;
            }
            Ok(exit_code(total))
        }
        Command::GetDiscoveries(args) => {
            println!("{}", list_discoveries(client, &args).await);
            Ok(0)
        }
        Command::UpdateDiscoveries(args) => {
            let client = with_similarity(client, config, &args)?;
            let state = args.state.to_string();
            if !client.update_discoveries(&args.ids, &state).await {
                anyhow::bail!("failed to update discoveries {:?}", args.ids);
            }
            eprintln!(
                "  {} {} discover{} → {state}",
                "✔".green().bold(),
                args.ids.len(),
                if args.ids.len() == 1 { "y" } else { "ies" }
            );
            Ok(0)
        }
        Command::Hook(args) => Ok(client
            .pre_commit(&args.path, &args.options(), args.no_interaction)
            .await?),
        // Runs before a store is opened.
        Command::Download(_) => Ok(0),
    }
}

/// The base client with the scan-family CLI flags layered over `config`.
fn configured(client: &Client, config: &mut Config, flags: &ScanFlags) -> Client {
    if let Some(token) = &flags.git_token {
        config.hosting.git_token = Some(token.clone());
    }
    if let Some(user) = &flags.git_username {
        config.hosting.git_username = Some(user.clone());
    }
    if let Some(endpoint) = &flags.api_endpoint {
        config.hosting.api_endpoint = endpoint.clone();
    }
    let client = client.clone().with_scanner_config(config.scanner_config());
    if flags.similarity {
        client.with_embedder(config.similarity.embedder())
    } else {
        client
    }
}

/// The base client, propagating to similar snippets when asked to.
fn with_similarity(client: &Client, config: &Config, args: &UpdateDiscoveriesArgs) -> Result<Client> {
    if !args.similarity {
        return Ok(client.clone());
    }
    let threshold = args.threshold.unwrap_or(config.similarity.threshold);
    client
        .clone()
        .with_embedder(config.similarity.embedder())
        .with_similarity(threshold)
        .with_context(|| format!("invalid similarity threshold {threshold}"))
}

async fn open_client(config: &Config) -> Result<Client> {
    let client = if let Some(path) = &config.database.sqlite {
        let store = SqliteStore::new(path).with_context(|| format!("failed to open {}", path.display()))?;
        Client::new(Arc::new(store))
    } else {
        open_networked(config).await?
    };
    Ok(client
        .with_scanner_config(config.scanner_config())
        .with_models(config.model_context()))
}

#[cfg(feature = "postgres")]
async fn open_networked(config: &Config) -> Result<Client> {
    use secretsweep::store::PostgresStore;

    let settings = config
        .database
        .pg_settings()
        .ok_or(secretsweep::config::ConfigError::NoDatabase)?;
    let store = PostgresStore::connect(&settings)
        .await
        .with_context(|| format!("failed to connect to {}:{}", settings.host, settings.port))?;
    Ok(Client::new(Arc::new(store)))
}

#[cfg(not(feature = "postgres"))]
async fn open_networked(_config: &Config) -> Result<Client> {
    Err(secretsweep::config::ConfigError::NoDatabase.into())
}

async fn list_discoveries(client: &Client, args: &GetDiscoveriesArgs) -> String {
    let (total, discoveries) = client.get_discoveries(&args.repo_url, &args.query()).await;
    let files = client.get_files_summary(&args.repo_url).await;
    let report = DiscoveryReport {
        repo_url: args.repo_url.clone(),
        total,
        discoveries,
        files,
    };
    args.format().render(&report)
}

fn report_scan(target: &str, surviving: usize) -> i32 {
    if surviving == 0 {
        eprintln!("  {} {} clean", "✔".green().bold(), target.bold());
    } else {
        eprintln!(
            "  {} {} {surviving} discover{}",
            "✖".red().bold(),
            target.bold(),
            if surviving == 1 { "y" } else { "ies" }
        );
    }
    exit_code(surviving)
}

/// Surviving discoveries as a process exit code, saturating at 255.
fn exit_code(surviving: usize) -> i32 {
    surviving.min(255) as i32
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
