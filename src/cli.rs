//! Command-line front end.
//!
//! Resolves the data root, settings and credentials, then drives the library.
//! Everything interactive (confirmations, password entry) happens here so the
//! fetch workflow only ever sees resolved values.

use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use console::Term;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::{AppPaths, Settings};
use crate::fetch::{Credentials, DepotFetcher, FetchOptions, FetchRequest};
use crate::logger;
use crate::platform::Platform;
use crate::progress::{EventSink, FetchEvent};
use crate::prompt::TerminalPrompt;
use crate::steamcmd::SteamCmd;
use crate::store::{self, VersionStore};

#[derive(Parser)]
#[command(name = "wb-rewind", version, about = "Download and keep old WorldBox builds through SteamCMD")]
pub struct Cli {
    /// Data directory (versions, settings, logs)
    #[arg(long, env = "WB_REWIND_HOME", global = true)]
    pub root: Option<PathBuf>,

    /// Log at debug level and mirror the log to stderr
    #[arg(long, global = true)]
    pub debug: bool,

    /// Print events and listings as JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download one or more manifests of a platform's depot
    Download {
        /// windows, linux, mac or a depot id
        #[arg(short, long)]
        platform: Platform,
        /// Manifest id to download (repeatable)
        #[arg(short, long = "manifest")]
        manifests: Vec<String>,
        /// File with one manifest id per line
        #[arg(long)]
        manifest_file: Option<PathBuf>,
        /// Steam account name (defaults to the saved one)
        #[arg(short, long)]
        username: Option<String>,
        /// Overwrite already downloaded versions without asking
        #[arg(short, long)]
        yes: bool,
    },

    /// Inspect or delete downloaded versions
    Versions {
        #[command(subcommand)]
        command: VersionsCommand,
    },

    /// Show depot ids and where to find manifest ids
    Platforms,

    /// Show or change saved settings
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
pub enum VersionsCommand {
    /// List downloaded versions per platform
    List,
    /// Delete one downloaded version
    Delete {
        platform: Platform,
        manifest: String,
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print the settings file and resolved paths
    Show,
    /// Save the Steam account name
    SetUsername { name: String },
    /// Save the WorldBox installation path (must exist)
    SetPath { path: PathBuf },
}

struct CliContext {
    paths: AppPaths,
    settings: Settings,
    json: bool,
}

impl CliContext {
    fn save_settings(&self) -> Result<()> {
        self.settings
            .save(&self.paths.settings_path())
            .context("failed to save settings")
    }

    fn store(&self) -> VersionStore {
        VersionStore::new(self.paths.versions_dir())
    }
}

/// Runs an already parsed command line.
pub fn execute(cli: Cli) -> Result<()> {
    let root = match cli.root {
        Some(root) => root,
        None => AppPaths::default_root()?,
    };
    let paths = AppPaths::new(root);
    paths.ensure()?;

    if let Err(e) = logger::init(&paths, cli.debug) {
        eprintln!("warning: logging disabled: {e}");
    }
    log::info!("wb-rewind {} (root {})", env!("CARGO_PKG_VERSION"), paths.root().display());

    let settings = Settings::load(&paths.settings_path())?;
    let mut ctx = CliContext {
        paths,
        settings,
        json: cli.json,
    };

    match cli.command {
        Commands::Download {
            platform,
            manifests,
            manifest_file,
            username,
            yes,
        } => download(&mut ctx, platform, manifests, manifest_file.as_deref(), username, yes),
        Commands::Versions { command } => match command {
            VersionsCommand::List => list_versions(&ctx),
            VersionsCommand::Delete {
                platform,
                manifest,
                yes,
            } => delete_version(&ctx, platform, &manifest, yes),
        },
        Commands::Platforms => platforms(&ctx),
        Commands::Config { command } => config(&mut ctx, command),
    }
}

fn download(
    ctx: &mut CliContext,
    platform: Platform,
    mut manifests: Vec<String>,
    manifest_file: Option<&Path>,
    username: Option<String>,
    yes: bool,
) -> Result<()> {
    if let Some(file) = manifest_file {
        manifests.extend(read_manifest_file(file)?);
    }
    manifests.retain(|m| !m.trim().is_empty());
    if manifests.is_empty() {
        println!("Manifest ids for {platform}: {}", platform.manifests_url());
        let m = read_line("Manifest ID: ")?;
        if m.is_empty() {
            bail!("no manifest id given");
        }
        manifests.push(m);
    }

    let store = ctx.store();
    store.ensure_layout()?;

    // Decide overwrites up front so nothing prompts while steamcmd runs.
    let mut plan: Vec<(String, bool)> = vec![];
    for m in manifests {
        let m = m.trim().to_string();
        store::validate_version_id(&m)?;
        if store.is_populated(platform, &m)? {
            if !yes
                && !confirm(&format!(
                    "Version {m} for {platform} already exists. Download again and overwrite it?"
                ))?
            {
                println!("Skipping {m}.");
                continue;
            }
            plan.push((m, true));
        } else {
            plan.push((m, false));
        }
    }
    if plan.is_empty() {
        println!("Nothing to download.");
        return Ok(());
    }

    let steamcmd = SteamCmd::locate(ctx.settings.steamcmd_path.as_deref(), ctx.paths.root())?;
    let credentials = resolve_credentials(ctx, username)?;
    let base_options = FetchOptions::from_settings(&ctx.settings);

    let json = ctx.json;
    block_on_detached(async move {
        let (events, rx) = EventSink::channel();
        let printer = tokio::spawn(print_events(rx, json));

        let cancel = CancellationToken::new();
        let on_ctrl_c = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("interrupted, stopping steamcmd");
                on_ctrl_c.cancel();
            }
        });

        let fetcher = DepotFetcher::new(steamcmd, store, events);
        let prompt = TerminalPrompt::new();
        let total = plan.len();
        let mut result = Ok(());
        for (i, (manifest, clean_target)) in plan.into_iter().enumerate() {
            if total > 1 {
                log::info!("bulk download {}/{total}: {manifest}", i + 1);
            }
            let req = FetchRequest::new(platform, manifest.as_str(), credentials.clone());
            let options = FetchOptions {
                clean_target,
                ..base_options.clone()
            };
            if let Err(e) = fetcher.fetch(&req, &options, &prompt, &cancel).await {
                result = Err(anyhow::Error::new(e)
                    .context(format!("failed to download manifest {manifest} for {platform}")));
                break;
            }
        }

        drop(fetcher);
        let _ = printer.await;
        result
    })?
}

/// Runs `fut` on a fresh runtime and shuts it down without waiting for
/// blocking tasks, such as a terminal read for a code prompt that already
/// timed out or was cancelled.
fn block_on_detached<F: Future>(fut: F) -> Result<F::Output> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let out = rt.block_on(fut);
    rt.shutdown_background();
    Ok(out)
}

fn read_manifest_file(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

fn resolve_credentials(ctx: &mut CliContext, username: Option<String>) -> Result<Credentials> {
    let username = match username.or_else(|| ctx.settings.username.clone()) {
        Some(u) => u,
        None => {
            let u = read_line("Steam username: ")?;
            if u.is_empty() {
                bail!("a Steam username is required");
            }
            if ctx.settings.set_username(&u) {
                ctx.save_settings()?;
            }
            u
        }
    };

    let term = Term::stderr();
    term.write_str("Steam password (leave empty to use cached login): ")?;
    let password = term.read_secure_line().context("failed to read password")?;

    Ok(Credentials {
        username,
        password: Some(password).filter(|p| !p.is_empty()),
    })
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<FetchEvent>, json: bool) {
    while let Some(ev) = rx.recv().await {
        if json {
            match serde_json::to_string(&ev) {
                Ok(line) => println!("{line}"),
                Err(e) => log::warn!("failed to encode event: {e}"),
            }
            continue;
        }
        match ev {
            FetchEvent::Started {
                platform,
                manifest_id,
            } => println!("==> {platform} manifest {manifest_id}"),
            FetchEvent::Output(line) => println!("{line}"),
            FetchEvent::Progress(pct) => println!("steamcmd update {pct}%"),
            FetchEvent::GuardCodeRequested { .. } => {}
            FetchEvent::DownloadPath(p) => println!("Download complete: {p}"),
            FetchEvent::Ingesting { to, .. } => println!("Moving files into {to}"),
            FetchEvent::Finished { path } => println!("Saved version to: {path}"),
            // Returned to `execute` as well; printed once by `run`.
            FetchEvent::Error(_) => {}
        }
    }
}

fn list_versions(ctx: &CliContext) -> Result<()> {
    let listed = ctx.store().list()?;
    if ctx.json {
        println!("{}", serde_json::to_string(&listed)?);
        return Ok(());
    }
    if listed.is_empty() {
        println!("No versions downloaded yet.");
        return Ok(());
    }
    for entry in listed {
        println!("{}:", entry.platform);
        if entry.versions.is_empty() {
            println!("  (none)");
        }
        for v in entry.versions {
            println!("  {v}");
        }
    }
    Ok(())
}

fn delete_version(ctx: &CliContext, platform: Platform, manifest: &str, yes: bool) -> Result<()> {
    let store = ctx.store();
    store::validate_version_id(manifest)?;
    if !yes && !confirm(&format!("Delete version {manifest} for {platform}?"))? {
        println!("Delete cancelled.");
        return Ok(());
    }
    store.remove(platform, manifest)?;
    println!("Deleted {platform} version {manifest}.");
    Ok(())
}

#[derive(Serialize)]
struct PlatformInfo {
    platform: Platform,
    depot_id: &'static str,
    manifests_url: String,
}

fn platforms(ctx: &CliContext) -> Result<()> {
    let infos: Vec<PlatformInfo> = Platform::ALL
        .into_iter()
        .map(|p| PlatformInfo {
            platform: p,
            depot_id: p.depot_id(),
            manifests_url: p.manifests_url(),
        })
        .collect();
    if ctx.json {
        println!("{}", serde_json::to_string(&infos)?);
        return Ok(());
    }
    for i in infos {
        println!("{:<8} depot {}  {}", i.platform.to_string(), i.depot_id, i.manifests_url);
    }
    Ok(())
}

fn config(ctx: &mut CliContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            if ctx.json {
                println!("{}", serde_json::to_string(&ctx.settings)?);
            } else {
                println!("root:     {}", ctx.paths.root().display());
                println!("settings: {}", ctx.paths.settings_path().display());
                println!("{}", serde_json::to_string_pretty(&ctx.settings)?);
            }
        }
        ConfigCommand::SetUsername { name } => {
            if ctx.settings.set_username(&name) {
                ctx.save_settings()?;
                println!("Username saved.");
            } else {
                println!("Username unchanged.");
            }
        }
        ConfigCommand::SetPath { path } => {
            if ctx.settings.set_installation_path(&path)? {
                ctx.save_settings()?;
                println!("Installation path saved: {}", path.display());
            } else {
                println!("Installation path unchanged.");
            }
        }
    }
    Ok(())
}

fn read_line(prompt: &str) -> Result<String> {
    let term = Term::stderr();
    term.write_str(prompt)?;
    let line = term.read_line().context("failed to read user input")?;
    Ok(line.trim().to_string())
}

/// Empty input means no.
fn confirm(prompt: &str) -> Result<bool> {
    let answer = read_line(&format!("{prompt} [y/N]: "))?;
    Ok(matches!(answer.to_lowercase().as_str(), "y" | "yes"))
}
