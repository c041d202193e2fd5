mod console;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};
use tracker_backup::{
    clock::SystemClock,
    config::BackupConfig,
    engine::BackupEngine,
    manifest::BackupEntry,
    restore::{RestoreMode, RestoreReport},
    scheduler::{AutoBackupScheduler, TriggerOutcome},
    service::{BackupService, RestoreOutcome},
    state::{JsonStateFile, LocalCollection, LocalState, StateStore},
    store::{FsStore, RemoteStore},
    webdav::{WebDavConfig, WebDavCredentials, WebDavStore},
};

use crate::config::{PASSWORD_ENV, TrackerConfig, is_url};
use console::ConsoleInteraction;

const LATEST: &str = "latest";

#[derive(Parser, Debug)]
#[command(name = "tracker")]
#[command(author, version, about = "Item tracker backup and restore", long_about = None)]
pub struct Cli {
    /// Backup target: a WebDAV URL or a local directory. Default: from config
    #[arg(short, long, env = "TRACKER_TARGET", global = true)]
    pub target: Option<String>,

    /// Remote backup root directory.
    /// Default: from config, `TRACKER_BACKUP_ROOT` or "TrackerBackups"
    #[arg(long, global = true)]
    pub root: Option<String>,

    /// Local state file holding the item collection
    #[arg(long, env = "TRACKER_STATE", global = true)]
    pub state: Option<PathBuf>,

    /// Config file path
    #[arg(long, env = "TRACKER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Answer yes to confirmation prompts
    #[arg(short = 'y', long, global = true)]
    pub yes: bool,

    /// Print machine-readable output where applicable
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbose mode (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Color mode for log output
    #[arg(long, value_enum, default_value_t = ColorArg::Auto, global = true)]
    pub color: ColorArg,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Commit a snapshot of the local collection to the backup target
    Backup {
        /// Leave item images out of the snapshot
        #[arg(long)]
        no_images: bool,
    },

    /// List restorable snapshots, newest first
    Snapshots,

    /// Restore a snapshot into the local collection
    Restore {
        /// Snapshot id, or "latest"
        #[arg(default_value = LATEST)]
        id: String,

        #[arg(short, long, value_enum, default_value_t = ModeArg::Merge)]
        mode: ModeArg,
    },

    /// Back up unless a backup was already made today
    Auto,

    /// Write the local collection to a zip or csv file
    Export {
        /// Output file (`.csv` for CSV, anything else zip) or directory.
        /// Default: current directory
        path: Option<PathBuf>,
    },

    /// Load a zip or csv file into the local collection
    Import {
        path: PathBuf,

        #[arg(short, long, value_enum, default_value_t = ModeArg::Merge)]
        mode: ModeArg,
    },

    /// Show configuration, local collection and remote snapshots
    Status,

    /// Show or change the saved configuration
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the saved configuration
    Show,

    /// Update saved settings; omitted settings are unchanged
    Set {
        #[arg(long)]
        target: Option<String>,

        /// WebDAV username. The password is read from `TRACKER_WEBDAV_PASSWORD`
        #[arg(long)]
        username: Option<String>,

        #[arg(long)]
        root: Option<String>,

        /// Number of snapshots to keep
        #[arg(long)]
        retention: Option<usize>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum ModeArg {
    Overwrite,
    Merge,
}

impl From<ModeArg> for RestoreMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Overwrite => Self::Overwrite,
            ModeArg::Merge => Self::Merge,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum ColorArg {
    Auto,
    Always,
    Never,
}

pub fn emit_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    println!("{text}");
    Ok(())
}

struct AppContext {
    json: bool,
    config: TrackerConfig,
    target: Option<String>,
    state_file: JsonStateFile,
    state: LocalState,
    service: BackupService,
    webdav: Option<Arc<WebDavStore>>,
}

impl AppContext {
    fn engine(&self) -> Result<&BackupEngine> {
        self.service
            .engine()
            .ok_or_else(|| {
                anyhow!("no backup target configured: use --target or `tracker config set`")
            })
    }

    /// Write the collection back to the state file.
    async fn save_items(&mut self) -> Result<()> {
        self.state.items = self.service.collection().snapshot();
        self.state_file
            .save(&self.state)
            .await
            .with_context(|| format!("save {}", self.state_file.path().display()))
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(TrackerConfig::path);
    if let Commands::Config(args) = &cli.command {
        return handle_config(cli.json, &config_path, &args.command);
    }

    let mut ctx = build_context(&cli, &config_path).await?;
    let result = match cli.command {
        Commands::Backup { .. } => handle_backup(&ctx).await,
        Commands::Snapshots => handle_snapshots(&ctx).await,
        Commands::Restore { id, mode } => handle_restore(&mut ctx, &id, mode.into()).await,
        Commands::Auto => handle_auto(&ctx).await,
        Commands::Export { path } => handle_export(&ctx, path).await,
        Commands::Import { path, mode } => handle_import(&mut ctx, &path, mode.into()).await,
        Commands::Status => handle_status(&ctx).await,
        Commands::Config(_) => unreachable!("handled above"),
    };
    if let Some(webdav) = &ctx.webdav {
        info!("webdav {}", webdav.metrics_snapshot());
    }
    result
}

async fn build_context(cli: &Cli, config_path: &Path) -> Result<AppContext> {
    let config = TrackerConfig::load_from(config_path)?;
    let state_path = cli
        .state
        .clone()
        .unwrap_or_else(TrackerConfig::default_state_path);
    let state_file = JsonStateFile::new(state_path);
    let state = state_file
        .load()
        .await
        .with_context(|| format!("load {}", state_file.path().display()))?;
    let collection = LocalCollection::new(state.items.clone());

    let target = cli.target.clone().or_else(|| config.target.clone());
    let mut webdav = None;
    let engine = match &target {
        Some(target) => {
            let store: Arc<dyn RemoteStore> = if is_url(target) {
                let store = Arc::new(build_webdav(target, config.username.as_deref())?);
                webdav = Some(store.clone());
                store
            } else {
                Arc::new(FsStore::new(target))
            };
            Some(BackupEngine::new(store, backup_config(cli, &config, &state)))
        }
        None => None,
    };
    debug!(target = ?target, items = collection.len(), "context ready");

    let no_images = matches!(cli.command, Commands::Backup { no_images: true });
    let ui = Arc::new(ConsoleInteraction::new(cli.yes));
    let service = BackupService::new(engine, collection, ui)
        .with_embed_images(state.embed_images && !no_images);
    Ok(AppContext {
        json: cli.json,
        config,
        target,
        state_file,
        state,
        service,
        webdav,
    })
}

fn build_webdav(url: &str, username: Option<&str>) -> Result<WebDavStore> {
    let mut config = WebDavConfig::new(url);
    if let Some(username) = username {
        let password = TrackerConfig::password()
            .ok_or_else(|| anyhow!("{PASSWORD_ENV} is not set for WebDAV user {username}"))?;
        config = config.credentials(WebDavCredentials::new(username, password));
    }
    WebDavStore::new(config).context("create WebDAV client")
}

fn backup_config(cli: &Cli, config: &TrackerConfig, state: &LocalState) -> BackupConfig {
    let mut backup = BackupConfig::default().embed_images(state.embed_images);
    if let Some(root) = cli.root.clone().or_else(|| config.root.clone()) {
        backup = backup.root(root);
    }
    if let Some(retention) = config.retention.or(state.retention) {
        backup = backup.retention(retention);
    }
    backup
}

async fn handle_backup(ctx: &AppContext) -> Result<()> {
    ctx.engine()?;
    let items = ctx.service.collection().len();
    let report = ctx.service.backup_now().await;
    let Some(report) = report else {
        bail!("no backup was made");
    };

    if ctx.json {
        emit_json(&json!({
            "snapshot": report.entry,
            "items": items,
            "pruned": report.pruned.iter().map(|e| &e.id).collect::<Vec<_>>(),
            "pruneFailures": report.prune_failures,
            "historyLen": report.history_len,
        }))?;
    } else {
        println!(
            "snapshot={} items={} size={} pruned={}",
            report.entry.id,
            items,
            report.entry.size.unwrap_or_default(),
            report.pruned.len()
        );
    }
    Ok(())
}

async fn handle_snapshots(ctx: &AppContext) -> Result<()> {
    let entries = ctx.engine()?.list_restorable().await;
    if ctx.json {
        return emit_json(&entries);
    }
    if entries.is_empty() {
        println!("no restorable snapshots");
    }
    for entry in &entries {
        print_entry(entry);
    }
    Ok(())
}

fn print_entry(entry: &BackupEntry) {
    let size = entry
        .size
        .map_or_else(|| "-".to_string(), |size| size.to_string());
    println!("{}  {}  {size}", entry.id, entry.created_at);
}

async fn handle_restore(ctx: &mut AppContext, id: &str, mode: RestoreMode) -> Result<()> {
    let id = if id == LATEST {
        ctx.engine()?
            .list_restorable()
            .await
            .into_iter()
            .next()
            .map(|entry| entry.id)
            .ok_or_else(|| anyhow!("no restorable snapshot"))?
    } else {
        ctx.engine()?;
        id.to_string()
    };
    let outcome = ctx.service.restore(&id, mode).await;
    finish_restore(ctx, outcome, &id).await
}

async fn handle_import(ctx: &mut AppContext, path: &Path, mode: RestoreMode) -> Result<()> {
    let outcome = ctx.service.import(path, mode).await;
    finish_restore(ctx, outcome, &path.display().to_string()).await
}

async fn finish_restore(
    ctx: &mut AppContext,
    outcome: RestoreOutcome,
    source: &str,
) -> Result<()> {
    let report: RestoreReport = match outcome {
        RestoreOutcome::Restored(report) => report,
        RestoreOutcome::Cancelled => {
            if ctx.json {
                emit_json(&json!({ "source": source, "cancelled": true }))?;
            }
            return Ok(());
        }
        RestoreOutcome::Failed(err) => {
            return Err(anyhow::Error::new(err).context(format!("restore from {source} failed")));
        }
    };
    ctx.save_items().await?;
    if ctx.json {
        emit_json(&json!({ "source": source, "report": report }))?;
    } else {
        println!(
            "source={source} mode={} restored={} total={}",
            report.mode, report.restored, report.total
        );
    }
    Ok(())
}

async fn handle_auto(ctx: &AppContext) -> Result<()> {
    let engine = ctx.engine()?.clone();
    let scheduler = AutoBackupScheduler::new(
        Some(engine),
        ctx.service.collection().clone(),
        Arc::new(SystemClock),
    )
    .with_state_store(Arc::new(ctx.state_file.clone()))
    .with_last_backup_date(ctx.state.last_backup_date);

    match scheduler.trigger().await {
        TriggerOutcome::Completed(report) => {
            if ctx.json {
                emit_json(&json!({ "outcome": "completed", "snapshot": report.entry }))?;
            } else {
                println!("snapshot={}", report.entry.id);
            }
            Ok(())
        }
        TriggerOutcome::Skipped(reason) => {
            if ctx.json {
                emit_json(&json!({ "outcome": "skipped", "reason": reason.to_string() }))?;
            } else {
                println!("skipped: {reason}");
            }
            Ok(())
        }
        TriggerOutcome::Failed(err) => Err(anyhow::Error::new(err).context("auto backup failed")),
    }
}

async fn handle_export(ctx: &AppContext, path: Option<PathBuf>) -> Result<()> {
    let path = match path {
        Some(path) => path,
        None => std::env::current_dir().context("current directory")?,
    };
    let written = ctx.service.export(&path).await?;
    if ctx.json {
        emit_json(&json!({
            "path": written,
            "items": ctx.service.collection().len(),
        }))?;
    } else {
        println!("path={} items={}", written.display(), ctx.service.collection().len());
    }
    Ok(())
}

async fn handle_status(ctx: &AppContext) -> Result<()> {
    let snapshots = match ctx.service.engine() {
        Some(engine) => Some(engine.list_restorable().await),
        None => None,
    };
    let backup = ctx.service.engine().map(BackupEngine::config);
    if ctx.json {
        return emit_json(&json!({
            "target": ctx.target,
            "root": backup.map(|c| &c.root),
            "retention": backup.map(|c| c.retention),
            "stateFile": ctx.state_file.path(),
            "items": ctx.service.collection().len(),
            "embedImages": ctx.state.embed_images,
            "lastBackupDate": ctx.state.last_backup_date,
            "snapshots": snapshots,
        }));
    }

    println!("target:      {}", ctx.target.as_deref().unwrap_or("(not configured)"));
    if let Some(backup) = backup {
        println!("root:        {}", backup.root);
        println!("retention:   {}", backup.retention);
    }
    println!("state file:  {}", ctx.state_file.path().display());
    println!("items:       {}", ctx.service.collection().len());
    println!(
        "last backup: {}",
        ctx.state
            .last_backup_date
            .map_or_else(|| "never".to_string(), |d| d.to_string())
    );
    if let Some(user) = &ctx.config.username {
        println!("user:        {user}");
    }
    if let Some(snapshots) = snapshots {
        println!("snapshots:   {}", snapshots.len());
        for entry in &snapshots {
            print!("  ");
            print_entry(entry);
        }
    }
    Ok(())
}

fn handle_config(json: bool, path: &Path, command: &ConfigCommands) -> Result<()> {
    let mut config = TrackerConfig::load_from(path)?;
    match command {
        ConfigCommands::Show => {}
        ConfigCommands::Set {
            target,
            username,
            root,
            retention,
        } => {
            if *retention == Some(0) {
                bail!("retention must be at least 1");
            }
            if target.is_some() {
                config.target.clone_from(target);
            }
            if username.is_some() {
                config.username.clone_from(username);
            }
            if root.is_some() {
                config.root.clone_from(root);
            }
            if retention.is_some() {
                config.retention = *retention;
            }
            config.save_to(path)?;
            debug!(path = %path.display(), "config saved");
        }
    }

    let password_set = TrackerConfig::password().is_some();
    if json {
        return emit_json(&json!({
            "path": path,
            "config": config,
            "passwordSet": password_set,
        }));
    }
    println!("config:    {}", path.display());
    println!("target:    {}", config.target.as_deref().unwrap_or("-"));
    println!("username:  {}", config.username.as_deref().unwrap_or("-"));
    println!("root:      {}", config.root.as_deref().unwrap_or("-"));
    println!(
        "retention: {}",
        config
            .retention
            .map_or_else(|| "-".to_string(), |n| n.to_string())
    );
    println!(
        "password:  {}",
        if password_set { "set" } else { "not set" }
    );
    Ok(())
}
