use std::fs;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use taskstore::SqliteStore;
use tracing::{debug, info};

use taskindex::cli::{ClearTarget, Cli, Command, OutputFormat, get_log_path};
use taskindex::config::Config;
use taskindex::domain::Task;
use taskindex::events::EventBus;
use taskindex::filter::PathFilter;
use taskindex::orchestrator::{Collaborators, Orchestrator};
use taskindex::project::ConfigProjectResolver;
use taskindex::source::{CheckboxParser, DocumentSource, FrontmatterTaskSource, FsDocumentSource};
use taskindex::storage::Storage;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    // Setup logging with priority: CLI > config > INFO default
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    if let Some(db) = &cli.db {
        config.storage.path = db.to_string_lossy().into_owned();
    }
    info!(storage = %config.storage.path, "TaskIndex loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Index { root, rebuild, format } => {
            debug!(root = %root.display(), rebuild, "main: matched Index command");
            cmd_index(&config, &root, rebuild, format).await
        }
        Command::Tasks {
            root,
            file,
            open,
            format,
        } => {
            debug!(root = %root.display(), ?file, open, "main: matched Tasks command");
            cmd_tasks(&config, &root, file.as_deref(), open, format).await
        }
        Command::Stats { format } => {
            debug!("main: matched Stats command");
            cmd_stats(&config, format).await
        }
        Command::Clear { namespace } => {
            debug!(?namespace, "main: matched Clear command");
            cmd_clear(&config, namespace).await
        }
    }
}

fn open_store(config: &Config) -> Result<Arc<SqliteStore>> {
    let store = SqliteStore::open(&config.storage.path)
        .wrap_err_with(|| format!("Failed to open index database {}", config.storage.path))?;
    Ok(Arc::new(store))
}

/// Wire the filesystem collaborators and bring the index up to date
async fn start_orchestrator(config: &Config, root: &Path) -> Result<Orchestrator> {
    if !root.is_dir() {
        eyre::bail!("Not a directory: {}", root.display());
    }
    let source: Arc<dyn DocumentSource> = Arc::new(FsDocumentSource::new(root));
    let collaborators = Collaborators {
        source: Arc::clone(&source),
        parser: Arc::new(CheckboxParser::new().context("Failed to build task parser")?),
        resolver: Arc::new(ConfigProjectResolver::new(config.project.clone(), Arc::clone(&source))),
        filter: Arc::new(PathFilter::new(&config.filter).context("Invalid filter rule")?),
        metadata_tasks: Some(Arc::new(FrontmatterTaskSource::default())),
        store: open_store(config)?,
    };

    let orchestrator = Orchestrator::new(config, collaborators, EventBus::with_default_capacity());
    orchestrator.initialize().await.context("Failed to initialize task index")?;
    Ok(orchestrator)
}

async fn cmd_index(config: &Config, root: &Path, rebuild: bool, format: OutputFormat) -> Result<()> {
    debug!(root = %root.display(), rebuild, "cmd_index: called");
    let orchestrator = start_orchestrator(config, root).await?;
    if rebuild {
        orchestrator.rebuild().await.context("Failed to rebuild task index")?;
    }
    let stats = orchestrator.stats().await;
    orchestrator.cleanup().await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
        OutputFormat::Text => {
            println!("{} {}", "Indexed".green().bold(), root.display());
            println!("  Files:       {}", stats.index.files);
            println!("  Tasks:       {}", stats.index.tasks);
            println!("  Completed:   {}", stats.index.completed);
            println!("  File tasks:  {}", stats.index.file_tasks);
            println!("  Processed:   {}", stats.processed_files);
            if stats.failed_files > 0 {
                println!("  Failed:      {}", stats.failed_files.to_string().red());
            }
            if stats.workers.fallbacks > 0 {
                println!("  Fallbacks:   {}", stats.workers.fallbacks.to_string().yellow());
            }
        }
    }
    Ok(())
}

async fn cmd_tasks(config: &Config, root: &Path, file: Option<&str>, open: bool, format: OutputFormat) -> Result<()> {
    debug!(root = %root.display(), ?file, open, "cmd_tasks: called");
    let orchestrator = start_orchestrator(config, root).await?;
    let mut tasks = match file {
        Some(path) => orchestrator.repository().tasks_for_file(path).await,
        None => orchestrator.repository().all_tasks().await,
    };
    orchestrator.cleanup().await;

    if open {
        tasks.retain(|t| !t.completed);
    }
    tasks.sort_by(|a, b| a.file_path.cmp(&b.file_path).then(a.line.cmp(&b.line)));

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&tasks)?),
        OutputFormat::Text => {
            if tasks.is_empty() {
                println!("No tasks found");
            }
            for task in &tasks {
                print_task(task);
            }
        }
    }
    Ok(())
}

fn print_task(task: &Task) {
    let marker = if task.completed {
        "[x]".green()
    } else {
        format!("[{}]", task.status).normal()
    };
    let location = format!("{}:{}", task.file_path, task.line + 1).dimmed();
    let mut line = format!("{} {} {}", marker, task.content, location);
    if let Some(project) = task.metadata.project_ref.as_ref().map(|p| p.name.as_str()) {
        line.push_str(&format!(" {}", format!("({})", project).cyan()));
    }
    if let Some(due) = task.metadata.due_date {
        line.push_str(&format!(" {}", format!("due {}", due).yellow()));
    }
    println!("{}", line);
}

async fn cmd_stats(config: &Config, format: OutputFormat) -> Result<()> {
    debug!("cmd_stats: called");
    let storage = Storage::new(open_store(config)?);
    let counts = storage.stats().await.context("Failed to read storage statistics")?;
    let snapshot = storage.load_consolidated().await.context("Failed to read persisted index")?;
    let (files, tasks) = snapshot
        .as_ref()
        .map(|s| (s.files.len(), s.files.values().map(Vec::len).sum::<usize>()))
        .unwrap_or((0, 0));

    match format {
        OutputFormat::Json => {
            let value = serde_json::json!({
                "database": config.storage.path,
                "records": counts,
                "indexed_files": files,
                "indexed_tasks": tasks,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => {
            println!("{} {}", "Database".bold(), config.storage.path);
            println!("  Raw records:        {}", counts.raw);
            println!("  Augmented records:  {}", counts.augmented);
            println!("  Project records:    {}", counts.project);
            println!("  Meta records:       {}", counts.meta);
            match snapshot {
                Some(_) => println!("  Index:              {} files, {} tasks", files, tasks),
                None => println!("  Index:              {}", "not built".yellow()),
            }
        }
    }
    Ok(())
}

async fn cmd_clear(config: &Config, target: ClearTarget) -> Result<()> {
    debug!(?target, "cmd_clear: called");
    let storage = Storage::new(open_store(config)?);
    match target {
        ClearTarget::All => {
            storage.clear().await.context("Failed to clear storage")?;
            println!("{} all cached data", "Cleared".green());
        }
        ClearTarget::Namespace(namespace) => {
            let removed = storage
                .clear_namespace(namespace)
                .await
                .wrap_err_with(|| format!("Failed to clear {} records", namespace))?;
            println!("{} {} {} records", "Cleared".green(), removed, namespace);
        }
    }
    Ok(())
}

