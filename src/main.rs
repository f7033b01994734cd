use clap::{Parser, Subcommand};
use log::{error, info};
use sandboxd::configuration::config::Config;
use sandboxd::controller::Controller;
use sandboxd::executor::ExecutionRequest;
use sandboxd::preview::PreviewRequest;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directories never shipped into a container.
const SKIPPED_DIRS: &[&str] = &["node_modules", ".git", "__pycache__"];

#[derive(Parser)]
#[command(name = "sandboxd")]
#[command(version)]
#[command(about = "Runs untrusted projects in throwaway containers and hosts web previews")]
struct Args {
    /// TOML configuration file; defaults apply when omitted
    #[arg(long, env = "SANDBOXD_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides the registry document location
    #[arg(long)]
    registry: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a project to completion and print the result
    Exec {
        dir: PathBuf,
        /// Detected from the project files when omitted
        #[arg(long)]
        language: Option<String>,
        /// Timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Start a web preview
    Preview {
        dir: PathBuf,
        /// Detected from the framework or the project files when omitted
        #[arg(long)]
        language: Option<String>,
        #[arg(long)]
        framework: Option<String>,
        /// TTL in minutes
        #[arg(long)]
        ttl: Option<u64>,
        #[arg(long)]
        session: Option<String>,
    },
    /// Stop a preview
    Stop { id: String },
    /// Extend a preview's TTL
    Extend {
        id: String,
        /// Minutes to add
        #[arg(long)]
        ttl: u64,
    },
    /// Print a preview's logs
    Logs {
        id: String,
        #[arg(long)]
        tail: Option<usize>,
    },
    /// List previews
    List,
    /// Run a single reaper sweep
    Reap,
    /// Run the reaper until Ctrl-C
    Daemon,
}

/// Reads a project directory into the relative path -> content map.
fn read_project(dir: &Path) -> std::io::Result<BTreeMap<String, String>> {
    let mut files = BTreeMap::new();
    read_project_dir(dir, dir, &mut files)?;
    info!("Read {} file(s) from {}", files.len(), dir.display());
    Ok(files)
}

fn read_project_dir(
    root: &Path,
    dir: &Path,
    files: &mut BTreeMap<String, String>,
) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        if entry.file_type()?.is_dir() {
            if SKIPPED_DIRS.iter().any(|skip| name == *skip) {
                continue;
            }
            read_project_dir(root, &path, files)?;
            continue;
        }
        let relative = match path.strip_prefix(root) {
            Ok(relative) => relative.to_string_lossy().replace('\\', "/"),
            Err(_) => continue,
        };
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                files.insert(relative, content);
            }
            Err(e) => log::warn!("Skipping unreadable file {}: {}", path.display(), e),
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => error!("Unable to render output: {}", e),
    }
}

fn fail(message: String) -> ! {
    error!("{}", message);
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .unwrap_or_else(|e| fail(format!("Unable to import configuration: {}", e))),
        None => {
            info!("No configuration file given, using defaults");
            Config::default()
        }
    };
    if let Some(registry) = args.registry {
        config.registry.path = registry;
    }

    let mut controller = Controller::new(config)
        .await
        .unwrap_or_else(|e| fail(format!("Unable to create a controller instance: {}", e)));

    match args.command {
        Command::Exec {
            dir,
            language,
            timeout,
        } => {
            let files = read_project(&dir)
                .unwrap_or_else(|e| fail(format!("Unable to read {}: {}", dir.display(), e)));
            let mut request = ExecutionRequest::detected(files);
            request.language = language;
            request.timeout = timeout.map(Duration::from_secs);
            match controller.executor.run(request).await {
                Ok(result) => print_json(&result),
                Err(e) => fail(format!("Execution failed ({:?}): {}", e.kind(), e)),
            }
        }
        Command::Preview {
            dir,
            language,
            framework,
            ttl,
            session,
        } => {
            let files = read_project(&dir)
                .unwrap_or_else(|e| fail(format!("Unable to read {}: {}", dir.display(), e)));
            let mut request = PreviewRequest::detected(files);
            request.language = language;
            request.framework = framework;
            request.ttl = ttl.map(|mins| Duration::from_secs(mins * 60));
            request.session_id = session;
            match controller.previews.start(request).await {
                Ok(started) => print_json(&started),
                Err(e) => {
                    if let sandboxd::error_handling::types::PreviewError::StartupFailed {
                        logs, ..
                    } = &e
                    {
                        eprintln!("{}", logs);
                    }
                    fail(format!("Preview failed ({:?}): {}", e.kind(), e))
                }
            }
        }
        Command::Stop { id } => match controller.previews.stop(&id).await {
            Ok(outcome) => print_json(&outcome),
            Err(e) => fail(format!("Stop failed: {}", e)),
        },
        Command::Extend { id, ttl } => {
            match controller
                .previews
                .extend(&id, Duration::from_secs(ttl * 60))
                .await
            {
                Ok(outcome) => print_json(&outcome),
                Err(e) => fail(format!("Extend failed: {}", e)),
            }
        }
        Command::Logs { id, tail } => {
            print!("{}", controller.previews.logs(&id, tail).await);
        }
        Command::List => print_json(&controller.previews.list().await),
        Command::Reap => print_json(&controller.reaper.sweep().await),
        Command::Daemon => {
            if let Err(e) = controller.run().await {
                fail(format!("Controller stopped with an error: {}", e));
            }
        }
    }
}
