use anyhow::Context;
use clap::Parser;
use modhost_core::{CliOverrides, HostConfig, ModuleError, ScriptHost};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "modhost.yaml";

/// modhost - run Lua scripts with CommonJS-style modules
#[derive(Parser, Debug, Clone)]
#[command(name = "modhost")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Entry script, resolved through the module roots
    #[arg(value_name = "MAIN")]
    main: Option<String>,

    /// Path to the configuration file (default: ./modhost.yaml if present)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Module root directory; repeat to search several
    #[arg(short, long = "root", value_name = "DIR")]
    roots: Vec<String>,

    /// Extension appended to bare module names
    #[arg(long, value_name = "EXT")]
    ext: Option<String>,

    /// Deployment configuration as inline JSON
    #[arg(long, value_name = "JSON")]
    conf: Option<String>,

    /// Redeploy whenever a file under the module roots changes
    #[arg(short, long)]
    watch: bool,

    /// Initialize a new modhost project
    #[arg(long)]
    init: bool,
}

fn main() -> anyhow::Result<()> {
    // Set RUST_LOG=debug for module resolution details
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.init {
        init_project()?;
        return Ok(());
    }

    let Some(main) = cli.main.clone() else {
        eprintln!("Error: No entry script specified. Use --help for usage information.");
        std::process::exit(1);
    };

    let config = load_config(&cli)?;
    debug!(roots = ?config.modules.roots, "module roots");
    let host = ScriptHost::new(config)?;

    if cli.watch {
        return watch_mode(&host, &main);
    }

    if let Err(err) = run_once(&host, &main) {
        host.report_exception(&err);
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
    Ok(())
}

fn init_project() -> anyhow::Result<()> {
    println!("Initializing new modhost project...");

    let mut config = HostConfig::default();
    config.modules.roots = vec!["src".to_string()];
    config.write_file(Path::new(DEFAULT_CONFIG))?;
    println!("Created {}", DEFAULT_CONFIG);

    std::fs::create_dir_all("src")?;
    println!("Created src/ directory");

    let sample = r#"-- Entry script. Modules are loaded with require("name").
local greeting = require("greeting")

print(greeting.hello(__platform:name()))

function on_stop()
  print("stopping")
end
"#;
    let module = r#"local M = {}

function M.hello(name)
  return "Hello from " .. name .. "!"
end

return M
"#;
    let main_path = Path::new("src/main.lua");
    if !main_path.exists() {
        std::fs::write(main_path, sample)?;
        std::fs::write("src/greeting.lua", module)?;
        println!("Created src/main.lua");
    }

    println!("\nRun `modhost main` to start.");
    Ok(())
}

/// Configuration file, then command-line overrides
fn load_config(cli: &Cli) -> anyhow::Result<HostConfig> {
    let mut config = match &cli.config {
        Some(path) => HostConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG).exists() => {
            HostConfig::from_file(Path::new(DEFAULT_CONFIG))?
        }
        None => HostConfig::default(),
    };

    let deployment_config = cli
        .conf
        .as_deref()
        .map(serde_json::from_str::<serde_json::Value>)
        .transpose()
        .context("--conf is not valid JSON")?;

    config.merge(&CliOverrides {
        roots: (!cli.roots.is_empty()).then(|| cli.roots.clone()),
        default_extension: cli.ext.clone(),
        deployment_config,
    });
    Ok(config)
}

/// Start the deployment, then stop it again
fn run_once(host: &ScriptHost, main: &str) -> Result<(), ModuleError> {
    let mut deployment = host.deploy(main);
    deployment.start()?;
    deployment.stop()
}

/// Watch mode - redeploy on file changes
fn watch_mode(host: &ScriptHost, main: &str) -> anyhow::Result<()> {
    use notify::{event::EventKind, Event, RecursiveMode, Watcher};
    use std::sync::mpsc::channel;
    use std::time::{Duration, Instant};

    println!("Watching for changes... (Press Ctrl+C to stop)");

    let mut deployment = host.deploy(main);
    if let Err(err) = deployment.start() {
        host.report_exception(&err);
    }

    let (tx, rx) = channel();
    let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
        if let Ok(event) = res {
            let _ = tx.send(event);
        }
    })?;

    for root in &host.config().modules.roots {
        watcher
            .watch(Path::new(root), RecursiveMode::Recursive)
            .with_context(|| format!("Cannot watch {}", root))?;
    }

    let mut last_deploy = Instant::now();
    let debounce_duration = Duration::from_millis(100);

    loop {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => {
                let relevant = matches!(
                    event.kind,
                    EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                );
                let now = Instant::now();
                if relevant && now.duration_since(last_deploy) >= debounce_duration {
                    info!(paths = ?event.paths, "change detected, redeploying");
                    if let Err(err) = deployment.stop() {
                        warn!("stop hook failed");
                        host.report_exception(&err);
                    }
                    deployment = host.deploy(main);
                    if let Err(err) = deployment.start() {
                        host.report_exception(&err);
                    }
                    last_deploy = now;
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                return Err(anyhow::anyhow!("File watcher disconnected"));
            }
        }
    }
}
