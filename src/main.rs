use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use plugbot::application::services::WorkerService;
use plugbot::infrastructure::config::Config;
use plugbot::infrastructure::supervisor::{ProcessLauncher, Supervisor};

#[derive(Parser)]
#[command(name = "plugbot")]
#[command(about = "A plugin-hosting chat bot runtime", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true, default_value = "config.yaml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bot under a supervisor
    Run {
        /// Run the worker in this process, without supervision
        #[arg(long)]
        foreground: bool,
    },
    /// Worker process entry point, spawned by `run`
    #[command(hide = true)]
    Worker,
    /// List available and installed plugins
    Plugins,
    /// Show version
    Version,
    /// Write a default config file
    InitConfig,
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Run { foreground: false } => run_supervisor(&cli.config),
        Commands::Run { foreground: true } | Commands::Worker => run_worker(&cli.config),
        Commands::Plugins => list_plugins(&cli.config),
        Commands::Version => {
            println!("plugbot v{}", env!("CARGO_PKG_VERSION"));
            0
        }
        Commands::InitConfig => init_config(&cli.config),
    };
    std::process::exit(code);
}

fn load_config(path: &Path) -> Config {
    if path.exists() {
        Config::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config: {}, using defaults", e);
            Config::load_env()
        })
    } else {
        Config::load_env()
    }
}

fn runtime() -> Option<tokio::runtime::Runtime> {
    match tokio::runtime::Runtime::new() {
        Ok(rt) => Some(rt),
        Err(e) => {
            tracing::error!("Failed to start runtime: {}", e);
            None
        }
    }
}

fn run_supervisor(config_path: &Path) -> i32 {
    let config = load_config(config_path);
    let program = match std::env::current_exe() {
        Ok(program) => program,
        Err(e) => {
            tracing::error!("Cannot locate own executable: {}", e);
            return 1;
        }
    };
    let args = vec![
        "--config".to_string(),
        config_path.display().to_string(),
        "worker".to_string(),
    ];
    let Some(rt) = runtime() else { return 1 };

    rt.block_on(async move {
        let (interrupt_tx, interrupt_rx) = mpsc::channel(4);
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if interrupt_tx.send(()).await.is_err() {
                    break;
                }
            }
        });

        tracing::info!("Starting {} supervisor", config.bot.name);
        let mut supervisor = Supervisor::new(ProcessLauncher::new(program, args), &config.supervisor);
        match supervisor.run(interrupt_rx).await {
            Ok(code) => code,
            Err(e) => {
                tracing::error!("Supervisor failed: {}", e);
                1
            }
        }
    })
}

fn run_worker(config_path: &Path) -> i32 {
    let config = load_config(config_path);
    let Some(rt) = runtime() else { return 1 };

    tracing::info!("Starting plugbot worker: {}", config.bot.name);
    rt.block_on(async move {
        match WorkerService::new(config).run().await {
            Ok(code) => code,
            Err(e) => {
                tracing::error!("Worker failed: {}", e);
                1
            }
        }
    })
}

fn list_plugins(config_path: &Path) -> i32 {
    let config = load_config(config_path);
    let Some(rt) = runtime() else { return 1 };

    rt.block_on(async move {
        let worker = WorkerService::new(config);
        worker.plugins().load_from_config().await;
        for desc in worker.plugins().list_all() {
            println!(
                "{:<24} {:<10} {:<10} {}",
                desc.name,
                format!("{:?}", desc.kind).to_lowercase(),
                if desc.installed { "installed" } else { "-" },
                desc.description.unwrap_or_default()
            );
        }
        0
    })
}

fn init_config(path: &Path) -> i32 {
    if path.exists() {
        eprintln!("{} already exists", path.display());
        return 1;
    }
    match Config::default().save(path) {
        Ok(()) => {
            println!("Wrote default config to {}", path.display());
            0
        }
        Err(e) => {
            eprintln!("Failed to write config: {}", e);
            1
        }
    }
}
