use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use indicatif::HumanBytes;
use localdrop::common::config::{self, ConfigOverrides};
use localdrop::common::AppConfig;
use localdrop::server::serve_control;
use localdrop::{ui, ServerSupervisor};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const STATUS_POLL: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "localdrop", version)]
#[command(about = "Receive files from a phone on the same network")]
struct Cli {
    /// Port for the upload server (0 picks a free one)
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Where received files are written
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Advertise this address instead of detecting one
    #[arg(long, global = true)]
    ip: Option<Ipv4Addr>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start receiving and show the pairing QR code (default)
    Start,

    /// Serve the start/stop/status API for a desktop front-end
    Control {
        /// Loopback port for the control API
        #[arg(long)]
        control_port: Option<u16>,
    },

    /// Print the resolved configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let overrides = ConfigOverrides {
        port: cli.port,
        upload_dir: cli.dir,
        advertise_ip: cli.ip,
    };
    let config = config::load_config(&overrides)?;

    match cli.command.unwrap_or(Commands::Start) {
        Commands::Start => run_receive(config).await,
        Commands::Control { control_port } => {
            let port = control_port.unwrap_or(config.control_port);
            let supervisor = Arc::new(ServerSupervisor::new(config));
            serve_control(supervisor, port, shutdown_signal()).await
        }
        Commands::Config => show_config(&config),
    }
}

async fn run_receive(config: AppConfig) -> Result<()> {
    let supervisor = ServerSupervisor::new(config);

    let spinner = ui::spinner("Starting receive server...");
    let info = match supervisor.try_start().await {
        Ok(info) => {
            ui::spinner_success(&spinner, "Ready to receive");
            info
        }
        Err(e) => {
            ui::spinner_error(&spinner, &e.to_string());
            return Err(e.into());
        }
    };

    println!("{}", ui::render_qr(&info.url)?);
    println!("Scan the code or open {}", style(&info.url).cyan().bold());
    println!("Saving to {}", supervisor.status().upload_dir);
    println!("Press Ctrl+C to stop\n");

    let waiting = ui::spinner("Waiting for files...");
    let mut ticker = tokio::time::interval(STATUS_POLL);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let status = supervisor.status();
                if status.received_count > 0 {
                    waiting.set_message(format!(
                        "Received {} file(s), {}",
                        status.received_count,
                        HumanBytes(status.total_size)
                    ));
                }
            }
        }
    }

    let received = supervisor.status();
    waiting.finish_and_clear();

    let stopping = ui::spinner("Stopping...");
    supervisor.stop().await;
    ui::spinner_success(
        &stopping,
        &format!(
            "Stopped. {} file(s), {} received",
            received.received_count,
            HumanBytes(received.total_size)
        ),
    );

    Ok(())
}

fn show_config(config: &AppConfig) -> Result<()> {
    println!("# {}", config::config_path().display());
    let rendered =
        serde_json::to_string_pretty(config).context("Failed to render configuration")?;
    println!("{rendered}");
    println!("upload directory: {}", config.upload_dir().display());
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}
