use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use camfeed::{
    camera_api::CameraApiClient,
    config::Config,
    console::{ConsoleCommand, HELP},
    context::ViewerContext,
    lifecycle::PageEvent,
    observability::init_meter_provider,
    stream::{RefreshReason, StreamState, StreamStatus},
};

#[derive(Parser)]
#[command(name = "camfeed")]
#[command(version)]
#[command(about = "Resilient MJPEG live feed controller")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "camfeed.toml")]
    config: String,

    /// Camera server base URL (overrides config file)
    #[arg(short = 'u', long, value_name = "URL")]
    base_url: Option<String>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Watch the live feed, keeping it connected (default)
    Watch {
        /// Start streaming without waiting for the camera to report active
        #[arg(long)]
        skip_status_check: bool,
    },
    /// Measure bandwidth to the camera server
    Probe,
    /// Show camera status
    Status,
    /// Start, stop or toggle the camera
    Camera {
        #[command(subcommand)]
        action: CameraAction,
    },
    /// Save a snapshot from the camera
    Snapshot {
        /// Output file (defaults to snapshot_<timestamp>.jpg)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
enum CameraAction {
    Start,
    Stop,
    Toggle,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("camfeed={}", cli.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::load_from_file(&cli.config)?;
    if let Some(base_url) = cli.base_url {
        config.stream.base_url = base_url;
        config.validate()?;
    }

    let meter_provider = init_meter_provider();
    info!("Starting camfeed v{}", env!("CARGO_PKG_VERSION"));

    let result = match cli.command.unwrap_or(Command::Watch {
        skip_status_check: false,
    }) {
        Command::Watch { skip_status_check } => {
            if skip_status_check {
                config.camera.check_status = false;
            }
            watch_feed(config).await
        }
        Command::Probe => probe(config).await,
        Command::Status => status(config).await,
        Command::Camera { action } => camera(config, action).await,
        Command::Snapshot { output } => snapshot(config, output).await,
        Command::Config => {
            println!("{}", config.to_toml()?);
            Ok(())
        }
    };

    if let Err(e) = meter_provider.shutdown() {
        debug!("Meter provider shutdown failed: {}", e);
    }
    result
}

fn camera_client(config: &Config) -> Result<CameraApiClient> {
    let client = reqwest::Client::builder()
        .connect_timeout(config.http.connect_timeout)
        .user_agent(config.http.user_agent.clone())
        .build()?;
    Ok(CameraApiClient::new(
        client,
        config.stream.base_url()?,
        config.camera.clone(),
    ))
}

async fn watch_feed(config: Config) -> Result<()> {
    let ctx = ViewerContext::build(config)?;
    let (events_tx, events_rx) = mpsc::channel(16);
    let lifecycle_task = tokio::spawn(ctx.lifecycle().run(events_rx));
    let status_task = tokio::spawn(report_status(ctx.handle().subscribe()));

    if !ctx.bootstrap().await {
        println!("Camera is not active. Press 'c' to start it, or 'g' to start the stream anyway.");
    }
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<ConsoleCommand>() {
                    Ok(ConsoleCommand::Quit) => break,
                    Ok(command) => execute(&ctx, &events_tx, command).await,
                    Err(message) => println!("{message}"),
                }
            }
        }
    }

    if events_tx.send(PageEvent::Unload).await.is_err() {
        debug!("Lifecycle coordinator already gone");
    }
    if let Err(e) = lifecycle_task.await {
        warn!("Lifecycle task ended abnormally: {}", e);
    }
    status_task.abort();
    ctx.shutdown().await;
    Ok(())
}

async fn execute(ctx: &ViewerContext, events: &mpsc::Sender<PageEvent>, command: ConsoleCommand) {
    let handle = ctx.handle();
    match command {
        ConsoleCommand::Refresh => handle.refresh(RefreshReason::User),
        ConsoleCommand::ToggleVariant => handle.toggle_variant_override(),
        ConsoleCommand::Quality(preset) => ctx.apply_quality_preset(preset),
        ConsoleCommand::Start => handle.start(),
        ConsoleCommand::Stop => handle.stop(),
        ConsoleCommand::Status => print_status(&handle.status()),
        ConsoleCommand::Diagnostics => println!("{}", ctx.diagnostics()),
        ConsoleCommand::Probe => {
            let tier = ctx.reprobe().await;
            println!("Bandwidth: {tier}, preferred variant: {}", tier.preferred_variant());
        }
        ConsoleCommand::Visibility(visibility) => {
            if events
                .send(PageEvent::VisibilityChanged(visibility))
                .await
                .is_err()
            {
                debug!("Lifecycle coordinator gone, visibility change dropped");
            }
        }
        ConsoleCommand::Resize(viewport) => {
            if events.send(PageEvent::Resize(viewport)).await.is_err() {
                debug!("Lifecycle coordinator gone, resize dropped");
            }
        }
        ConsoleCommand::ToggleCamera => match ctx.toggle_camera().await {
            Ok(active) => println!("Camera {}", if active { "started" } else { "stopped" }),
            Err(e) => println!("Camera toggle failed: {e}"),
        },
        ConsoleCommand::Snapshot => {
            match ctx.camera().save_snapshot(None).await {
                Ok(path) => println!("Snapshot saved to {}", path.display()),
                Err(e) => println!("Snapshot failed: {e}"),
            }
        }
        ConsoleCommand::Help => println!("{HELP}"),
        ConsoleCommand::Quit => {}
    }
}

fn print_status(status: &StreamStatus) {
    let indicator = status
        .indicator()
        .unwrap_or_else(|| "Streaming".to_string());
    println!(
        "{indicator} [state={} variant={} override={} attempt={}/{}]",
        status.state,
        status.variant,
        status
            .variant_override
            .map(|v| v.to_string())
            .unwrap_or_else(|| "none".to_string()),
        status.attempt,
        status.max_attempts
    );
}

/// Log every visible change of the placeholder indicator
async fn report_status(mut status: watch::Receiver<StreamStatus>) {
    let mut last = (StreamState::Idle, 0);
    while status.changed().await.is_ok() {
        let current = status.borrow_and_update().clone();
        if (current.state, current.attempt) == last {
            continue;
        }
        last = (current.state, current.attempt);
        match current.indicator() {
            Some(text) => info!(state = %current.state, "{}", text),
            None => info!(variant = %current.variant, "Streaming"),
        }
    }
}

async fn probe(config: Config) -> Result<()> {
    let ctx = ViewerContext::build(config)?;
    ctx.bandwidth().probe().await;
    let sample = ctx.bandwidth().current();
    match sample.throughput_kbps {
        Some(kbps) => println!(
            "Bandwidth: {} ({kbps:.1} KB/s), preferred variant: {}",
            sample.tier,
            sample.tier.preferred_variant()
        ),
        None => println!(
            "Bandwidth: {} (probe failed), preferred variant: {}",
            sample.tier,
            sample.tier.preferred_variant()
        ),
    }
    ctx.shutdown().await;
    Ok(())
}

async fn status(config: Config) -> Result<()> {
    let status = camera_client(&config)?.status().await?;
    println!(
        "Camera {}: {}",
        if status.is_active() { "active" } else { "inactive" },
        status.message.unwrap_or_default()
    );
    Ok(())
}

async fn camera(config: Config, action: CameraAction) -> Result<()> {
    let client = camera_client(&config)?;
    match action {
        CameraAction::Start => println!("{}", client.start().await?),
        CameraAction::Stop => println!("{}", client.stop().await?),
        CameraAction::Toggle => {
            let active = client.toggle().await?;
            println!("Camera {}", if active { "started" } else { "stopped" });
        }
    }
    Ok(())
}

async fn snapshot(config: Config, output: Option<PathBuf>) -> Result<()> {
    let path = camera_client(&config)?.save_snapshot(output).await?;
    println!("Snapshot saved to {}", path.display());
    Ok(())
}
