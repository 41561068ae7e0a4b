//! sealpipe: encrypted one-shot file transfer
//!
//! Commands:
//!   send <addr> <file>                    - connect and send one file
//!   receive [--listen] [--out] [--once]   - accept files, one per connection
//!   config show                           - display current configuration

use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use sealpipe_core::SealpipeConfig;
use sealpipe_crypto::ReceiverKeyPair;
use sealpipe_transfer::{ProgressFn, Receiver, Sender};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "sealpipe",
    version,
    about = "Encrypted, integrity-checked file transfer",
    long_about = "sealpipe: send a file over an authenticated encrypted stream, verified by SHA-256 before it lands"
)]
struct Cli {
    /// Path to sealpipe.toml configuration file
    #[arg(long, short = 'c', env = "SEALPIPE_CONFIG", default_value = "sealpipe.toml")]
    config: PathBuf,

    /// Log level or filter directive (overrides [log] level)
    #[arg(long, env = "SEALPIPE_LOG")]
    log: Option<String>,

    /// Log format (overrides [log] format)
    #[arg(long, env = "SEALPIPE_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send one file to a listening receiver
    Send {
        /// Receiver address (host:port)
        addr: String,
        /// File to send
        file: PathBuf,
    },

    /// Accept incoming files, one per connection
    Receive {
        /// Address to listen on
        #[arg(long, short = 'l', default_value = "0.0.0.0:7878")]
        listen: String,
        /// Destination directory (overrides [transfer] output_dir)
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
        /// Exit after the first transfer
        #[arg(long)]
        once: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = SealpipeConfig::load(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = match cli.log_format.clone() {
        Some(format) => format,
        None => LogFormat::from_str(&config.log.format, true)
            .map_err(|e| anyhow::anyhow!("[log] format {:?}: {e}", config.log.format))?,
    };
    init_logging(&level, &format);

    match cli.command {
        Commands::Send { addr, file } => cmd_send(&config, &addr, &file).await,
        Commands::Receive { listen, out, once } => {
            cmd_receive(&config, &listen, out, once).await
        }
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

/// Run `fut` under the configured connection deadline, if any.
async fn with_deadline<T>(deadline: Option<Duration>, fut: impl Future<Output = T>) -> Result<T> {
    match deadline {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .with_context(|| format!("transfer exceeded {}s deadline", limit.as_secs())),
        None => Ok(fut.await),
    }
}

// ── `sealpipe send` ───────────────────────────────────────────────────────────

async fn cmd_send(config: &SealpipeConfig, addr: &str, file: &Path) -> Result<()> {
    if !file.is_file() {
        anyhow::bail!("not a regular file: {}", file.display());
    }

    let mut stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("connecting to {addr}"))?;
    stream.set_nodelay(true).context("setting TCP_NODELAY")?;
    info!(addr, file = %file.display(), "connected");

    let pb = make_progress_bar("send")?;
    let sender = Sender::new().with_progress(progress_to_bar(pb.clone()));

    let manifest = with_deadline(config.transfer.io_timeout(), sender.send_file(&mut stream, file))
        .await?
        .with_context(|| format!("sending {}", file.display()))?;
    stream.shutdown().await.context("closing connection")?;

    pb.finish_with_message("done".to_string());
    println!("Sent {}", manifest.name);
    println!("  sha256:  {}", manifest.hash);
    println!("  bytes:   {}", fmt_bytes(manifest.size));
    Ok(())
}

// ── `sealpipe receive` ────────────────────────────────────────────────────────

async fn cmd_receive(
    config: &SealpipeConfig,
    listen: &str,
    out: Option<PathBuf>,
    once: bool,
) -> Result<()> {
    let out = out.unwrap_or_else(|| config.transfer.output_dir.clone());
    let keys = Arc::new(ReceiverKeyPair::generate());
    let receiver = Receiver::new(keys.clone(), &out);

    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    let local = listener.local_addr().context("reading listener address")?;
    info!(
        addr = %local,
        out = %out.display(),
        public_key = %keys.public_key(),
        "listening"
    );
    println!("Listening on {local}, saving into {}", out.display());

    let bars = MultiProgress::new();
    let deadline = config.transfer.io_timeout();
    loop {
        let (stream, peer) = listener.accept().await.context("accepting connection")?;
        info!(%peer, "connection accepted");

        let pb = bars.add(make_progress_bar("recv")?);
        let receiver = receiver.clone().with_progress(progress_to_bar(pb.clone()));
        let task = tokio::spawn(receive_one(receiver, stream, peer, deadline, bars.clone(), pb));

        if once {
            return task.await.context("receive task panicked")?;
        }
    }
}

async fn receive_one(
    receiver: Receiver,
    mut stream: TcpStream,
    peer: SocketAddr,
    deadline: Option<Duration>,
    bars: MultiProgress,
    pb: ProgressBar,
) -> Result<()> {
    let result = with_deadline(deadline, receiver.receive(&mut stream))
        .await
        .and_then(|r| r.with_context(|| format!("receiving from {peer}")));

    let outcome = match result {
        Ok(file) => {
            pb.finish_with_message(file.manifest.name.clone());
            info!(%peer, path = %file.path.display(), bytes = file.manifest.size, "file saved");
            println!("Received {} -> {}", file.manifest.pretty(), file.path.display());
            Ok(())
        }
        Err(e) => {
            pb.abandon_with_message("failed".to_string());
            warn!(%peer, error = %format!("{e:#}"), "transfer aborted");
            Err(e)
        }
    };
    // finished bars leave the display; the summary line printed above stays
    bars.remove(&pb);
    outcome
}

// ── `sealpipe config show` ────────────────────────────────────────────────────

fn cmd_config_show(config: &SealpipeConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(prefix: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::with_template(
            "{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
        )
        .context("progress bar template")?
        .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    Ok(pb)
}

fn progress_to_bar(pb: ProgressBar) -> ProgressFn {
    Box::new(move |done, total, name| {
        pb.set_length(total);
        pb.set_position(done);
        pb.set_message(name.to_string());
    })
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
