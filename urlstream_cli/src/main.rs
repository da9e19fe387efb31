use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use urlstream_core::bridge::Operation;
use urlstream_core::registry::{ReqwestSessionFactory, SessionRegistry};
use urlstream_core::stream::StreamEvent;
use urlstream_core::transport::{SessionConfig, SessionConfigBuilder};
use urlstream_core::types::types::{DownloadState, FetchState};
use urlstream_core::Url;

mod terminal_observer;
use terminal_observer::{format_bytes, TerminalProgressObserver};

#[derive(Parser)]
#[command(name = "urlstream", about = "Fetch or download a URL and follow its lifecycle")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// JSON file with session settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Connect timeout in seconds
    #[arg(long, global = true)]
    connect_timeout: Option<u64>,

    /// Overall request timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[arg(long, global = true)]
    user_agent: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch a URL into memory
    Fetch {
        url: Url,

        /// Use a dedicated session instead of the shared one
        #[arg(long)]
        dedicated_session: bool,

        /// With --dedicated-session, keep no idle connections
        #[arg(long)]
        ephemeral: bool,

        /// Write the payload here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Download a URL to disk
    Download {
        url: Url,

        /// Move the finished download here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

type CliResult<T> = Result<T, Box<dyn Error>>;

/// Session settings from `--config`, overridden by individual flags.
fn session_config(args: &Args) -> CliResult<SessionConfig> {
    let base = match &args.config {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => SessionConfig::default(),
    };

    let mut builder = SessionConfigBuilder::from_config(base);
    if let Some(secs) = args.connect_timeout {
        builder = builder.with_connect_timeout_secs(secs);
    }
    if let Some(secs) = args.timeout {
        builder = builder.with_request_timeout_secs(secs);
    }
    if let Some(user_agent) = &args.user_agent {
        builder = builder.with_user_agent(user_agent.clone());
    }
    Ok(builder.build())
}

async fn fetch(
    registry: &SessionRegistry,
    url: Url,
    dedicated: Option<&SessionConfig>,
    output: Option<&Path>,
) -> CliResult<()> {
    let bridge = registry.data_fetch_bridge(url, dedicated)?;
    let mut events = bridge.stream().subscribe();
    bridge.resume();

    while let Some(event) = events.next().await {
        match event {
            StreamEvent::Value(FetchState::Uninitiated) => {
                eprintln!("Operation {} uninitiated ...", bridge.identifier())
            }
            StreamEvent::Value(FetchState::WaitingForResponse) => eprintln!("Waiting for response ..."),
            StreamEvent::Value(FetchState::DataReceived(data)) => {
                eprintln!("Data received: {}", format_bytes(data.len() as u64));
                match output {
                    Some(path) => tokio::fs::write(path, &data).await?,
                    None => {
                        let mut stdout = tokio::io::stdout();
                        stdout.write_all(&data).await?;
                        stdout.flush().await?;
                    }
                }
            }
            StreamEvent::Finished => return Ok(()),
            StreamEvent::Failed(err) => return Err(err.into()),
        }
    }
    Err("stream ended without a terminal event".into())
}

async fn download(registry: &SessionRegistry, url: Url, output: Option<&Path>) -> CliResult<PathBuf> {
    let bridge = registry.download_bridge(url);
    let _progress = bridge
        .stream()
        .add_observer(Box::new(TerminalProgressObserver::new()));
    let mut events = bridge.stream().subscribe();
    bridge.resume();

    let mut location = None;
    while let Some(event) = events.next().await {
        match event {
            StreamEvent::Value(DownloadState::Completed(path)) => location = Some(path),
            StreamEvent::Value(_) => {}
            StreamEvent::Finished => break,
            StreamEvent::Failed(err) => return Err(err.into()),
        }
    }
    let location = location.ok_or("download finished without a location")?;

    match output {
        Some(dest) => {
            move_file(&location, dest).await?;
            Ok(dest.to_path_buf())
        }
        None => Ok(location),
    }
}

/// Rename, falling back to copy + remove across filesystems.
async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await
}

async fn run(args: Args) -> CliResult<()> {
    let config = session_config(&args)?;
    let registry = SessionRegistry::with_factory(Arc::new(ReqwestSessionFactory), &config)?;
    let start = Instant::now();

    match args.command {
        Command::Fetch {
            url,
            dedicated_session,
            ephemeral,
            output,
        } => {
            let dedicated = dedicated_session.then(|| {
                if ephemeral {
                    SessionConfig {
                        pool_max_idle_per_host: 0,
                        ..config.clone()
                    }
                } else {
                    config.clone()
                }
            });
            fetch(&registry, url, dedicated.as_ref(), output.as_deref()).await?;
        }
        Command::Download { url, output } => {
            let location = download(&registry, url, output.as_deref()).await?;
            println!("Saved to {}", location.display());
        }
    }

    log::info!("done in {:.2}s", start.elapsed().as_secs_f64());
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
