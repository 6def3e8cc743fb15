//! livebridge-probe: drive one side of a bridge from the command line.
//!
//! Run a server in one terminal and a client in another:
//!
//! ```text
//! livebridge-probe server --pair rig
//! livebridge-probe client --pair rig
//! ```
//!
//! The server publishes an incrementing tag and its playhead every tick and
//! ends with a terminal tag; the client echoes tags back and exits when it
//! sees the terminal one. With `--timeline` the client scrubs and the server
//! follows.

use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use livebridge::{BridgeConfig, BridgeError, ObjectNames, Role, Session};
use tracing_subscriber::EnvFilter;

/// Server tag that tells the client to stop.
const TERMINAL_TAG: u32 = u32::MAX;

/// Seconds of playhead per server tag.
const SECONDS_PER_TAG: f64 = 0.001;

type BoxError = Box<dyn std::error::Error>;

#[derive(Parser)]
#[command(name = "livebridge-probe")]
#[command(about = "Run a livebridge server or client loop")]
struct Cli {
    /// Pair name shared by server and client
    #[arg(long, global = true, env = "LIVEBRIDGE_PAIR", default_value = "AnimationBridgePair")]
    pair: String,

    /// More output (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the pair and publish frames
    Server {
        /// Frames to publish before sending the terminal tag
        #[arg(long, default_value_t = 1000)]
        ticks: u32,
        /// Ticks per second
        #[arg(long, default_value_t = 200.0)]
        rate: f64,
        /// Follow the client's playhead instead of playing
        #[arg(long)]
        timeline: bool,
    },
    /// Attach to a running server and echo frames
    Client {
        /// Open attempts before giving up
        #[arg(long, default_value_t = 10)]
        retries: u32,
        /// Delay between open attempts, in milliseconds
        #[arg(long, default_value_t = 100)]
        retry_delay_ms: u64,
        /// Ticks per second
        #[arg(long, default_value_t = 200.0)]
        rate: f64,
        /// Scrub the server's playhead
        #[arg(long)]
        timeline: bool,
    },
    /// Print the OS object names derived from the pair name
    Names,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        tracing::error!("{e}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), BoxError> {
    let config = BridgeConfig::default();

    match cli.command {
        Commands::Server {
            ticks,
            rate,
            timeline,
        } => run_server(config, &cli.pair, ticks, tick_period(rate)?, timeline).await,
        Commands::Client {
            retries,
            retry_delay_ms,
            rate,
            timeline,
        } => {
            let session = connect(
                config,
                &cli.pair,
                retries,
                Duration::from_millis(retry_delay_ms),
            )
            .await?;
            run_client(session, tick_period(rate)?, timeline).await
        }
        Commands::Names => {
            let names = ObjectNames::derive(&config, &cli.pair)?;
            println!("segment      {}", names.segment);
            println!("to_client    {}", names.to_client);
            println!("from_client  {}", names.from_client);
            Ok(())
        }
    }
}

fn tick_period(rate: f64) -> Result<Duration, BoxError> {
    if !(rate.is_finite() && rate > 0.0) {
        return Err(format!("tick rate must be positive, got {rate}").into());
    }
    Ok(Duration::from_secs_f64(1.0 / rate))
}

/// Commit once; `WouldBlock` is a normal "not yet".
fn try_commit(session: &mut Session) -> Result<bool, BridgeError> {
    match session.commit(true) {
        Ok(()) => Ok(true),
        Err(BridgeError::WouldBlock) => Ok(false),
        Err(e) => Err(e),
    }
}

async fn run_server(
    config: BridgeConfig,
    pair: &str,
    ticks: u32,
    period: Duration,
    follow_client: bool,
) -> Result<(), BoxError> {
    let mut session = Session::with_config(config);
    session.open(pair, Role::Server)?;
    tracing::info!(pair, ticks, "server started");

    let mut interval = tokio::time::interval(period);
    let mut local_time = 0.0;
    let mut tag = 0u32;

    while tag < ticks {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }

        if follow_client {
            if let Some(remote) = session.timeline_mut().check_for_remote_time_control(local_time, false) {
                tracing::info!(remote, "client took the playhead");
                local_time = remote;
            }
            session.timeline_mut().set_local_timeline(local_time, false);
        } else {
            local_time = SECONDS_PER_TAG * f64::from(tag);
            session.timeline_mut().set_local_timeline(local_time, true);
        }

        let record = session.record_mut();
        record.header.model_count = 1;
        record.header.server_tag = tag;
        record.server_player.set_playing(!follow_client);
        record.server_player.local_time = local_time;

        if try_commit(&mut session)? {
            tracing::debug!(tag, client_tag = session.record().header.client_tag, "frame");
            tag += 1;
        }
    }

    // Hand the terminal tag over; give a vanished client a bounded grace period.
    session.record_mut().header.server_tag = TERMINAL_TAG;
    for _ in 0..1000 {
        if try_commit(&mut session)? {
            tracing::info!(frames = tag, "server finished");
            return Ok(());
        }
        interval.tick().await;
    }
    tracing::warn!("client never took the terminal frame");
    Ok(())
}

async fn connect(
    config: BridgeConfig,
    pair: &str,
    retries: u32,
    delay: Duration,
) -> Result<Session, BoxError> {
    let mut session = Session::with_config(config);
    let mut attempt = 0;
    loop {
        match session.open(pair, Role::Client) {
            Ok(()) => return Ok(session),
            Err(BridgeError::NotFound(what)) if attempt + 1 < retries => {
                tracing::debug!(attempt, "{what} not there yet, retrying");
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

async fn run_client(mut session: Session, period: Duration, scrub: bool) -> Result<(), BoxError> {
    tracing::info!(pair = session.pair_name().unwrap_or_default(), "client attached");

    let mut interval = tokio::time::interval(period);
    let mut local_time = 0.0;
    let mut client_tag = 0u32;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                return Ok(());
            }
        }

        let server_tag = session.record().header.server_tag;
        if scrub {
            local_time = SECONDS_PER_TAG * f64::from(server_tag) * 0.5;
            session.timeline_mut().set_local_timeline(local_time, false);
        } else {
            if let Some(remote) = session.timeline_mut().check_for_remote_time_control(local_time, false) {
                local_time = remote;
            }
            session.timeline_mut().set_local_timeline(local_time, false);
        }

        let record = session.record_mut();
        record.header.client_tag = client_tag;
        record.client_player.local_time = local_time;

        if !try_commit(&mut session)? {
            continue;
        }
        client_tag = client_tag.wrapping_add(1);

        let server_tag = session.record().header.server_tag;
        if server_tag == TERMINAL_TAG {
            tracing::info!(frames = client_tag, "server finished, detaching");
            return Ok(());
        }
        tracing::debug!(
            server_tag,
            server_time = session.record().server_player.local_time,
            "frame"
        );
    }
}
