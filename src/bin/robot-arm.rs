use std::path::PathBuf;
use std::time::Duration;
use clap::{Parser, Subcommand};
use log::{info, LevelFilter};
use robot_arm_link::app::{load_config, run_local, run_remote, LocalCommand};
use robot_arm_link::device::connection::BtleTransport;
use robot_arm_link::device::simulated::SimulatedTransport;
use robot_arm_link::error::{AppRunError, ConfigError};
use robot_arm_link::init_logging;

#[derive(Parser, Debug)]
#[command(version, about = "Drive the three-motor robot arm over Bluetooth LE or through a gateway")]
struct Args {
    /// Config file (defaults to robot-arm.json next to the executable, then the per-user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use an in-memory arm instead of the Bluetooth adapter
    #[arg(long, global = true)]
    simulate: bool,

    /// How long to scan for the arm, e.g. "10s"
    #[arg(long, global = true, value_parser = humantime::parse_duration)]
    scan_timeout: Option<Duration>,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Look for the arm and print it
    Scan,
    /// Connect and control the arm interactively
    Connect,
    /// Connect and run the demo sequence
    Demo,
    /// Control the arm interactively through a gateway
    Remote {
        /// Gateway WebSocket url, e.g. ws://raspberrypi.local:8080/ws
        #[arg(long)]
        url: Option<String>,
    },
}

async fn run(args: Args) -> Result<(), AppRunError> {
    let (config_io, config) = load_config(args.config.as_deref()).await?;

    let command = match args.command {
        Command::Scan => LocalCommand::Scan,
        Command::Connect => LocalCommand::Connect,
        Command::Demo => LocalCommand::Demo,
        Command::Remote { url } => return run_remote(&config, url).await,
    };

    // only one process on this host may drive the radio
    let mut locker = config_io.locker()?;
    let _lock = locker.lock()?;

    let scan_timeout = args.scan_timeout.unwrap_or_else(|| config.device.scan_timeout());
    if args.simulate {
        run_local(SimulatedTransport::robot_arm(), &config, command, scan_timeout).await
    } else {
        let transport = BtleTransport::new().await?;
        run_local(transport, &config, command, scan_timeout).await
    }
}

#[tokio::main]
async fn main() -> Result<(), AppRunError> {
    let args = Args::parse();
    init_logging(if args.verbose { LevelFilter::Debug } else { LevelFilter::Info });
    info!(concat!("Robot arm ", env!("CARGO_PKG_VERSION")));

    match run(args).await {
        Err(AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            eprintln!("The arm is already being driven by another process (gateway or CLI) on this host");
            std::process::exit(2);
        },
        result => result,
    }
}
