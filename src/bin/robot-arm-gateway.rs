use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use clap::Parser;
use log::{info, LevelFilter};
use tokio::net::TcpListener;
use robot_arm_link::app::{load_config, serve};
use robot_arm_link::device::connection::BtleTransport;
use robot_arm_link::device::simulated::SimulatedTransport;
use robot_arm_link::error::{AppRunError, ConfigError};
use robot_arm_link::init_logging;

#[derive(Parser, Debug)]
#[command(version, about = "Share one robot arm with any number of browser sessions over WebSocket")]
struct Args {
    /// Config file (defaults to robot-arm-gateway.json next to the executable, then the per-user config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on, overrides the config file
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// How often to verify the link while idle, e.g. "5s"
    #[arg(long, value_parser = parse_interval)]
    link_check_interval: Option<Duration>,

    /// Use an in-memory arm instead of the Bluetooth adapter
    #[arg(long)]
    simulate: bool,

    /// Log debug output
    #[arg(short, long)]
    verbose: bool,
}

fn parse_interval(arg: &str) -> Result<Duration, String> {
    let interval = humantime::parse_duration(arg).map_err(|err| err.to_string())?;
    if interval.is_zero() {
        return Err("must be greater than zero".to_string());
    }
    Ok(interval)
}

async fn run(args: Args) -> Result<(), AppRunError> {
    let (config_io, mut config) = load_config(args.config.as_deref()).await?;
    if let Some(listen) = args.listen {
        config.gateway.listen = listen;
    }
    if let Some(interval) = args.link_check_interval {
        config.gateway.link_check_interval_ms = interval.as_millis().max(1) as u64;
    }

    let mut locker = config_io.locker()?;
    let _lock = locker.lock()?;

    let listener = TcpListener::bind(config.gateway.listen).await?;
    if args.simulate {
        serve(SimulatedTransport::robot_arm(), &config, listener).await
    } else {
        let transport = BtleTransport::new().await?;
        serve(transport, &config, listener).await
    }
}

#[tokio::main]
async fn main() -> Result<(), AppRunError> {
    let args = Args::parse();
    init_logging(if args.verbose { LevelFilter::Debug } else { LevelFilter::Info });
    info!(concat!("Robot arm gateway ", env!("CARGO_PKG_VERSION")));

    match run(args).await {
        Err(AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            eprintln!("This gateway has already been started");
            std::process::exit(2);
        },
        result => result,
    }
}
