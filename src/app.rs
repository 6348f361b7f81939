//! What the binaries do once their arguments are parsed.

use std::future;
use std::path::Path;
use log::{info, warn};
use tokio::io::{stdin, BufReader};
use tokio::net::TcpListener;
use tokio::time::Duration;

use crate::cli::local::{print_stop_report, run_local_shell};
use crate::cli::remote::run_remote_shell;
use crate::config::io::ConfigIO;
use crate::config::types::Config;
use crate::device::transport::LinkTransport;
use crate::error::AppRunError;
use crate::gateway::client::{GatewayClient, WsConnector};
use crate::gateway::relay::Relay;
use crate::gateway::server::create_router;
use crate::motor::controller::MotorController;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalCommand {
    /// Report the first matching peripheral and exit.
    Scan,
    /// Connect and open the interactive shell.
    Connect,
    /// Connect and run the demo sequence.
    Demo,
}

pub async fn load_config(path: Option<&Path>) -> Result<(ConfigIO, Config), AppRunError> {
    let config_io = ConfigIO::open(path)?;
    let config = config_io.read().await?;
    Ok((config_io, config))
}

/// Resolves on Ctrl-C. If the handler can not be installed it never resolves.
pub async fn interrupted() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", err);
        future::pending::<()>().await;
    }
}

async fn local_command<T: LinkTransport>(controller: &mut MotorController<T>, command: LocalCommand, scan_timeout: Duration) -> Result<(), AppRunError> {
    match command {
        LocalCommand::Scan => {
            let peripheral = controller.scan(scan_timeout).await?;
            println!("Found {} [{}]", peripheral, peripheral.id);
        },
        LocalCommand::Connect => {
            let peripheral = controller.scan_and_connect(scan_timeout).await?;
            println!("Connected to {}", peripheral);
            run_local_shell(controller, scan_timeout, BufReader::new(stdin())).await?;
        },
        LocalCommand::Demo => {
            let peripheral = controller.scan_and_connect(scan_timeout).await?;
            println!("Connected to {}", peripheral);
            controller.demo_sequence().await?;
        },
    }
    Ok(())
}

/// Runs one local command. The arm is disconnected afterwards, whether the command succeeded,
/// failed or was interrupted.
pub async fn run_local<T: LinkTransport>(transport: T, config: &Config, command: LocalCommand, scan_timeout: Duration) -> Result<(), AppRunError> {
    let mut controller = MotorController::new(transport, config.device.link_settings());

    let result = tokio::select! {
        result = local_command(&mut controller, command, scan_timeout) => result,
        _ = interrupted() => {
            info!("Interrupted");
            Ok(())
        },
    };

    if controller.is_connected() {
        print_stop_report(&controller.stop_all_motors().await);
    }
    controller.disconnect().await;
    result
}

/// Interactive session through a gateway. The arm stays connected for other sessions.
pub async fn run_remote(config: &Config, url: Option<String>) -> Result<(), AppRunError> {
    let url = url.unwrap_or_else(|| config.client.url.clone());
    info!("Using gateway {}", url);

    let (client, events) = GatewayClient::start(WsConnector::new(url), config.client.reconnect_policy());

    let result = tokio::select! {
        result = run_remote_shell(&client, events, BufReader::new(stdin())) => result,
        _ = interrupted() => {
            info!("Interrupted");
            Ok(())
        },
    };

    client.close().await;
    result
}

/// Serves the relay on `listener` until Ctrl-C, then stops the motors and disconnects.
pub async fn serve<T: LinkTransport>(transport: T, config: &Config, listener: TcpListener) -> Result<(), AppRunError> {
    let controller = MotorController::new(transport, config.device.link_settings());
    let relay = Relay::new(controller, config.device.scan_timeout());
    let shutdown = relay.shutdown_token();

    let status = relay.spawn_status_broadcast(shutdown.clone());
    let watchdog = relay.spawn_link_watchdog(config.gateway.link_check_interval(), shutdown.clone());

    info!("Gateway listening on {}", listener.local_addr()?);
    let release = relay.clone();
    let result = axum::serve(listener, create_router(relay))
        .with_graceful_shutdown(async move {
            interrupted().await;
            info!("Shutting down");
            release.release().await;
        })
        .await;

    shutdown.cancel();
    for task in [status, watchdog] {
        if let Err(err) = task.await {
            warn!("Background task failed: {}", err);
        }
    }

    Ok(result?)
}
