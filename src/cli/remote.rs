use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::cli::interactive::{parse_line, ShellCommand, HELP};
use crate::cli::local::prompt;
use crate::error::{AppRunError, ClientError};
use crate::gateway::client::{ChannelState, ClientEvent, GatewayClient};

fn print_event(event: &ClientEvent) {
    match event {
        ClientEvent::Channel(ChannelState::GaveUp) => println!("\nGateway unreachable; type 'retry' to try again"),
        ClientEvent::Channel(state) => println!("\nGateway: {:?}", state),
        ClientEvent::Response(response) if response.error => {
            println!("\n{} failed: {}", response.command, response.message);
        },
        ClientEvent::Response(response) => {
            let robot = if response.robot_connected { "connected" } else { "disconnected" };
            println!("\n{}: {} (robot {})", response.command, response.message, robot);
        },
    }
}

fn report(result: Result<(), ClientError>) {
    if let Err(err) = result {
        println!("Error: {}", err);
    }
}

fn print_status(client: &GatewayClient) {
    println!("Gateway: {:?}, robot connected: {}", client.state(), client.robot_connected());
    for motor in client.commanded().motors {
        match motor.direction {
            Some(direction) if motor.is_moving => println!("  {} {}: {} at {}", motor.id, motor.name, direction, motor.speed),
            _ => println!("  {} {}: stopped", motor.id, motor.name),
        }
        println!("    position {}%", motor.position);
    }
}

/// Interactive session through the gateway. Leaving it closes the channel but leaves the arm
/// connected for other sessions.
pub async fn run_remote_shell<R: AsyncBufRead + Unpin>(
    client: &GatewayClient,
    mut events: broadcast::Receiver<ClientEvent>,
    input: R,
) -> Result<(), AppRunError> {
    println!("{}", HELP);
    let mut lines = input.lines();

    loop {
        prompt("remote> ");

        let line = tokio::select! {
            line = lines.next_line() => line?,
            event = events.recv() => {
                match event {
                    Ok(event) => print_event(&event),
                    Err(RecvError::Lagged(skipped)) => println!("\n({} gateway messages skipped)", skipped),
                    Err(RecvError::Closed) => break,
                }
                continue;
            },
        };
        let Some(line) = line else {
            println!();
            break;
        };

        let command = match parse_line(&line) {
            Ok(command) => command,
            Err(err) => {
                println!("{}", err);
                continue;
            },
        };

        match command {
            ShellCommand::Empty => {},
            ShellCommand::Quit => break,
            ShellCommand::Help => println!("{}", HELP),
            ShellCommand::Status => print_status(client),
            ShellCommand::Connect => report(client.connect_robot()),
            ShellCommand::Disconnect => report(client.disconnect_robot()),
            ShellCommand::Move(request) => report(client.move_motor(&request).map(|_| ())),
            ShellCommand::Stop(Some(motor)) => match u8::try_from(motor) {
                Ok(motor) => report(client.stop_motor(motor).map(|_| ())),
                Err(_) => println!("No motor {}", motor),
            },
            ShellCommand::Stop(None) => report(client.stop_all()),
            ShellCommand::Position { motor, percent } => client.set_position(motor, percent),
            ShellCommand::Retry => {
                if !client.retry() {
                    println!("Gateway channel is {:?}; nothing to retry", client.state());
                }
            },
        }
    }

    client.close().await;
    Ok(())
}
