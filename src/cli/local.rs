use std::io::Write;
use log::warn;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::time::Duration;

use crate::cli::interactive::{parse_line, ShellCommand, HELP};
use crate::device::transport::LinkTransport;
use crate::error::{AppRunError, ControllerError};
use crate::motor::controller::{MotorController, StopReport};

pub(crate) fn prompt(text: &str) {
    print!("{}", text);
    if let Err(err) = std::io::stdout().flush() {
        warn!("Failed to flush stdout: {}", err);
    }
}

pub(crate) fn print_stop_report(report: &StopReport) {
    if report.is_complete() {
        println!("All motors stopped");
    }
    for (motor, err) in &report.failed {
        println!("Motor {} did not stop: {}", motor, err);
    }
}

fn report_failure(err: &ControllerError) {
    println!("Error: {}", err);
    if err.is_not_connected() {
        println!("Type 'connect' to reconnect to the arm");
    }
}

/// Interactive session driving the arm directly. Returns on `quit` or end of input; the caller
/// is responsible for disconnecting.
pub async fn run_local_shell<T: LinkTransport, R: AsyncBufRead + Unpin>(
    controller: &mut MotorController<T>,
    scan_timeout: Duration,
    input: R,
) -> Result<(), AppRunError> {
    println!("{}", HELP);
    let mut lines = input.lines();

    loop {
        prompt("arm> ");
        let Some(line) = lines.next_line().await? else {
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
            ShellCommand::Status => match controller.peripheral() {
                Some(peripheral) => println!("{} ({})", controller.state(), peripheral),
                None => println!("{}", controller.state()),
            },
            ShellCommand::Connect => {
                if controller.is_connected() {
                    println!("Already connected");
                    continue;
                }
                match controller.scan_and_connect(scan_timeout).await {
                    Ok(peripheral) => println!("Connected to {}", peripheral),
                    Err(err) => println!("Error: {}", err),
                }
            },
            ShellCommand::Disconnect => {
                controller.disconnect().await;
                println!("Disconnected");
            },
            ShellCommand::Move(request) => match controller.send_command(&request).await {
                Ok(command) => println!("Sent: {}", command),
                Err(err) => report_failure(&err),
            },
            ShellCommand::Stop(Some(motor)) => match controller.stop_motor(motor).await {
                Ok(command) => println!("Sent: {}", command),
                Err(err) => report_failure(&err),
            },
            ShellCommand::Stop(None) => print_stop_report(&controller.stop_all_motors().await),
            ShellCommand::Retry => println!("'retry' only applies to a gateway session"),
            ShellCommand::Position { .. } => println!("'pos' only applies to a gateway session"),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::session::LinkSettings;
    use crate::device::simulated::SimulatedTransport;

    const SCAN: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn drives_the_arm_line_by_line() {
        let transport = SimulatedTransport::robot_arm();
        let mut controller = MotorController::new(transport.clone(), LinkSettings::default());
        controller.scan_and_connect(SCAN).await.unwrap();

        let script: &[u8] = b"m 0 forward 150 2000\nm 5 forward 10\nnonsense\nraise 2\nstop\nquit\nm 1 forward 1\n";
        run_local_shell(&mut controller, SCAN, script).await.unwrap();

        let writes: Vec<String> = transport.writes().into_iter().map(|data| String::from_utf8(data).unwrap()).collect();
        assert_eq!(writes, vec![
            r#"{"motor":0,"direction":"forward","speed":150,"duration":2000}"#,
            r#"{"motor":2,"direction":"forward","speed":150}"#,
            r#"{"motor":0,"direction":"forward","speed":0}"#,
            r#"{"motor":1,"direction":"forward","speed":0}"#,
            r#"{"motor":2,"direction":"forward","speed":0}"#,
        ]);
        assert!(controller.is_connected());
    }

    #[tokio::test]
    async fn connects_on_request_and_ends_with_input() {
        let transport = SimulatedTransport::robot_arm();
        let mut controller = MotorController::new(transport.clone(), LinkSettings::default());

        let script: &[u8] = b"m 0 forward 10\nconnect\nm 0 forward 10\n";
        run_local_shell(&mut controller, SCAN, script).await.unwrap();

        assert!(controller.is_connected());
        assert_eq!(transport.writes().len(), 1);
    }
}
