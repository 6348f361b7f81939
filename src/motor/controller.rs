use log::{info, warn};
use tokio::sync::watch;
use tokio::time::{sleep, Duration};

use crate::device::constants::MOTOR_COUNT;
use crate::device::session::{DeviceSession, LinkSettings};
use crate::device::transport::LinkTransport;
use crate::device::types::{PeripheralRef, SessionState};
use crate::error::ControllerError;
use crate::motor::command::{CommandRequest, Direction, MotorCommand};

/// Outcome of [`MotorController::stop_all_motors`]. Every motor was attempted; `failed` lists the
/// ones whose stop command was not acknowledged.
#[derive(Debug, Default)]
pub struct StopReport {
    pub failed: Vec<(u8, ControllerError)>,
}

impl StopReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Operator-facing API of the arm.
///
/// Commands are validated before anything reaches the session, and written in the order they
/// are issued; awaiting each call is what orders "move, then stop".
pub struct MotorController<T: LinkTransport> {
    session: DeviceSession<T>,
}

impl<T: LinkTransport> MotorController<T> {
    pub fn new(transport: T, settings: LinkSettings) -> Self {
        MotorController { session: DeviceSession::new(transport, settings) }
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn is_connected(&self) -> bool {
        self.session.state().is_ready()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe()
    }

    pub fn peripheral(&self) -> Option<&PeripheralRef> {
        self.session.peripheral()
    }

    pub async fn scan(&mut self, timeout: Duration) -> Result<PeripheralRef, ControllerError> {
        Ok(self.session.scan(timeout).await?)
    }

    pub async fn connect(&mut self, peripheral: &PeripheralRef) -> Result<(), ControllerError> {
        Ok(self.session.connect(peripheral).await?)
    }

    pub async fn scan_and_connect(&mut self, timeout: Duration) -> Result<PeripheralRef, ControllerError> {
        Ok(self.session.scan_and_connect(timeout).await?)
    }

    /// Validates and sends. On success the command has been acknowledged by the transport,
    /// which says nothing about whether the motor moved.
    pub async fn send_command(&mut self, request: &CommandRequest) -> Result<MotorCommand, ControllerError> {
        let command = request.validate()?;
        self.send(&command).await?;
        Ok(command)
    }

    pub async fn send(&mut self, command: &MotorCommand) -> Result<(), ControllerError> {
        info!("Sending command: {}", command);
        self.session.write(&command.encode()).await?;
        Ok(())
    }

    pub async fn stop_motor(&mut self, motor: i64) -> Result<MotorCommand, ControllerError> {
        self.send_command(&CommandRequest::new(motor, Direction::Forward.as_str(), 0, None)).await
    }

    /// Stops motors 0, 1 and 2 in order. A failure on one motor never skips the others.
    pub async fn stop_all_motors(&mut self) -> StopReport {
        info!("Stopping all motors...");
        let mut report = StopReport::default();

        for motor in 0..MOTOR_COUNT {
            if let Err(err) = self.stop_motor(i64::from(motor)).await {
                warn!("Failed to stop motor {}: {}", motor, err);
                report.failed.push((motor, err));
            }
        }

        report
    }

    pub async fn disconnect(&mut self) {
        self.session.disconnect().await
    }

    pub async fn check_link(&mut self) -> SessionState {
        self.session.check_link().await
    }

    /// Sweeps each motor forward and back, moves all three together, then stops everything.
    /// If a step fails the remaining script is skipped, but the arm is still told to stop.
    pub async fn demo_sequence(&mut self) -> Result<(), ControllerError> {
        info!("Starting demo sequence...");

        let result = self.run_demo().await;
        let report = self.stop_all_motors().await;

        match result {
            Err(err) => {
                warn!("Demo aborted: {}", err);
                Err(err)
            },
            Ok(()) => match report.failed.into_iter().next() {
                Some((_, err)) => Err(err),
                None => {
                    info!("Demo completed!");
                    Ok(())
                },
            },
        }
    }

    async fn run_demo(&mut self) -> Result<(), ControllerError> {
        for motor in 0..MOTOR_COUNT {
            info!("Moving motor {} forward for 2 seconds...", motor);
            self.send(&MotorCommand::new(motor, Direction::Forward, 150, Some(2000))?).await?;
            sleep(Duration::from_millis(2500)).await;

            info!("Moving motor {} backward for 1.5 seconds...", motor);
            self.send(&MotorCommand::new(motor, Direction::Backward, 150, Some(1500))?).await?;
            sleep(Duration::from_millis(2000)).await;

            sleep(Duration::from_millis(500)).await;
        }

        info!("Synchronized movement with different durations...");
        let synchronized = [
            (0, Direction::Forward, 3000),
            (1, Direction::Backward, 2000),
            (2, Direction::Forward, 1500),
        ];
        for (motor, direction, duration) in synchronized {
            self.send(&MotorCommand::new(motor, direction, 100, Some(duration))?).await?;
        }
        sleep(Duration::from_millis(3500)).await;

        Ok(())
    }
}
