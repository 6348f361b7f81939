use crate::error::ShellError;
use crate::motor::command::CommandRequest;
use crate::motor::state::joint;

/// Speed used by `raise` and `lower` when none is given.
pub const DEFAULT_JOINT_SPEED: i64 = 150;

pub const HELP: &str = "\
Commands:
  m <motor> <direction> <speed> [duration]  move a motor (0-2, forward|backward, 0-255, ms)
  raise <motor> [speed] [duration]          raise a joint (opens the claw)
  lower <motor> [speed] [duration]          lower a joint (closes the claw)
  stop [motor]                              stop one motor, or all of them
  status                                    show the connection and commanded motors
  pos <motor> <percent>                     note a joint's position (remote only)
  connect                                   scan for the arm and connect
  disconnect                                disconnect from the arm
  retry                                     reconnect to the gateway after giving up (remote only)
  help                                      show this help
  quit                                      disconnect and exit";

const MOVE_USAGE: &str = "m <motor> <direction> <speed> [duration]";
const JOINT_USAGE: &str = "raise|lower <motor> [speed] [duration]";
const STOP_USAGE: &str = "stop [motor]";
const POSITION_USAGE: &str = "pos <motor> <percent>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Empty,
    Move(CommandRequest),
    /// `None` stops every motor.
    Stop(Option<i64>),
    Position { motor: u8, percent: u8 },
    Status,
    Connect,
    Disconnect,
    Retry,
    Help,
    Quit,
}

fn number(arg: &str) -> Result<i64, ShellError> {
    arg.parse::<i64>().map_err(|_| ShellError::NotANumber(arg.to_string()))
}

fn optional_number(arg: Option<&&str>) -> Result<Option<i64>, ShellError> {
    arg.map(|arg| number(arg)).transpose()
}

/// Parses one line. Only the syntax is checked here; motor, speed and duration ranges are
/// left to command validation so the shell reports the same errors as the gateway.
pub fn parse_line(line: &str) -> Result<ShellCommand, ShellError> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some(first) = parts.first() else {
        return Ok(ShellCommand::Empty);
    };
    let args = &parts[1..];

    match first.to_lowercase().as_str() {
        "m" | "move" => {
            if args.len() < 3 || args.len() > 4 {
                return Err(ShellError::Usage(MOVE_USAGE));
            }
            let request = CommandRequest::new(number(args[0])?, args[1].to_lowercase(), number(args[2])?, optional_number(args.get(3))?);
            Ok(ShellCommand::Move(request))
        },
        verb @ ("raise" | "lower") => {
            if args.is_empty() || args.len() > 3 {
                return Err(ShellError::Usage(JOINT_USAGE));
            }
            let motor = number(args[0])?;
            let joint = u8::try_from(motor).ok()
                .and_then(joint)
                .ok_or(ShellError::NoSuchMotor(motor))?;
            let direction = if verb == "raise" { joint.raise } else { joint.lower() };
            let speed = optional_number(args.get(1))?.unwrap_or(DEFAULT_JOINT_SPEED);

            Ok(ShellCommand::Move(CommandRequest::new(motor, direction.as_str(), speed, optional_number(args.get(2))?)))
        },
        "stop" => match args {
            [] => Ok(ShellCommand::Stop(None)),
            [motor] => Ok(ShellCommand::Stop(Some(number(motor)?))),
            _ => Err(ShellError::Usage(STOP_USAGE)),
        },
        "pos" | "position" => match args {
            [motor, percent] => {
                let motor = number(motor)?;
                let motor = u8::try_from(motor).ok()
                    .filter(|motor| joint(*motor).is_some())
                    .ok_or(ShellError::NoSuchMotor(motor))?;
                let percent = number(percent)?.clamp(0, 100) as u8;
                Ok(ShellCommand::Position { motor, percent })
            },
            _ => Err(ShellError::Usage(POSITION_USAGE)),
        },
        "status" => Ok(ShellCommand::Status),
        "connect" => Ok(ShellCommand::Connect),
        "disconnect" => Ok(ShellCommand::Disconnect),
        "retry" => Ok(ShellCommand::Retry),
        "help" | "?" => Ok(ShellCommand::Help),
        "quit" | "exit" | "q" => Ok(ShellCommand::Quit),
        _ => Err(ShellError::UnknownCommand(first.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_with_and_without_duration() {
        assert_eq!(
            parse_line("m 0 forward 150").unwrap(),
            ShellCommand::Move(CommandRequest::new(0, "forward", 150, None)),
        );
        assert_eq!(
            parse_line("  M 2 Backward 80 1500 ").unwrap(),
            ShellCommand::Move(CommandRequest::new(2, "backward", 80, Some(1500))),
        );
    }

    #[test]
    fn ranges_are_left_to_validation() {
        let ShellCommand::Move(request) = parse_line("m 7 sideways 300").unwrap() else {
            panic!("expected a move");
        };
        assert_eq!(request.validate().unwrap_err().kind(), "InvalidMotor");
    }

    #[test]
    fn syntax_errors() {
        assert_eq!(parse_line("m 0 forward"), Err(ShellError::Usage(MOVE_USAGE)));
        assert_eq!(parse_line("m zero forward 10"), Err(ShellError::NotANumber("zero".to_string())));
        assert_eq!(parse_line("stop 1 2"), Err(ShellError::Usage(STOP_USAGE)));
        assert_eq!(parse_line("dance"), Err(ShellError::UnknownCommand("dance".to_string())));
        assert_eq!(parse_line("raise 3"), Err(ShellError::NoSuchMotor(3)));
    }

    #[test]
    fn joints_use_their_own_direction() {
        assert_eq!(
            parse_line("raise 1").unwrap(),
            ShellCommand::Move(CommandRequest::new(1, "backward", DEFAULT_JOINT_SPEED, None)),
        );
        assert_eq!(
            parse_line("lower 0 90 400").unwrap(),
            ShellCommand::Move(CommandRequest::new(0, "backward", 90, Some(400))),
        );
    }

    #[test]
    fn simple_commands() {
        assert_eq!(parse_line("").unwrap(), ShellCommand::Empty);
        assert_eq!(parse_line("stop").unwrap(), ShellCommand::Stop(None));
        assert_eq!(parse_line("stop 2").unwrap(), ShellCommand::Stop(Some(2)));
        assert_eq!(parse_line("quit").unwrap(), ShellCommand::Quit);
        assert_eq!(parse_line("help").unwrap(), ShellCommand::Help);
        assert_eq!(parse_line("retry").unwrap(), ShellCommand::Retry);
    }

    #[test]
    fn position_is_clamped_to_percent() {
        assert_eq!(parse_line("pos 2 40").unwrap(), ShellCommand::Position { motor: 2, percent: 40 });
        assert_eq!(parse_line("position 0 250").unwrap(), ShellCommand::Position { motor: 0, percent: 100 });
        assert_eq!(parse_line("pos 5 10"), Err(ShellError::NoSuchMotor(5)));
        assert_eq!(parse_line("pos 1"), Err(ShellError::Usage(POSITION_USAGE)));
    }
}
