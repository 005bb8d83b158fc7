//! Semantic checks of a parsed recipe against the calibration config.
//!
//! The validator walks the sequence the same way the executor does, tracking
//! the current move target, so a `servo cl` poured from a pump-assigned
//! target needs no `pour_time`.

use thiserror::Error;

use super::command::{Command, ServoAmount};
use crate::config_store::{is_numeric_target, Config, POUR_TIME_KEY};

/// A command that cannot run with the given config.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("'{command}': {reason}")]
pub struct ValidationError {
    pub command: Command,
    pub reason: String,
}

impl ValidationError {
    pub fn new(command: &Command, reason: impl Into<String>) -> Self {
        Self {
            command: command.clone(),
            reason: reason.into(),
        }
    }
}

/// Validate a recipe, returning the first violation.
pub fn validate(commands: &[Command], config: &Config) -> Result<(), ValidationError> {
    match validation_report(commands, config).into_iter().next() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Collect every violation in the recipe, in recipe order.
pub fn validation_report(commands: &[Command], config: &Config) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut current_target: Option<&str> = None;

    for command in commands {
        match command {
            Command::Move { target } => {
                if config.resolve_position(target).is_none() {
                    errors.push(ValidationError::new(
                        command,
                        format!("no entry for '{}' in the configuration", target),
                    ));
                }
                current_target = (!is_numeric_target(target)).then_some(target.as_str());
            }
            Command::Servo(ServoAmount::Centiliters(_)) => {
                let pump_backed = current_target
                    .and_then(|target| config.resolve_pump_for(target))
                    .is_some();
                if !pump_backed && !config.has_pour_time() {
                    errors.push(ValidationError::new(
                        command,
                        format!("no '{}' in the configuration for 'servo cl'", POUR_TIME_KEY),
                    ));
                }
            }
            // `servo ms` values are integers by construction; waits resolve
            // unknown placeholders to a default at execution time.
            Command::Servo(ServoAmount::Millis(_))
            | Command::Wait(_)
            | Command::Start
            | Command::Note { .. }
            | Command::Done => {}
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::parser::parse;

    fn pump_config() -> Config {
        let mut config = Config::new();
        config.set_entry("pump2", "vodka");
        config.set_entry("pump2_position", 300);
        config.set_entry("gin", 120);
        config
    }

    #[test]
    fn test_unknown_target_rejected() {
        let commands = parse("start\nmove syrupX\ndone").unwrap();
        let err = validate(&commands, &pump_config()).unwrap_err();
        assert_eq!(err.command, Command::move_to("syrupX"));
        assert!(err.to_string().contains("move syrupX"));
    }

    #[test]
    fn test_numeric_and_configured_targets_accepted() {
        let commands = parse("move 15\nmove gin\nmove vodka").unwrap();
        assert!(validate(&commands, &pump_config()).is_ok());
    }

    #[test]
    fn test_servo_cl_under_pump_needs_no_pour_time() {
        let commands = parse("move vodka\nservo cl 2").unwrap();
        assert!(validate(&commands, &pump_config()).is_ok());
    }

    #[test]
    fn test_servo_cl_without_pour_time_rejected() {
        let commands = parse("move gin\nservo cl 2").unwrap();
        let err = validate(&commands, &pump_config()).unwrap_err();
        assert_eq!(err.command, Command::servo_cl(2.0));
        assert!(err.reason.contains("pour_time"));
    }

    #[test]
    fn test_numeric_move_clears_pump_target() {
        let commands = parse("move vodka\nmove 10\nservo cl 2").unwrap();
        assert!(validate(&commands, &pump_config()).is_err());

        let mut config = pump_config();
        config.set_entry("pour_time", 2000);
        assert!(validate(&commands, &config).is_ok());
    }

    #[test]
    fn test_report_collects_all_errors() {
        let commands = parse("move rum\nservo cl 1\nmove cola\nwait whenever").unwrap();
        let errors = validation_report(&commands, &pump_config());
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0].command, Command::move_to("rum"));
        assert_eq!(errors[2].command, Command::move_to("cola"));
    }
}
