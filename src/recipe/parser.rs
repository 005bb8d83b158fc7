//! Recipe text to command sequence.
//!
//! Lines are split on whitespace and blank lines are skipped, so two recipes
//! that differ only in spacing parse to the same commands.

use thiserror::Error;

use super::command::{Command, Keyword, ServoAmount, WaitValue};
use crate::config_store::is_numeric_target;

/// A recipe line that could not be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Line {line}: {reason}: '{text}'")]
pub struct ParseError {
    /// 1-based line number
    pub line: usize,
    /// The offending line, verbatim
    pub text: String,
    pub reason: String,
}

/// Parse a whole recipe.
///
/// # Errors
///
/// Returns the first line with an unknown keyword, a wrong number of
/// arguments, or an argument of the wrong type.
pub fn parse(text: &str) -> Result<Vec<Command>, ParseError> {
    let mut commands = Vec::new();
    for (index, line) in text.lines().enumerate() {
        match parse_line(line) {
            Ok(Some(command)) => commands.push(command),
            Ok(None) => {}
            Err(reason) => {
                return Err(ParseError {
                    line: index + 1,
                    text: line.to_string(),
                    reason,
                })
            }
        }
    }
    Ok(commands)
}

/// Parse a single line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<Command>, String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some((&first, args)) = tokens.split_first() else {
        return Ok(None);
    };

    let keyword: Keyword = first
        .parse()
        .map_err(|_| format!("Unknown command '{}'", first))?;

    let command = match keyword {
        Keyword::Start => {
            expect_arity(keyword, args, 0, "start")?;
            Command::Start
        }
        Keyword::Done => {
            expect_arity(keyword, args, 0, "done")?;
            Command::Done
        }
        Keyword::Move => {
            expect_arity(keyword, args, 1, "move <target>")?;
            Command::move_to(args[0])
        }
        Keyword::Servo => {
            expect_arity(keyword, args, 2, "servo ms <int> | servo cl <float>")?;
            Command::Servo(parse_servo(args[0], args[1])?)
        }
        Keyword::Wait => {
            expect_arity(keyword, args, 1, "wait <ms|placeholder>")?;
            Command::Wait(parse_wait(args[0])?)
        }
        Keyword::Note => Command::Note {
            text: args.join(" "),
        },
    };
    Ok(Some(command))
}

fn expect_arity(keyword: Keyword, args: &[&str], expected: usize, usage: &str) -> Result<(), String> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(format!(
            "'{}' takes {} argument(s), got {} (usage: {})",
            keyword,
            expected,
            args.len(),
            usage
        ))
    }
}

fn parse_servo(mode: &str, value: &str) -> Result<ServoAmount, String> {
    match mode {
        "ms" => value
            .parse::<u64>()
            .map(ServoAmount::Millis)
            .map_err(|_| format!("Invalid servo ms value '{}'", value)),
        "cl" => value
            .parse::<f64>()
            .ok()
            .filter(|cl| cl.is_finite() && *cl >= 0.0)
            .map(ServoAmount::Centiliters)
            .ok_or_else(|| format!("Invalid servo cl value '{}'", value)),
        other => Err(format!("Unknown servo mode '{}'", other)),
    }
}

fn parse_wait(value: &str) -> Result<WaitValue, String> {
    if is_numeric_target(value) {
        value
            .parse::<u64>()
            .map(WaitValue::Millis)
            .map_err(|_| format!("Wait value '{}' is out of range", value))
    } else {
        Ok(WaitValue::Placeholder(value.to_string()))
    }
}
