//! Typed recipe commands.

use std::fmt;
use strum::{Display, EnumIter, EnumString};

/// First token of a recipe line. Keywords are case-sensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Keyword {
    Start,
    Move,
    Servo,
    Wait,
    Note,
    Done,
}

/// Amount for a `servo` command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ServoAmount {
    /// `servo ms <int>`: raw servo delay, never aggregated
    Millis(u64),
    /// `servo cl <float>`: volume, converted through pump flow rate or pour time
    Centiliters(f64),
}

/// Argument of a `wait` command.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WaitValue {
    /// Literal milliseconds
    Millis(u64),
    /// Symbolic duration resolved from the config at execution time
    Placeholder(String),
}

/// One recipe instruction. Immutable once parsed.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Move { target: String },
    Servo(ServoAmount),
    Wait(WaitValue),
    Note { text: String },
    Done,
}

impl Command {
    /// Keyword this command was parsed from.
    pub fn keyword(&self) -> Keyword {
        match self {
            Self::Start => Keyword::Start,
            Self::Move { .. } => Keyword::Move,
            Self::Servo(_) => Keyword::Servo,
            Self::Wait(_) => Keyword::Wait,
            Self::Note { .. } => Keyword::Note,
            Self::Done => Keyword::Done,
        }
    }

    pub fn move_to(target: impl Into<String>) -> Self {
        Self::Move {
            target: target.into(),
        }
    }

    pub fn servo_cl(cl: f64) -> Self {
        Self::Servo(ServoAmount::Centiliters(cl))
    }

    pub fn servo_ms(ms: u64) -> Self {
        Self::Servo(ServoAmount::Millis(ms))
    }

    pub fn wait_ms(ms: u64) -> Self {
        Self::Wait(WaitValue::Millis(ms))
    }

    pub fn wait_for(placeholder: impl fmt::Display) -> Self {
        Self::Wait(WaitValue::Placeholder(placeholder.to_string()))
    }
}

impl fmt::Display for ServoAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Millis(ms) => write!(f, "ms {}", ms),
            Self::Centiliters(cl) => write!(f, "cl {}", cl),
        }
    }
}

impl fmt::Display for WaitValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Millis(ms) => write!(f, "{}", ms),
            Self::Placeholder(name) => write!(f, "{}", name),
        }
    }
}

/// Canonical recipe line for the command.
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keyword = self.keyword();
        match self {
            Self::Start | Self::Done => write!(f, "{}", keyword),
            Self::Move { target } => write!(f, "{} {}", keyword, target),
            Self::Servo(amount) => write!(f, "{} {}", keyword, amount),
            Self::Wait(value) => write!(f, "{} {}", keyword, value),
            Self::Note { text } if text.is_empty() => write!(f, "{}", keyword),
            Self::Note { text } => write!(f, "{} {}", keyword, text),
        }
    }
}
