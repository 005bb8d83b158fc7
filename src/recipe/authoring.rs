//! Building recipes in memory.
//!
//! Covers the three ways a recipe is produced without hand-editing text:
//! generating one from an ingredient list, reading the ingredient amounts back
//! out of an existing recipe, and substituting new amounts into a stored
//! recipe for a one-off custom run.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::command::{Command, ServoAmount};
use super::validator::{validate, ValidationError};
use crate::config_store::{Config, WaitPlaceholder};

/// Largest volume poured by one `servo cl` step in a generated recipe.
pub const MAX_POUR_CL: f64 = 2.0;

/// Largest volume accepted for a single ingredient.
pub const MAX_INGREDIENT_CL: f64 = 100.0;

/// Platform position a generated recipe parks at before `done`.
pub const PARK_POSITION: &str = "10";

/// A named ingredient and its volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    pub name: String,
    pub amount_cl: f64,
}

impl Ingredient {
    pub fn new(name: impl Into<String>, amount_cl: f64) -> Self {
        Self {
            name: name.into(),
            amount_cl,
        }
    }
}

/// Errors raised while generating a recipe.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthoringError {
    #[error("Ingredient list is empty")]
    NoIngredients,

    #[error("Ingredient name is missing")]
    MissingName,

    #[error("Amount for '{name}' must be greater than 0, got {amount_cl}")]
    NonPositiveAmount { name: String, amount_cl: f64 },

    #[error("Amount for '{name}' must be a number up to {max} cl, got {amount_cl}", max = MAX_INGREDIENT_CL)]
    AmountOutOfRange { name: String, amount_cl: f64 },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Generate a recipe that pours `ingredients` in order and parks the platform.
///
/// # Errors
///
/// Fails on an empty list, a blank name, an amount that is not positive or
/// exceeds `MAX_INGREDIENT_CL`, or if the generated recipe does not validate
/// against `config`.
pub fn generate_recipe(
    ingredients: &[Ingredient],
    config: &Config,
) -> Result<Vec<Command>, AuthoringError> {
    if ingredients.is_empty() {
        return Err(AuthoringError::NoIngredients);
    }

    let mut commands = vec![Command::Start];
    for ingredient in ingredients {
        let name = ingredient.name.trim();
        if name.is_empty() {
            return Err(AuthoringError::MissingName);
        }
        check_amount(name, ingredient.amount_cl, false)?;
        commands.push(Command::move_to(name));
        commands.push(Command::wait_for(WaitPlaceholder::MoveWait));
        commands.extend(pour_block(ingredient.amount_cl));
    }
    commands.push(Command::move_to(PARK_POSITION));
    commands.push(Command::Done);

    validate(&commands, config)?;
    Ok(commands)
}

/// Reject amounts `pour_block` cannot turn into a finite recipe.
fn check_amount(name: &str, amount_cl: f64, allow_zero: bool) -> Result<(), AuthoringError> {
    if amount_cl.is_nan() || amount_cl > MAX_INGREDIENT_CL {
        return Err(AuthoringError::AmountOutOfRange {
            name: name.to_string(),
            amount_cl,
        });
    }
    if amount_cl < 0.0 || (amount_cl == 0.0 && !allow_zero) {
        return Err(AuthoringError::NonPositiveAmount {
            name: name.to_string(),
            amount_cl,
        });
    }
    Ok(())
}

/// Pour steps for `amount_cl`: full `MAX_POUR_CL` pours separated by refill
/// waits, then the remainder followed by a drip wait. `amount_cl` must have
/// passed `check_amount`.
fn pour_block(amount_cl: f64) -> Vec<Command> {
    let mut steps = Vec::new();
    let mut remaining = amount_cl;
    while remaining > MAX_POUR_CL {
        steps.push(Command::servo_cl(MAX_POUR_CL));
        steps.push(Command::wait_for(WaitPlaceholder::RefillWait));
        remaining = round_cl(remaining - MAX_POUR_CL);
    }
    if remaining > 0.0 {
        steps.push(Command::servo_cl(remaining));
        steps.push(Command::wait_for(WaitPlaceholder::DripWait));
    }
    steps
}

fn round_cl(cl: f64) -> f64 {
    (cl * 100.0).round() / 100.0
}

/// Total `servo cl` volume poured per move target, in first-seen order.
pub fn ingredient_amounts(commands: &[Command]) -> Vec<Ingredient> {
    let mut amounts: Vec<Ingredient> = Vec::new();
    let mut current: Option<&str> = None;

    for command in commands {
        match command {
            Command::Move { target } => current = Some(target.as_str()),
            Command::Servo(ServoAmount::Centiliters(cl)) => {
                let Some(target) = current else { continue };
                match amounts.iter_mut().find(|i| i.name == target) {
                    Some(existing) => existing.amount_cl += cl,
                    None => amounts.push(Ingredient::new(target, *cl)),
                }
            }
            _ => {}
        }
    }
    amounts
}

/// Replace the poured volume of the overridden ingredients.
///
/// Within each move segment of an overridden target, every `servo cl` step and
/// the wait directly following it are replaced by one `pour_block` for the new
/// amount, emitted where the first pour used to be. An override of 0 removes
/// the pours entirely. Targets without an override are left untouched.
///
/// # Errors
///
/// Fails if an override is negative, not a number, or above
/// `MAX_INGREDIENT_CL`.
pub fn substitute_amounts(
    commands: &[Command],
    overrides: &[Ingredient],
) -> Result<Vec<Command>, AuthoringError> {
    for o in overrides {
        check_amount(&o.name, o.amount_cl, true)?;
    }

    let mut out = Vec::with_capacity(commands.len());
    let mut current: Option<&str> = None;
    let mut segment_poured = false;
    let mut drop_next_wait = false;

    for command in commands {
        match command {
            Command::Move { target } => {
                current = Some(target.as_str());
                segment_poured = false;
                drop_next_wait = false;
                out.push(command.clone());
            }
            Command::Servo(ServoAmount::Centiliters(_)) => {
                let amount = current.and_then(|target| {
                    overrides
                        .iter()
                        .find(|o| o.name == target)
                        .map(|o| o.amount_cl)
                });
                match amount {
                    Some(amount) => {
                        if !segment_poured {
                            out.extend(pour_block(amount));
                            segment_poured = true;
                        }
                        drop_next_wait = true;
                    }
                    None => {
                        drop_next_wait = false;
                        out.push(command.clone());
                    }
                }
            }
            Command::Wait(_) if drop_next_wait => drop_next_wait = false,
            _ => {
                drop_next_wait = false;
                out.push(command.clone());
            }
        }
    }
    Ok(out)
}

/// Canonical recipe text, one command per line.
pub fn render(commands: &[Command]) -> String {
    let mut text = commands
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n");
    text.push('\n');
    text
}
