//! Recipe language: typed commands, parsing, validation, authoring and storage.
//!
//! A recipe is plain text, one instruction per line:
//!
//! ```text
//! start
//! move vodka
//! wait move_wait
//! servo cl 2
//! wait drip_wait
//! move 10
//! done
//! ```
//!
//! Parsing produces a `Vec<Command>` which is the single representation
//! consumed by both the validator and the executor.

pub mod authoring;
pub mod command;
pub mod parser;
pub mod store;
pub mod validator;

pub use authoring::{
    generate_recipe, ingredient_amounts, render, substitute_amounts, AuthoringError, Ingredient,
};
pub use command::{Command, Keyword, ServoAmount, WaitValue};
pub use parser::{parse, ParseError};
pub use store::{RecipeStore, RecipeStoreError};
pub use validator::{validate, validation_report, ValidationError};
