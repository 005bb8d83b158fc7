use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config_store::PumpId;
use crate::executor::TransportFailurePolicy;
use crate::recipe::authoring::MAX_INGREDIENT_CL;
use crate::recipe::Ingredient;
use crate::settings::{AppSettings, TransportKind};

/// Bartender - recipe runner for the pump and servo dispensing rig
#[derive(Parser, Debug)]
#[command(name = "bartender")]
#[command(about = "Run, author and validate drink recipes on the dispensing rig")]
#[command(version)]
pub struct Cli {
    /// Settings file (JSON); flags below override its values
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// Transport to the controller (http, serial, dry-run)
    #[arg(long, global = true)]
    pub transport: Option<TransportKind>,

    /// Controller base URL for the HTTP transport
    #[arg(long, global = true)]
    pub device_url: Option<String>,

    /// Substring identifying the serial adapter (e.g. ttyUSB)
    #[arg(long, global = true)]
    pub serial_pattern: Option<String>,

    /// Directory holding the recipe files
    #[arg(long, global = true)]
    pub recipe_dir: Option<PathBuf>,

    /// Calibration config file
    #[arg(long, global = true)]
    pub config_file: Option<PathBuf>,

    /// What to do when a request fails mid-run (abort, continue)
    #[arg(long, global = true)]
    pub on_transport_error: Option<TransportFailurePolicy>,

    /// Log device requests instead of sending them
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List stored recipes and whether they validate
    List,
    /// Validate a stored recipe against the calibration config
    Validate {
        /// Recipe name (".txt" optional)
        recipe: String,
    },
    /// Run a stored recipe and follow its progress
    Run {
        /// Recipe name (".txt" optional)
        recipe: String,
        /// Override an ingredient amount for this run only (name=cl)
        #[arg(long = "amount", value_parser = parse_ingredient)]
        amounts: Vec<Ingredient>,
    },
    /// Generate and store a recipe from an ingredient list
    Generate {
        /// Name of the new recipe
        name: String,
        /// Ingredient to pour, in order (name=cl)
        #[arg(long = "ingredient", required = true, value_parser = parse_ingredient)]
        ingredients: Vec<Ingredient>,
        /// Replace an existing recipe with the same name
        #[arg(long)]
        force: bool,
    },
    /// Show the ingredient amounts a recipe pours
    Ingredients {
        /// Recipe name (".txt" optional)
        recipe: String,
    },
    /// Check whether the controller is online
    Status,
    /// Send a single command to the controller
    Send {
        #[command(subcommand)]
        request: SendCommands,
    },
    /// Show or edit the calibration config
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum SendCommands {
    /// Move the platform to a position in mm
    Move { position: i64 },
    /// Actuate the pour servo for a number of ms
    Servo { delay: u64 },
    /// Run a pump for a number of ms
    Pump {
        #[arg(value_parser = parse_pump)]
        pump: PumpId,
        duration: u64,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the calibration config
    Show,
    /// Set a single key (numbers are stored as numbers)
    Set { key: String, value: String },
    /// Store calibration for one pump slot
    CalibratePump {
        #[arg(short, long, value_parser = parse_pump)]
        pump: PumpId,
        /// Drink served by this pump (keeps the current one if omitted)
        #[arg(short, long)]
        drink: Option<String>,
        /// Flow rate in ms per cl
        #[arg(short, long)]
        flow: i64,
        /// Platform position in mm
        #[arg(long)]
        position: i64,
    },
}

/// Parse `name=cl`.
pub fn parse_ingredient(s: &str) -> Result<Ingredient, String> {
    let (name, amount) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=cl, got '{}'", s))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing ingredient name in '{}'", s));
    }
    let amount_cl: f64 = amount
        .trim()
        .parse()
        .map_err(|_| format!("invalid amount '{}' for {}", amount.trim(), name))?;
    if !(0.0..=MAX_INGREDIENT_CL).contains(&amount_cl) {
        return Err(format!(
            "amount for {} must be between 0 and {} cl",
            name, MAX_INGREDIENT_CL
        ));
    }
    Ok(Ingredient::new(name, amount_cl))
}

fn parse_pump(s: &str) -> Result<PumpId, String> {
    s.parse::<u8>()
        .ok()
        .and_then(PumpId::new)
        .ok_or_else(|| format!("pump must be 1-{}", crate::config_store::PUMP_COUNT))
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }

    /// Apply command-line overrides to `settings`.
    pub fn apply_overrides(&self, settings: &mut AppSettings) {
        if let Some(transport) = self.transport {
            settings.transport = transport;
        }
        if self.dry_run {
            settings.transport = TransportKind::DryRun;
        }
        if let Some(url) = &self.device_url {
            settings.device_url = url.clone();
        }
        if let Some(pattern) = &self.serial_pattern {
            settings.serial_port_pattern = pattern.clone();
        }
        if let Some(dir) = &self.recipe_dir {
            settings.recipe_dir = dir.clone();
        }
        if let Some(file) = &self.config_file {
            settings.config_file = file.clone();
        }
        if let Some(policy) = self.on_transport_error {
            settings.on_transport_error = policy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["bartender"]).is_err());
    }

    #[test]
    fn test_cli_run_with_amounts() {
        let cli = Cli::try_parse_from([
            "bartender",
            "run",
            "mojito",
            "--amount",
            "rum=4",
            "--amount",
            "lime=1.5",
        ])
        .unwrap();
        match cli.command {
            Commands::Run { recipe, amounts } => {
                assert_eq!(recipe, "mojito");
                assert_eq!(amounts, vec![Ingredient::new("rum", 4.0), Ingredient::new("lime", 1.5)]);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_generate_requires_ingredient() {
        assert!(Cli::try_parse_from(["bartender", "generate", "shot"]).is_err());
        assert!(
            Cli::try_parse_from(["bartender", "generate", "shot", "--ingredient", "vodka=2"])
                .is_ok()
        );
    }

    #[test]
    fn test_cli_send_pump() {
        let cli = Cli::try_parse_from(["bartender", "send", "pump", "2", "2000"]).unwrap();
        match cli.command {
            Commands::Send {
                request: SendCommands::Pump { pump, duration },
            } => {
                assert_eq!(pump.get(), 2);
                assert_eq!(duration, 2000);
            }
            _ => panic!("Expected Send Pump command"),
        }
        assert!(Cli::try_parse_from(["bartender", "send", "pump", "5", "2000"]).is_err());
    }

    #[test]
    fn test_cli_calibrate_pump() {
        let cli = Cli::try_parse_from([
            "bartender",
            "config",
            "calibrate-pump",
            "--pump",
            "1",
            "--drink",
            "vodka",
            "--flow",
            "950",
            "--position",
            "300",
        ]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_overrides_apply_over_settings() {
        let cli = Cli::try_parse_from([
            "bartender",
            "--dry-run",
            "--recipe-dir",
            "/srv/recipes",
            "--on-transport-error",
            "continue",
            "status",
        ])
        .unwrap();
        let mut settings = AppSettings::default();
        cli.apply_overrides(&mut settings);
        assert_eq!(settings.transport, TransportKind::DryRun);
        assert_eq!(settings.recipe_dir, PathBuf::from("/srv/recipes"));
        assert_eq!(settings.on_transport_error, TransportFailurePolicy::Continue);
    }

    #[test]
    fn test_parse_ingredient() {
        assert_eq!(parse_ingredient("gin = 3").unwrap(), Ingredient::new("gin", 3.0));
        assert!(parse_ingredient("gin").is_err());
        assert!(parse_ingredient("=3").is_err());
        assert!(parse_ingredient("gin=-1").is_err());
        assert!(parse_ingredient("gin=inf").is_err());
        assert!(parse_ingredient("gin=1e300").is_err());
        assert!(parse_ingredient("gin=NaN").is_err());
    }
}
