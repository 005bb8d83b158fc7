//! Bartender - command-line entry point
//!
//! Loads settings, builds the transport and dispatches subcommands.

use anyhow::{bail, Context, Result};
use std::thread;
use std::time::Duration;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use bartender::cli::{Cli, Commands, ConfigCommands, SendCommands};
use bartender::config_store::{Config, ConfigStore, ConfigValue};
use bartender::recipe::{
    generate_recipe, ingredient_amounts, parse, render, validation_report, Ingredient,
    RecipeStore,
};
use bartender::settings::AppSettings;
use bartender::transport::DeviceRequest;

/// How often `run` polls the progress cell.
const PROGRESS_POLL: Duration = Duration::from_millis(250);

/// Initialize tracing; `RUST_LOG` overrides the default `info` level.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse_args();
    debug!("CLI arguments parsed: {:?}", cli);

    let mut settings = match &cli.settings {
        Some(path) => AppSettings::load_from_file(path)?,
        None => AppSettings::default(),
    };
    cli.apply_overrides(&mut settings);
    settings.validate().context("Invalid settings")?;

    let recipes = RecipeStore::new(&settings.recipe_dir);
    let config_store = ConfigStore::new(&settings.config_file);

    match cli.command {
        Commands::List => list_recipes(&recipes, &config_store.load()),
        Commands::Validate { recipe } => validate_recipe(&recipes, &config_store.load(), &recipe),
        Commands::Run { recipe, amounts } => {
            run_recipe(&settings, &recipes, &recipe, &amounts, config_store.load())
        }
        Commands::Generate {
            name,
            ingredients,
            force,
        } => {
            if recipes.exists(&name) && !force {
                bail!("Recipe '{}' already exists (use --force to replace it)", name);
            }
            let commands = generate_recipe(&ingredients, &config_store.load())?;
            let file_name = recipes.save(&name, &render(&commands))?;
            println!("✓ Saved {} ({} steps)", file_name, commands.len());
            Ok(())
        }
        Commands::Ingredients { recipe } => {
            let commands = parse(&recipes.load(&recipe)?)?;
            for ingredient in ingredient_amounts(&commands) {
                println!("{:<20} {:>6} cl", ingredient.name, ingredient.amount_cl);
            }
            Ok(())
        }
        Commands::Status => {
            let dispenser = settings.build_dispenser()?;
            if dispenser.device_online() {
                println!("✓ Controller online ({})", dispenser.transport().describe());
                Ok(())
            } else {
                eprintln!("✗ Controller offline ({})", dispenser.transport().describe());
                std::process::exit(1);
            }
        }
        Commands::Send { request } => {
            let request = match request {
                SendCommands::Move { position } => DeviceRequest::Move { position },
                SendCommands::Servo { delay } => DeviceRequest::Servo { delay },
                SendCommands::Pump { pump, duration } => DeviceRequest::Pump { pump, duration },
            };
            let dispenser = settings.build_dispenser()?;
            let response = dispenser
                .send_manual(request)
                .with_context(|| format!("Failed to send {}", request))?;
            println!("✓ {}: {}", request, response.message);
            Ok(())
        }
        Commands::Config { action } => edit_config(&config_store, action),
    }
}

fn list_recipes(recipes: &RecipeStore, config: &Config) -> Result<()> {
    let names = recipes.list()?;
    if names.is_empty() {
        println!("No recipes in {:?}", recipes.dir());
        return Ok(());
    }
    for name in names {
        let problems = match recipes.load(&name).map(|text| parse(&text)) {
            Ok(Ok(commands)) => validation_report(&commands, config)
                .iter()
                .map(ToString::to_string)
                .collect(),
            Ok(Err(e)) => vec![e.to_string()],
            Err(e) => vec![e.to_string()],
        };
        if problems.is_empty() {
            println!("✓ {}", name);
        } else {
            println!("✗ {} - {}", name, problems.join("; "));
        }
    }
    Ok(())
}

fn validate_recipe(recipes: &RecipeStore, config: &Config, recipe: &str) -> Result<()> {
    let commands = match parse(&recipes.load(recipe)?) {
        Ok(commands) => commands,
        Err(e) => {
            error!("Recipe '{}' does not parse: {}", recipe, e);
            eprintln!("✗ {}", e);
            std::process::exit(1);
        }
    };
    let problems = validation_report(&commands, config);
    if problems.is_empty() {
        println!("✓ Recipe is valid: {} ({} commands)", recipe, commands.len());
        return Ok(());
    }
    for problem in &problems {
        eprintln!("✗ {}", problem);
    }
    std::process::exit(1);
}

fn run_recipe(
    settings: &AppSettings,
    recipes: &RecipeStore,
    recipe: &str,
    amounts: &[Ingredient],
    config: Config,
) -> Result<()> {
    let dispenser = settings.build_dispenser()?;
    let handle = dispenser.start_stored(recipes, recipe, amounts, config)?;
    let recipe = handle.recipe().to_string();

    let mut last_progress = None;
    while !handle.is_finished() {
        let status = dispenser.current_progress();
        if last_progress != Some(status.progress) {
            println!("{:>3}% {}", status.progress, recipe);
            last_progress = Some(status.progress);
        }
        thread::sleep(PROGRESS_POLL);
    }

    let result = handle.wait();
    let notes = dispenser.last_notes();
    for note in &notes.notes {
        println!("  note: {}", note);
    }

    match result {
        Ok(report) => {
            println!(
                "✓ {} finished ({} requests, {} failed)",
                recipe, report.requests_sent, report.failed_requests
            );
            Ok(())
        }
        Err(e) => {
            error!("Run of '{}' failed: {}", recipe, e);
            eprintln!("✗ {} failed: {}", recipe, e);
            std::process::exit(1);
        }
    }
}

fn edit_config(store: &ConfigStore, action: ConfigCommands) -> Result<()> {
    match action {
        ConfigCommands::Show => {
            let config = store.load();
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigCommands::Set { key, value } => {
            let mut config = store.load();
            config.set_entry(key.trim(), ConfigValue::from_input(&value));
            store.save(config)?;
            println!("✓ {} = {}", key.trim(), value.trim());
        }
        ConfigCommands::CalibratePump {
            pump,
            drink,
            flow,
            position,
        } => {
            let mut config = store.load();
            config.calibrate_pump(pump, drink.as_deref(), flow, position);
            store.save(config)?;
            println!("✓ Pump {} calibrated: {} ms/cl at {} mm", pump, flow, position);
        }
    }
    Ok(())
}
