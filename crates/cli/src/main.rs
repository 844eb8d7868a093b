// FILE: crates/cli/src/main.rs

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgMatches, Command};
use console::style;
use mirrorsync_config::{Config, ConfigManager};
use std::path::PathBuf;

mod commands;
mod demo;
mod simulate;

fn build_cli() -> Command {
    Command::new("mirrorsync")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Mirrorsync Team")
        .about("Offline-first record synchronization against an in-memory reference server")
        .arg(
            Arg::new("config-dir")
                .short('c')
                .long("config-dir")
                .value_name("DIR")
                .help("Directory holding config.toml (defaults to the platform config dir)")
                .value_parser(value_parser!(PathBuf))
                .global(true),
        )
        .subcommand(
            Command::new("config")
                .about("Manage the configuration file")
                .subcommand_required(true)
                .subcommand(Command::new("init").about("Write a default config file if none exists"))
                .subcommand(Command::new("show").about("Print the effective configuration"))
                .subcommand(Command::new("validate").about("Check the config file for problems")),
        )
        .subcommand(
            Command::new("demo")
                .about("Walk one record through create, update and remove")
                .arg(
                    Arg::new("no-save")
                        .long("no-save")
                        .help("Do not write the state snapshot afterwards")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(Command::new("status").about("Summarize the saved state snapshot"))
        .subcommand(
            Command::new("simulate")
                .about("Race random edits from several clients against a flaky server")
                .arg(
                    Arg::new("clients")
                        .long("clients")
                        .value_name("N")
                        .help("Number of independent clients")
                        .value_parser(value_parser!(usize))
                        .default_value("3"),
                )
                .arg(
                    Arg::new("ops")
                        .long("ops")
                        .value_name("N")
                        .help("Random operations per client")
                        .value_parser(value_parser!(usize))
                        .default_value("1000"),
                )
                .arg(
                    Arg::new("latency-ms")
                        .long("latency-ms")
                        .value_name("MS")
                        .help("Upper bound of injected latency per server call")
                        .value_parser(value_parser!(u64))
                        .default_value("2"),
                )
                .arg(
                    Arg::new("failure-rate")
                        .long("failure-rate")
                        .value_name("RATE")
                        .help("Probability in [0, 1] that a server call fails")
                        .value_parser(value_parser!(f64))
                        .default_value("0.1"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .value_name("SEED")
                        .help("Seed for the operation generator")
                        .value_parser(value_parser!(u64)),
                ),
        )
}

fn config_manager(matches: &ArgMatches) -> Result<ConfigManager> {
    match matches.get_one::<PathBuf>("config-dir") {
        Some(dir) => ConfigManager::with_directory(dir.clone())
            .with_context(|| format!("Failed to open config directory {}", dir.display())),
        None => ConfigManager::new().context("Failed to locate the config directory"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();
    let manager = config_manager(&matches)?;

    let config = match manager.load_with_env_overrides() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}, using defaults", style("!").yellow().bold(), e);
            Config::default()
        }
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.app.log_level.to_string()),
    )
    .init();

    match matches.subcommand() {
        Some(("config", sub_matches)) => match sub_matches.subcommand() {
            Some(("init", _)) => commands::init_config(&manager),
            Some(("show", _)) => commands::show_config(&manager, &config),
            Some(("validate", _)) => commands::validate_config(&manager),
            _ => {
                build_cli().print_help()?;
                Ok(())
            }
        },
        Some(("demo", sub_matches)) => {
            let state_path = (!sub_matches.get_flag("no-save")).then(|| manager.state_path(&config));
            demo::run(&config, state_path.as_deref()).await
        }
        Some(("status", _)) => commands::show_status(&manager.state_path(&config)),
        Some(("simulate", sub_matches)) => {
            let options = simulate::SimulationOptions::from_matches(sub_matches)?;
            simulate::run(&config, &options).await
        }
        _ => {
            build_cli().print_help()?;
            Ok(())
        }
    }
}
