mod cli;
mod infrastructure;

use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;

use infrastructure::{
    config::{build_config, InferenceConfig},
    service_provider::ServiceProvider,
    telemetry::initialize_telemetry,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = cli::Cli::parse();
    let config = match build_config(&cli.config) {
        Ok(x) => x,
        Err(e) => {
            eprintln!("{}: {e}", "Failed to build config".red());
            return ExitCode::FAILURE;
        }
    };
    let config: InferenceConfig = match config.try_deserialize() {
        Ok(x) => x,
        Err(e) => {
            eprintln!("{}: {e}", "Invalid config".red());
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = initialize_telemetry(&config.telemetry) {
        eprintln!("{}: {e}", "Failed to initialize logger".red());
        return ExitCode::FAILURE;
    }
    let provider = match ServiceProvider::build(&config).await {
        Ok(x) => x,
        Err(e) => {
            eprintln!("{}: {e:#}", "Failed to build services".red());
            return ExitCode::FAILURE;
        }
    };

    match cli::run(&provider, &config, cli.command).await {
        Ok(value) => {
            match value {
                serde_json::Value::String(text) => print!("{text}"),
                value => println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default()),
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {e}", e.kind().red());
            let details = e.details();
            if !details.is_empty() {
                eprintln!("{}", serde_json::to_string_pretty(&details).unwrap_or_default());
            }
            ExitCode::FAILURE
        }
    }
}
