//! Main entry point for the order service.
//!
//! This binary loads the service configuration, wires the configured storage
//! backend into an order service and runs a single lifecycle command against
//! it.

use clap::Parser;
use order_config::Config;
use order_core::{OrderService, OrderServiceBuilder};
use std::path::PathBuf;

mod commands;

use commands::Command;
use order_storage::implementations::file::create_storage as create_file_storage;
use order_storage::implementations::memory::create_storage as create_memory_storage;

/// Command-line arguments for the order service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,

	#[command(subcommand)]
	command: Command,
}

/// Main entry point for the order service.
///
/// Parses arguments, initializes logging, loads the configuration, builds the
/// service and runs the requested command. Output goes to stdout, logs to
/// stderr.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

	fmt()
		.with_env_filter(env_filter)
		.with_writer(std::io::stderr)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	let config_path = args
		.config
		.to_str()
		.ok_or_else(|| format!("Configuration path is not valid UTF-8: {}", args.config.display()))?;
	let config = Config::from_file(config_path).await?;
	tracing::info!("Loaded configuration [{}]", config.service.id);

	let service = build_service(config)?;
	let output = commands::run(args.command, &service).await?;
	println!("{}", output);

	Ok(())
}

/// Macro to create a factory HashMap with the appropriate type aliases
macro_rules! create_factory_map {
    ($interface:path, $error:path, $( $name:literal => $factory:expr ),* $(,)?) => {{
        let mut factories = std::collections::HashMap::new();
        $(
            factories.insert(
                $name.to_string(),
                $factory as fn(&toml::Value) -> Result<Box<dyn $interface>, $error>
            );
        )*
        factories
    }};
}

/// Builds the order service with the available storage backends.
fn build_service(config: Config) -> Result<OrderService, Box<dyn std::error::Error>> {
	let storage_factories = create_factory_map!(
		order_storage::StorageInterface,
		order_storage::StorageError,
		"file" => create_file_storage,
		"memory" => create_memory_storage,
	);

	Ok(OrderServiceBuilder::new(config).build(storage_factories)?)
}
