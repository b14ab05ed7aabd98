pub mod cli;
pub mod config;
pub mod logging;
pub mod server;

use anyhow::Result;

use crate::cli::{Cli, Commands};
use crate::config::Config;

/// Executes the parsed command line.
pub async fn run(cli: Cli) -> Result<()> {
	let mut config = Config::load(cli.config.as_deref())?;
	match cli.command {
		Commands::Serve(args) => {
			config.apply(&args);
			server::serve(config).await
		}
		Commands::Config(args) => {
			config.apply(&args);
			println!("{}", config.to_pretty_json()?);
			Ok(())
		}
	}
}
