use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "otpgate")]
#[command(about = "Phone-verification login orchestrator with an HTTP control surface")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// JSON configuration file with `contract`, `settings`, `server` and `browser` sections
	#[arg(short, long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Run the HTTP control surface
	Serve(ServeArgs),

	/// Print the effective configuration as JSON
	Config(ServeArgs),
}

/// Flags that override values from the configuration file.
#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
	/// Address to bind
	#[arg(long)]
	pub host: Option<String>,

	/// Port to bind
	#[arg(short, long)]
	pub port: Option<u16>,

	/// Show the browser window during acquisition
	#[arg(long)]
	pub headful: bool,

	/// Path to the Chrome/Chromium binary
	#[arg(long, value_name = "PATH")]
	pub chrome: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn serve_flags_parse() {
		let cli = Cli::parse_from(["otpgate", "-vv", "serve", "--port", "9000", "--headful"]);
		assert_eq!(cli.verbose, 2);
		let Commands::Serve(args) = cli.command else {
			panic!("expected serve");
		};
		assert_eq!(args.port, Some(9000));
		assert!(args.headful);
		assert!(args.host.is_none());
	}

	#[test]
	fn config_flag_is_global() {
		let cli = Cli::parse_from(["otpgate", "config", "--config", "otpgate.json"]);
		assert_eq!(cli.config, Some(PathBuf::from("otpgate.json")));
		assert!(matches!(cli.command, Commands::Config(_)));
	}
}
