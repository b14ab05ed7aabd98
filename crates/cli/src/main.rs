use clap::Parser;
use otpgate_cli::cli::Cli;
use otpgate_cli::logging;
use tracing::error;

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	if let Err(err) = otpgate_cli::run(cli).await {
		error!(target: "otpgate", error = %format!("{err:#}"), "command failed");
		std::process::exit(1);
	}
}
