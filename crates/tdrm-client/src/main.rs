//! TDRM client CLI entry point

use clap::Parser;
use tdrm_client::{exit_code, Cli, Config};
use tdrm_proto::DrmError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    if cli.config.is_none() {
        if let Err(e) = Config::create_default_if_missing() {
            eprintln!("Warning: Could not create default config: {e}");
        }
    }

    let config = match Config::load_from(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: Config error: {e}");
            eprintln!("Using default configuration.");
            Config::default()
        }
    };

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else if cli.verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match cli.execute_with_config(config, &mut out) {
        Ok(status) => exit_code(status),
        Err(e) => {
            eprintln!("Error: {e:#}");
            exit_code(DrmError::Generic.code())
        }
    }
}
