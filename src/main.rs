//! smart-launch - SMART on FHIR launch client
//!
#![doc = "Main entry point for the smart-launch command-line client."]

use anyhow::Result;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use smart_launch::cli::{Cli, Commands};
use smart_launch::commands;
use smart_launch::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    init_tracing(cli.verbose, cli.json_logs);

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/smart-launch.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    match cli.command {
        Commands::Discover { server_url } => {
            tracing::info!("Resolving security endpoints for {}", server_url);
            commands::discover::run_discover(&config, &server_url).await
        }
        Commands::Authorize {
            iss,
            fhir_service_url,
            launch,
            print_only,
        } => {
            tracing::info!("Starting launch");
            let args = commands::authorize::AuthorizeArgs {
                iss,
                fhir_service_url,
                launch,
                print_only,
            };
            commands::authorize::run_authorize(&config, args).await
        }
        Commands::Complete { callback_url } => {
            tracing::info!("Completing launch");
            commands::complete::run_complete(&config, &callback_url).await
        }
        Commands::Init { current_url } => {
            tracing::info!("Initializing launch");
            commands::init::run_init(&config, current_url).await
        }
        Commands::Session { key } => commands::session::run_session(&config, key).await,
    }
}

/// Initialize tracing subscriber with environment filter
///
/// `RUST_LOG` wins over `--verbose`.  Logs are written to stderr so command
/// output on stdout stays machine readable.
fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose {
        "smart_launch=debug"
    } else {
        "smart_launch=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
