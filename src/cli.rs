//! Command-line interface definition for smart-launch
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for discovery, launching, and session inspection.

use clap::{Parser, Subcommand};

/// smart-launch - SMART on FHIR launch client
///
/// Discovers authorization endpoints, runs the authorization code flow
/// against a FHIR server and manages the resulting sessions.
#[derive(Parser, Debug, Clone)]
#[command(name = "smart-launch")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/smart-launch.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Override the session storage directory
    #[arg(long, env = "SMART_STORAGE_PATH", global = true)]
    pub storage_path: Option<String>,

    /// Keep sessions in memory only
    #[arg(long, global = true)]
    pub in_memory: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for smart-launch
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Resolve the authorization endpoints of a FHIR server
    Discover {
        /// FHIR server base URL
        server_url: String,
    },

    /// Start a launch and complete it through the browser
    Authorize {
        /// FHIR server requiring authorization
        #[arg(long)]
        iss: Option<String>,

        /// FHIR server to use without authorization
        #[arg(long)]
        fhir_service_url: Option<String>,

        /// EHR launch token
        #[arg(long)]
        launch: Option<String>,

        /// Only print the redirect URL; do not open a browser
        #[arg(long)]
        print_only: bool,
    },

    /// Complete a launch from the URL the authorization server redirected to
    Complete {
        /// Full callback URL including `code` and `state`
        callback_url: String,
    },

    /// Complete, revive or start a launch depending on the current URL
    Init {
        /// URL of the current page
        current_url: Option<String>,
    },

    /// Show a stored session
    Session {
        /// Session key; defaults to the most recently authorized session
        key: Option<String>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/smart-launch.yaml".to_string()),
            verbose: false,
            json_logs: false,
            storage_path: None,
            in_memory: false,
            command: Commands::Session { key: None },
        }
    }
}
