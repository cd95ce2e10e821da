//! `ocapn`: diagnostics for the OCapN crates.
//!
//! Everything runs in-process; no network listener is opened.

mod cli;
mod cmd;

use crate::cli::{Cli, Commands};
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = ocapn_types::config::load_config(cli.config.as_deref());
    let result = match cli.command {
        Commands::Handshake {
            initiator_encodings,
            responder_encodings,
        } => cmd::handshake::cmd_handshake(&config, initiator_encodings, responder_encodings),
        Commands::Demo => cmd::demo::cmd_demo(&config),
        Commands::Config => cmd::config::cmd_config_show(&config, cli.config.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
