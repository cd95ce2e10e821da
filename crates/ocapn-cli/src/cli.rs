//! Clap CLI definitions for the `ocapn` binary.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  ocapn handshake               Run a local Noise handshake and report sizes
  ocapn handshake -e 0 -e 1     Offer encodings 0 and 1
  ocapn demo                    Two loopback clients exchanging CapTP calls
  ocapn config                  Print the effective client configuration";

/// Diagnostics for OCapN sessions and CapTP.
#[derive(Parser)]
#[command(name = "ocapn", version, about, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a SYN/SYNACK/ACK exchange between two in-process peers.
    Handshake {
        /// Encodings the initiator offers. Defaults to the configured set.
        #[arg(long = "initiator-encoding", short = 'e')]
        initiator_encodings: Vec<u32>,
        /// Encodings the responder accepts. Defaults to the configured set.
        #[arg(long = "responder-encoding", short = 'r')]
        responder_encodings: Vec<u32>,
    },
    /// Connect two loopback clients and exercise bootstrap fetch and calls.
    Demo,
    /// Print the effective configuration as TOML.
    Config,
}
