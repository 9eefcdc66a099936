use clap::Parser;
use env_logger::Env;

use crate::cli::NetemLabCli;

/// Initialise logging and parse the command line.
///
/// Logs at `info` unless `RUST_LOG` says otherwise.
pub fn init() -> NetemLabCli {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    NetemLabCli::parse()
}
