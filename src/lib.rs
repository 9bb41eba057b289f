pub mod cli;
pub mod config;
pub mod error;
pub mod fetch;
mod logger;
pub mod output;
pub mod platform;
pub mod progress;
pub mod prompt;
pub mod steamcmd;
pub mod store;

pub use config::{AppPaths, Settings};
pub use error::{ConfigError, FetchError, StoreError};
pub use fetch::{Credentials, DepotFetcher, FetchLocks, FetchOptions, FetchRequest};
pub use platform::{Platform, APP_ID};
pub use progress::{EventSink, FetchEvent};
pub use prompt::{GuardCodePrompt, TerminalPrompt};
pub use steamcmd::SteamCmd;
pub use store::VersionStore;

use clap::Parser;

pub fn run() {
    let cli = cli::Cli::parse();
    if let Err(e) = cli::execute(cli) {
        log::error!("{e:#}");
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
