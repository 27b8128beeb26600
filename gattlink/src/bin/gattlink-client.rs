//! Interactive LE ATT client.
//!
//! Connects to a remote device on the Attribute Protocol channel and reads
//! console lines until end of input or disconnect.
//!
//! # Usage
//!
//! ```sh
//! gattlink-client -d AA:BB:CC:DD:EE:FF -t random -s medium
//! ```

use std::process::ExitCode;

use clap::Parser;
use gattlink::client;
use gattlink::config::Cli;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // --help and --version are not failures.
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match client::run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("gattlink-client: {e}");
            ExitCode::FAILURE
        }
    }
}
