//! Sample service server binary.
//!
//! # Usage
//!
//! ```bash
//! # One thread per connection on an explicit port
//! featuretest-server -m threaded -p 14800
//!
//! # Library mode: ephemeral port, handshake on stdout, one client
//! featuretest-server -m lib
//! ```

use std::process::ExitCode;

use agnos_testkit::{factory, registry};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // Stdout belongs to the library-mode handshake; logs go to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    match agnos_server::cmdline::run(factory(), registry()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "server failed");
            ExitCode::FAILURE
        }
    }
}
