//! Command-line entry point for generated server binaries.
//!
//! A generated server's `main` hands its service factory and registry to
//! [`run`], which parses the `-m/-h/-p` surface and stands up the matching
//! serve mode. The built-in `-h` help short flag is demoted to `--help` so
//! `-h` can mean *host*, as the other language bindings expect.

use std::sync::Arc;

use agnos_proto::PackerRegistry;
use clap::{Parser, ValueEnum};

use crate::error::ServerError;
use crate::servers::{LibraryModeServer, ServiceFactory, SimpleServer, ThreadedServer};

/// Serving modes selectable with `-m`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// One client at a time.
    Simple,
    /// One thread per connection.
    Threaded,
    /// Ephemeral port, stdout handshake, exactly one client.
    #[value(alias = "library")]
    Lib,
}

/// Command-line surface of an Agnos server binary.
#[derive(Parser, Debug)]
#[command(name = "agnos-server", disable_help_flag = true)]
#[command(about = "Agnos RPC server")]
pub struct Args {
    /// Serving mode
    #[arg(short = 'm', long, value_enum, default_value_t = Mode::Simple)]
    pub mode: Mode,

    /// Bind address
    #[arg(short = 'h', long, default_value = "127.0.0.1")]
    pub host: String,

    /// Bind port; required for simple and threaded modes, 0 lets library
    /// mode pick an ephemeral port
    #[arg(short = 'p', long, default_value_t = 0)]
    pub port: u16,

    /// Print help
    #[arg(long, action = clap::ArgAction::Help)]
    help: Option<bool>,
}

/// Parse the process arguments and serve.
///
/// Invalid switches make `clap` exit the process with a non-zero status;
/// bind failures and mode/port mismatches return an error for `main` to
/// report.
pub fn run(
    factory: Arc<dyn ServiceFactory>,
    registry: Arc<PackerRegistry>,
) -> Result<(), ServerError> {
    run_with(Args::parse(), factory, registry)
}

/// Serve with explicit, already-parsed arguments.
pub fn run_with(
    args: Args,
    factory: Arc<dyn ServiceFactory>,
    registry: Arc<PackerRegistry>,
) -> Result<(), ServerError> {
    tracing::info!(mode = ?args.mode, host = %args.host, port = args.port, "starting server");
    match args.mode {
        Mode::Simple => {
            if args.port == 0 {
                return Err(ServerError::Switch("simple mode requires a port".into()));
            }
            SimpleServer::bind(&args.host, args.port, factory, registry)?.serve()
        }
        Mode::Threaded => {
            if args.port == 0 {
                return Err(ServerError::Switch("threaded mode requires a port".into()));
            }
            ThreadedServer::bind(&args.host, args.port, factory, registry)?.serve()
        }
        Mode::Lib => {
            LibraryModeServer::bind_to(&args.host, args.port, factory, registry)?.serve()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dash_h_is_the_host_switch() {
        let args =
            Args::try_parse_from(["srv", "-m", "threaded", "-h", "0.0.0.0", "-p", "1717"]).unwrap();
        assert_eq!(args.mode, Mode::Threaded);
        assert_eq!(args.host, "0.0.0.0");
        assert_eq!(args.port, 1717);
    }

    #[test]
    fn library_alias_is_accepted() {
        let args = Args::try_parse_from(["srv", "-m", "library"]).unwrap();
        assert_eq!(args.mode, Mode::Lib);
        assert_eq!(args.port, 0);
    }

    #[test]
    fn defaults_match_the_simple_mode_contract() {
        let args = Args::try_parse_from(["srv"]).unwrap();
        assert_eq!(args.mode, Mode::Simple);
        assert_eq!(args.host, "127.0.0.1");
    }

    #[test]
    fn unknown_switches_are_rejected() {
        assert!(Args::try_parse_from(["srv", "-x"]).is_err());
    }
}
