//! Command-line argument parsing for the `xpcd` daemon binary.
//!
//! `xpcd` has three subcommands: `serve` runs the real listener plus
//! FileCoordination arbiter over a Unix domain socket, `demo-server` starts
//! the same stack over an in-process loopback transport for local
//! inspection, and `demo-client` dials a running `serve` instance and drives
//! a scripted exchange against it.

use std::path::PathBuf;

use clap::{
    builder::styling::{AnsiColor, Styles},
    Parser, Subcommand,
};

/// Defines the styles for the help message to replicate clap v3's appearance.
fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Yellow.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// `xpcd` - an NSXPC-style object messaging daemon with a FileCoordination
/// arbiter.
///
/// The daemon exposes a root proxy object over a duplex transport, routes
/// invocations to exported objects through a per-connection read loop, and
/// arbitrates concurrent file access intents through a path-keyed wait
/// queue.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None, styles = styles())]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Increase diagnostic log verbosity on stderr.
    ///
    /// Can be used multiple times to increase detail:
    ///  -v: info
    ///  -vv: debug
    ///  -vvv: trace
    /// By default, only WARNING and ERROR messages are shown.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Silence user-facing informational output on stdout.
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the listener and FileCoordination arbiter over a Unix domain
    /// socket.
    Serve {
        /// Filesystem path of the Unix domain socket to bind.
        #[arg(long, default_value = crate::defaults::SOCKET_PATH)]
        socket: PathBuf,

        /// Name this endpoint is advertised under in the name service.
        #[arg(long, default_value = crate::defaults::SERVICE_NAME)]
        service_name: String,

        /// Per-call timeout, in seconds, for invocations that expect a reply.
        #[arg(long, default_value_t = crate::defaults::CALL_TIMEOUT_SECS)]
        call_timeout_secs: u64,
    },

    /// Run the same stack as `serve`, but over an in-process loopback
    /// transport, and drive a scripted exchange against it for inspection.
    DemoServer {
        /// Number of distinct paths to coordinate access to during the demo.
        #[arg(long, default_value_t = crate::defaults::DEMO_PATH_COUNT)]
        paths: usize,
    },

    /// Connect to a running `serve` daemon and drive a scripted invocation
    /// exchange against its root proxy.
    DemoClient {
        /// Filesystem path of the Unix domain socket to connect to.
        #[arg(long, default_value = crate::defaults::SOCKET_PATH)]
        socket: PathBuf,
    },
}
