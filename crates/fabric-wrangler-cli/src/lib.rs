//! Library half of the `fcw` binary: profile loading, session setup and
//! JSON output.

pub mod commands;
pub mod config;
pub mod error;
pub mod output;

pub use commands::{Call, Deploy, Package, Seed, Session};
pub use config::{NetworkProfile, PeerProfile};
pub use error::{CliError, CliResult};
