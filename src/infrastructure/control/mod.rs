//! Local control socket
//!
//! `lokl start` serves [`ControlServer`] on `.lokl/lokl.sock`; every other
//! subcommand is a [`ControlClient`] sending one [`ControlRequest`].

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;

pub use client::ControlClient;
pub use error::{ControlError, Result};
pub use protocol::{ControlRequest, ControlResponse, ErrorKind, ProxyStatus, StatusReport};
pub use server::{ControlHandler, ControlServer};
