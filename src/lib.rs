//! A backend health watchdog for TCP load balancers.
//!
//! The watchdog keeps one probe worker thread per backend destination,
//! periodically aggregates the workers' results, turns latencies into
//! effective weights, and feeds weight changes to the router through a
//! single `Router::change_dst` seam. Destinations may be added, removed
//! and reweighted while the watchdog runs; destinations learned from peer
//! gossip join the set as self-discovered and leave it again when their
//! probes report them gone.

#[macro_use]
extern crate log;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate serde_json;
extern crate serde_yaml;
extern crate tacho;

use std::fmt;
use std::net::SocketAddr;

pub mod backend;
pub mod router;
pub mod wdog;

pub use backend::{Backend, BackendConfig, ExecBackend, NullBackend};
pub use router::Router;
pub use wdog::{Error, Watchdog};
pub use wdog::config::{DstConfig, WdogConfig};
pub use wdog::probe::{Check, CheckState, ProbeCtx};

/// An address/weight pair, as understood by the router.
///
/// A negative weight asks for the destination's removal.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct WeightedAddr(pub SocketAddr, pub f64);

/// An invalid configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfigError(String);

impl From<String> for ConfigError {
    fn from(msg: String) -> ConfigError {
        ConfigError(msg)
    }
}

impl<'a> From<&'a str> for ConfigError {
    fn from(msg: &'a str) -> ConfigError {
        ConfigError(msg.to_string())
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl ::std::error::Error for ConfigError {
    fn description(&self) -> &str {
        &self.0
    }
}
