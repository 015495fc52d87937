//! Probe backends: pluggable worker bodies that decide what a "check"
//! means on the wire.

use std::sync::Arc;
use std::time::Duration;

use wdog::probe::ProbeCtx;

mod config;
mod exec;

pub use self::config::BackendConfig;
pub use self::exec::ExecBackend;

/// A pluggable per-destination prober.
///
/// `probe` is run on a dedicated thread for each watched destination, with
/// the context as its sole channel back to the supervisor. The contract:
///
/// * call `ctx.confirm_startup` exactly once, first; on failure the
///   worker returns without doing anything else;
/// * periodically `ctx.publish` a complete check;
/// * observe quit promptly (`ctx.wait_quit` between cycles);
/// * call `ctx.retire` on the way out, so the thread can be reaped.
pub trait Backend: Send + Sync + 'static {
    fn probe(&self, ctx: Arc<ProbeCtx>);
}

/// Builds the backend selected by the configuration. `interval` is the
/// router tick; backends that pace themselves probe at this cadence so
/// every aggregation sees a fresh result.
pub fn new_backend(config: &BackendConfig, interval: Duration) -> Arc<dyn Backend> {
    match *config {
        BackendConfig::Null => Arc::new(NullBackend),
        BackendConfig::Exec { ref cmd } => Arc::new(ExecBackend::new(cmd, interval)),
    }
}

/// The prober used when no watchdog is configured: confirms startup,
/// then sleeps until told to quit. Its destinations never produce a
/// result, so their weights stay at zero until removed.
pub struct NullBackend;

impl Backend for NullBackend {
    fn probe(&self, ctx: Arc<ProbeCtx>) {
        ctx.confirm_startup(Ok(()));
        ctx.park_until_quit();
        ctx.retire();
    }
}
