//! The watchdog core: a locked destination registry, a mutator shared by
//! the public API and the gossip-discovery pass, and the supervisor
//! thread that aggregates probe results into router updates.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use tacho;

use backend::{self, Backend};
use super::{ConfigError, Router, WeightedAddr};

pub mod config;
pub mod probe;
mod endpoint;
mod manager;

use self::config::WdogConfig;
use self::endpoint::Endpoint;
use self::probe::ProbeCtx;

#[derive(Debug)]
pub enum Error {
    /// Asked to remove a destination that is not in the registry.
    NotPresent(SocketAddr),
    /// A probe worker could not be brought up.
    Worker(io::Error),
    /// The watchdog configuration is unusable.
    Config(ConfigError),
}

pub type Result<T> = ::std::result::Result<T, Error>;

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Worker(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Error {
        Error::Config(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::NotPresent(ref addr) => write!(f, "unknown destination: {}", addr),
            Error::Worker(ref e) => write!(f, "probe worker failed to start: {}", e),
            Error::Config(ref e) => write!(f, "configuration error: {}", e),
        }
    }
}

impl ::std::error::Error for Error {
    fn description(&self) -> &str {
        match *self {
            Error::NotPresent(_) => "unknown destination",
            Error::Worker(_) => "probe worker failed to start",
            Error::Config(_) => "configuration error",
        }
    }
}

/// State behind the supervisor lock.
pub(crate) struct Registry {
    pub dsts: Vec<Endpoint>,
    pub quit: bool,
    pub joined: bool,
    pub started: bool,
}

impl Registry {
    fn new() -> Registry {
        Registry {
            dsts: Vec::new(),
            quit: false,
            joined: false,
            started: false,
        }
    }

    pub fn find(&self, addr: &SocketAddr) -> Option<usize> {
        self.dsts.iter().position(|ep| ep.addr() == *addr)
    }
}

/// The supervisor lock and its condvar, shared between the handle and the
/// supervisor thread.
pub(crate) struct Shared {
    pub reg: Mutex<Registry>,
    pub cond: Condvar,
}

impl Shared {
    fn new() -> Shared {
        Shared {
            reg: Mutex::new(Registry::new()),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> ::std::sync::MutexGuard<Registry> {
        self.reg.lock().expect("watchdog lock poisoned")
    }
}

/// Adds, removes or reweights a destination. Callers hold the supervisor
/// lock; the gossip-discovery pass reuses this from inside a tick.
///
/// An input weight below zero means removal. Explicit destinations may
/// only be removed by an explicit caller; a non-explicit removal of one
/// merely drops its configured weight to -1, advertising unavailability.
/// Adding spawns the probe worker synchronously: the call returns once
/// the worker has confirmed startup, or with the worker's startup error.
pub(crate) fn change_dst_in(reg: &mut Registry,
                            backend: &Arc<dyn Backend>,
                            dst: &WeightedAddr,
                            explicit: bool)
                            -> Result<usize> {
    let WeightedAddr(addr, weight) = *dst;

    match reg.find(&addr) {
        None => {
            if weight < 0.0 {
                warn!("command to remove unknown destination {}", addr);
                return Err(Error::NotPresent(addr));
            }

            let ctx = Arc::new(ProbeCtx::new(addr));
            let thread = {
                let backend = backend.clone();
                let ctx = ctx.clone();
                thread::Builder::new()
                    .name(format!("probe-{}", addr))
                    .spawn(move || backend.probe(ctx))?
            };
            if let Err(e) = ctx.wait_started() {
                // worker never came up; it marked itself joined
                let _ = thread.join();
                return Err(Error::Worker(e));
            }

            debug!("watching {} *{} ({})",
                   addr,
                   weight,
                   if explicit { "explicit" } else { "discovered" });
            reg.dsts.push(Endpoint::new(addr, weight, explicit, ctx, thread));
            Ok(reg.dsts.len() - 1)
        }

        Some(i) => {
            if weight < 0.0 {
                if explicit || !reg.dsts[i].explicit {
                    info!("dropping {}", addr);
                    // the aggregator reaps the record once the worker joins
                    reg.dsts[i].signal_quit();
                } else {
                    // no right to remove, just mark it inaccessible
                    debug!("marking {} unavailable", addr);
                    reg.dsts[i].set_weight(-1.0);
                }
            } else if reg.dsts[i].weight() != weight {
                debug!("reweighting {} *{}", addr, weight);
                reg.dsts[i].set_weight(weight);
            }
            Ok(i)
        }
    }
}

/// The watchdog handle.
///
/// Construction preloads the configured destinations (all explicit) and
/// starts the supervisor thread; the call returns once the supervisor has
/// finished its warmup pass. Shutdown is synchronous and ordered: the
/// supervisor stops first, then every probe worker is signalled and
/// joined. Dropping an un-shutdown handle performs the same teardown.
pub struct Watchdog {
    shared: Arc<Shared>,
    backend: Arc<dyn Backend>,
    supervisor: Option<thread::JoinHandle<()>>,
}

impl Watchdog {
    /// Builds the backend named by the configuration and starts watching.
    pub fn new(config: &WdogConfig,
               router: Arc<dyn Router>,
               metrics: &tacho::Scope)
               -> Result<Watchdog> {
        let backend = backend::new_backend(&config.backend()?, config.interval());
        Watchdog::with_backend(config, backend, router, metrics)
    }

    /// Starts watching with an explicit backend plugin.
    pub fn with_backend(config: &WdogConfig,
                        backend: Arc<dyn Backend>,
                        router: Arc<dyn Router>,
                        metrics: &tacho::Scope)
                        -> Result<Watchdog> {
        // the watchdog overhangs the router's own tick slightly
        let interval = config.interval() * 3 / 2;

        let shared = Arc::new(Shared::new());
        let mut wdog = Watchdog {
            shared: shared.clone(),
            backend: backend.clone(),
            supervisor: None,
        };

        {
            let mut reg = shared.lock();
            for d in config.dsts() {
                let dst = WeightedAddr(d.addr, d.weight);
                if let Err(e) = change_dst_in(&mut reg, &backend, &dst, true) {
                    drop(reg);
                    error!("preload of {} failed: {}", d.addr, e);
                    wdog.reap_all();
                    return Err(e);
                }
            }
        }
        info!("watchdog starting with {} destinations", config.dsts().len());

        let manager = manager::new(shared.clone(), backend, router, interval, metrics);
        match thread::Builder::new().name("wdog".into()).spawn(move || manager.run()) {
            Ok(t) => wdog.supervisor = Some(t),
            Err(e) => {
                wdog.reap_all();
                return Err(Error::Worker(e));
            }
        }

        // wait for the warmup pass to finish
        let mut reg = shared.lock();
        while !reg.started {
            reg = shared.cond.wait(reg).expect("watchdog lock poisoned");
        }

        Ok(wdog)
    }

    /// Adds, removes or reweights a destination; see the module docs. An
    /// input weight below zero removes. `explicit` records operator
    /// intent: only explicit callers may remove explicit destinations.
    pub fn change_dst(&self, dst: &WeightedAddr, explicit: bool) -> Result<usize> {
        let mut reg = self.shared.lock();
        change_dst_in(&mut reg, &self.backend, dst, explicit)
    }

    /// Stops the supervisor and joins every probe worker before
    /// returning. No router update is issued after this returns.
    pub fn shutdown(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        let supervisor = match self.supervisor.take() {
            Some(t) => t,
            None => return,
        };

        info!("watchdog shutting down");
        {
            let mut reg = self.shared.lock();
            reg.quit = true;
            self.shared.cond.notify_all();
            while !reg.joined {
                reg = self.shared.cond.wait(reg).expect("watchdog lock poisoned");
            }
        }
        let _ = supervisor.join();

        self.reap_all();
        debug!("watchdog shutdown complete");
    }

    /// Signals and joins every worker, emptying the registry.
    fn reap_all(&self) {
        let mut dsts: Vec<Endpoint> = {
            let mut reg = self.shared.lock();
            reg.dsts.drain(..).collect()
        };
        for ep in &dsts {
            ep.signal_quit();
        }
        for ep in dsts.iter_mut() {
            ep.join();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.teardown();
    }
}
