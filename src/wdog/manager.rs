use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tacho::{self, Timing};

use super::{change_dst_in, Registry, Shared};
use super::super::{Router, WeightedAddr};
use backend::Backend;

/// Relative weight change below which router updates are suppressed.
const WEIGHT_TOLERANCE: f64 = 0.1;

/// Weight given to destinations first seen in gossip.
const DISCOVERED_WEIGHT: f64 = 1.0;

const WARMUP_ROUNDS: usize = 10;
const WARMUP_PAUSE: Duration = Duration::from_millis(100);

/// The supervisor: owns the periodic aggregation loop on its own thread.
pub struct Manager {
    shared: Arc<Shared>,
    backend: Arc<dyn Backend>,
    router: Arc<dyn Router>,
    interval: Duration,
    metrics: Metrics,
}

struct Metrics {
    dsts: tacho::Gauge,
    fresh: tacho::Gauge,
    updates: tacho::Gauge,
    discovered: tacho::Counter,
    reaped: tacho::Counter,
    collect_us: tacho::Stat,
}

pub fn new(shared: Arc<Shared>,
           backend: Arc<dyn Backend>,
           router: Arc<dyn Router>,
           interval: Duration,
           metrics: &tacho::Scope)
           -> Manager {
    let metrics = metrics.clone().prefixed("wdog");
    Manager {
        shared,
        backend,
        router,
        interval,
        metrics: Metrics {
            dsts: metrics.gauge("dsts"),
            fresh: metrics.gauge("fresh"),
            updates: metrics.gauge("updates"),
            discovered: metrics.counter("discovered"),
            reaped: metrics.counter("reaped"),
            collect_us: metrics.stat("collect_us"),
        },
    }
}

impl Manager {
    /// The supervisor thread body: warm up, signal the creator, then
    /// aggregate once per tick until asked to quit.
    pub fn run(self) {
        let mut reg = self.shared.reg.lock().expect("watchdog lock poisoned");

        if !reg.dsts.is_empty() {
            // freshly preloaded: try to confirm at least one destination
            // before the creator proceeds
            let mut rounds = WARMUP_ROUNDS;
            let mut fresh = self.collect(&mut reg);
            while fresh == 0 && rounds > 0 {
                rounds -= 1;
                thread::sleep(WARMUP_PAUSE);
                fresh = self.collect(&mut reg);
            }
        }

        reg.started = true;
        self.shared.cond.notify_all();
        debug!("watchdog supervisor running, tick {:?}", self.interval);

        let mut next = Instant::now();
        while !reg.quit {
            next += self.interval;
            loop {
                if reg.quit {
                    break;
                }
                let now = Instant::now();
                if now >= next {
                    break;
                }
                let (guard, _) = self.shared
                    .cond
                    .wait_timeout(reg, next - now)
                    .expect("watchdog lock poisoned");
                reg = guard;
            }
            if reg.quit {
                break;
            }
            self.collect(&mut reg);
        }

        reg.joined = true;
        self.shared.cond.notify_all();
        debug!("watchdog supervisor stopped");
    }

    /// One aggregation tick. Returns the number of fresh observations.
    ///
    /// Two passes: drain every worker's result slot, then walk the list in
    /// reverse deciding weights, publishing router updates and reaping
    /// terminated workers. Reverse order keeps swap-with-last removal from
    /// disturbing indices still to be visited.
    pub fn collect(&self, reg: &mut Registry) -> usize {
        let t0 = Instant::now();

        let mut max_lat = 0.0;
        for ep in reg.dsts.iter_mut() {
            ep.copy_result(&mut max_lat);
        }

        let mut fresh = 0;
        let mut updates = 0;
        for i in (0..reg.dsts.len()).rev() {
            if reg.dsts[i].is_joined() {
                let mut ep = reg.dsts.swap_remove(i);
                ep.join();
                self.metrics.reaped.incr(1);
                debug!("reaped {}", ep.addr());
                continue;
            }

            let new_weight = {
                let ep = &reg.dsts[i];
                if ep.pending.ready {
                    fresh += 1;
                    ep.result_weight(max_lat)
                } else {
                    // nothing heard from the worker: hold the destination
                    0.0
                }
            };

            let ep = &mut reg.dsts[i];
            if should_publish(ep.effective, new_weight) {
                if self.router.change_dst(ep.addr(), new_weight) {
                    trace!("{}: weight {} -> {}", ep.addr(), ep.effective, new_weight);
                    ep.effective = new_weight;
                    updates += 1;
                } else {
                    debug!("{}: router refused weight {}", ep.addr(), new_weight);
                }
            }
        }

        self.discover(reg);

        self.metrics.dsts.set(reg.dsts.len());
        self.metrics.fresh.set(fresh);
        self.metrics.updates.set(updates);
        self.metrics.collect_us.add(t0.elapsed_us());
        fresh
    }

    /// Folds changed gossip payloads back into the destination set.
    /// Unknown addresses join as self-discovered; known ones are left
    /// untouched, whatever weight their gossiper suggests.
    fn discover(&self, reg: &mut Registry) {
        let mut found: Vec<SocketAddr> = Vec::new();
        for ep in reg.dsts.iter_mut() {
            if !ep.memb_changed {
                continue;
            }
            ep.memb_changed = false;
            for tok in ep.pending.others.split_whitespace() {
                match tok.parse() {
                    Ok(addr) => found.push(addr),
                    Err(_) => debug!("{}: unparseable gossip entry {:?}", ep.addr(), tok),
                }
            }
        }

        for addr in found {
            if reg.find(&addr).is_some() {
                continue;
            }
            info!("discovered {} via gossip", addr);
            let dst = WeightedAddr(addr, DISCOVERED_WEIGHT);
            match change_dst_in(reg, &self.backend, &dst, false) {
                Ok(_) => self.metrics.discovered.incr(1),
                Err(e) => warn!("could not add discovered {}: {}", addr, e),
            }
        }
    }
}

/// The hysteresis gate: suppress router chat from micro-jitter, but let
/// anything touching or crossing zero straight through.
fn should_publish(old: f64, new: f64) -> bool {
    if new == old {
        return false;
    }
    new <= 0.0 || old <= 0.0 || (new / old - 1.0).abs() > WEIGHT_TOLERANCE
}

#[test]
fn publish_gate() {
    // no change
    assert!(!should_publish(1.0, 1.0));
    // within tolerance
    assert!(!should_publish(2.0, 1.92));
    assert!(!should_publish(1.0, 1.05));
    // the relative change is measured against the published weight
    assert!(!should_publish(1.0, 1.095));
    assert!(should_publish(1.0, 1.105));
    // beyond tolerance
    assert!(should_publish(1.0, 2.0));
    assert!(should_publish(2.0, 1.0));
    // anything non-positive goes through
    assert!(should_publish(1.0, 0.0));
    assert!(should_publish(1.0, -1.0));
    assert!(should_publish(-1.0, 1.0));
    // first publication from the zero initial state
    assert!(should_publish(0.0, 1.0));
}
