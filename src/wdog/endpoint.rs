use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;

use super::probe::{Check, CheckState, ProbeCtx};

/// One watched destination.
///
/// Created and destroyed only under the supervisor lock; `pending` and the
/// weights are touched only by the aggregator.
pub struct Endpoint {
    addr: SocketAddr,
    /// Added by an operator (as opposed to learned from gossip). Explicit
    /// destinations are never removed by the aggregator.
    pub explicit: bool,
    /// The operator-intended capacity share.
    weight: f64,
    /// The weight most recently accepted by the router.
    pub effective: f64,
    /// The latest observation drained from the worker.
    pub pending: Check,
    /// Set when the gossip payload changed since the last aggregation.
    pub memb_changed: bool,
    last_latency: f64,
    ctx: Arc<ProbeCtx>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Endpoint {
    pub fn new(addr: SocketAddr,
               weight: f64,
               explicit: bool,
               ctx: Arc<ProbeCtx>,
               thread: thread::JoinHandle<()>)
               -> Endpoint {
        Endpoint {
            addr,
            explicit,
            weight,
            effective: 0.0,
            pending: Check::default(),
            memb_changed: false,
            last_latency: 0.0,
            ctx,
            thread: Some(thread),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn set_weight(&mut self, weight: f64) {
        self.weight = weight;
    }

    pub fn signal_quit(&self) {
        self.ctx.signal_quit();
    }

    /// True once the worker has announced termination and the thread may
    /// be reaped.
    pub fn is_joined(&self) -> bool {
        self.ctx.is_joined()
    }

    pub fn join(&mut self) {
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }

    /// Drains the worker's result slot.
    ///
    /// A fresh `READY` observation replaces the stored raw latency and
    /// publishes the mean of the two most recent raw samples, feeding the
    /// running `max_lat`; anything else keeps the previous smoothed value.
    /// A fresh `NOTFOUND` on a self-discovered destination schedules the
    /// worker for cleanup.
    pub fn copy_result(&mut self, max_lat: &mut f64) {
        let old_lat = self.pending.latency;
        let prev_raw = self.last_latency;

        if self.ctx.copy_result_out(&mut self.pending) {
            self.memb_changed = true;
        }

        if self.pending.ready && self.pending.state == CheckState::NotFound && !self.explicit {
            // gone and nobody configured it: let it remove itself
            self.ctx.signal_quit();
        }

        if self.pending.ready && self.pending.state == CheckState::Ready {
            self.last_latency = self.pending.latency;
            self.pending.latency = (self.pending.latency + prev_raw) / 2.0;
            if *max_lat < self.pending.latency {
                *max_lat = self.pending.latency;
            }
        } else {
            // nothing new; keep the previous measurement
            self.pending.latency = old_lat;
        }
    }

    /// The latency-adjusted weight for the latest observation. Only
    /// meaningful for a tick that drained fresh data.
    pub fn result_weight(&self, max_lat: f64) -> f64 {
        debug_assert!(self.pending.ready);

        match self.pending.state {
            CheckState::NotFound | CheckState::NotReady => -1.0,
            CheckState::Avoid => 0.0,
            CheckState::Ready => {
                if max_lat > 0.0 {
                    // slower destinations yield share to faster ones
                    self.weight * max_lat / self.pending.latency
                } else {
                    self.weight
                }
            }
        }
    }
}

#[cfg(test)]
fn test_endpoint(explicit: bool) -> Endpoint {
    let addr: SocketAddr = "127.0.0.1:9999".parse().unwrap();
    let ctx = Arc::new(ProbeCtx::new(addr));
    let thread = thread::spawn(|| {});
    Endpoint::new(addr, 1.0, explicit, ctx, thread)
}

#[cfg(test)]
fn ready(latency: f64) -> Check {
    Check {
        ready: true,
        state: CheckState::Ready,
        latency,
        others: String::new(),
    }
}

#[test]
fn latency_is_mean_of_last_two_raw_samples() {
    let mut ep = test_endpoint(true);
    let mut max_lat = 0.0;

    ep.ctx.publish(ready(0.1));
    ep.copy_result(&mut max_lat);
    assert_eq!(ep.pending.latency, 0.05);

    ep.ctx.publish(ready(0.2));
    ep.copy_result(&mut max_lat);
    assert_eq!(ep.pending.latency, 0.15);
    assert_eq!(max_lat, 0.15);
}

#[test]
fn stale_tick_keeps_previous_latency() {
    let mut ep = test_endpoint(true);
    let mut max_lat = 0.0;

    ep.ctx.publish(ready(0.1));
    ep.copy_result(&mut max_lat);
    let settled = ep.pending.latency;

    ep.copy_result(&mut max_lat);
    assert!(!ep.pending.ready);
    assert_eq!(ep.pending.latency, settled);
}

#[test]
fn weight_mapping() {
    let mut ep = test_endpoint(true);
    let mut max_lat = 0.0;

    ep.ctx.publish(ready(0.1));
    ep.copy_result(&mut max_lat);
    // twice as fast as the slowest destination: twice the share
    assert_eq!(ep.result_weight(0.1), 2.0);
    // no READY destination set a max latency: plain configured weight
    assert_eq!(ep.result_weight(0.0), 1.0);

    ep.ctx.publish(Check { state: CheckState::Avoid, ..ready(0.1) });
    ep.copy_result(&mut max_lat);
    assert_eq!(ep.result_weight(0.1), 0.0);

    ep.ctx.publish(Check { state: CheckState::NotReady, ..ready(0.1) });
    ep.copy_result(&mut max_lat);
    assert_eq!(ep.result_weight(0.1), -1.0);
}

#[test]
fn notfound_schedules_cleanup_only_when_self_discovered() {
    let mut max_lat = 0.0;

    let mut ep = test_endpoint(false);
    ep.ctx.publish(Check { state: CheckState::NotFound, ..ready(0.0) });
    ep.copy_result(&mut max_lat);
    assert!(ep.ctx.quit_requested());

    let mut ep = test_endpoint(true);
    ep.ctx.publish(Check { state: CheckState::NotFound, ..ready(0.0) });
    ep.copy_result(&mut max_lat);
    assert!(!ep.ctx.quit_requested());
}

#[test]
fn gossip_buffer_is_reused_when_sized_close() {
    let mut ep = test_endpoint(true);
    let mut max_lat = 0.0;

    let peers = "10.0.0.1:3306 10.0.0.2:3306";
    ep.ctx.publish(Check { others: peers.to_string(), ..ready(0.1) });
    ep.copy_result(&mut max_lat);
    assert!(ep.memb_changed);
    assert_eq!(ep.pending.others, peers);
    let cap = ep.pending.others.capacity();
    ep.memb_changed = false;

    // same payload again: same buffer, no membership change
    ep.ctx.publish(Check { others: peers.to_string(), ..ready(0.1) });
    ep.copy_result(&mut max_lat);
    assert!(!ep.memb_changed);
    assert_eq!(ep.pending.others.capacity(), cap);

    // a payload less than half the buffer forces a reallocation
    ep.ctx.publish(Check { others: "10.0.0.1:3306".to_string(), ..ready(0.1) });
    ep.copy_result(&mut max_lat);
    assert!(ep.memb_changed);
    assert!(ep.pending.others.capacity() < cap);
}
