use linkerd_wdog::{Backend, Check, CheckState, ProbeCtx};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub fn check(state: CheckState, latency: f64) -> Check {
    Check {
        ready: true,
        state,
        latency,
        others: String::new(),
    }
}

pub fn check_with_others(state: CheckState, latency: f64, others: &str) -> Check {
    Check {
        others: others.to_string(),
        ..check(state, latency)
    }
}

struct Plan {
    checks: VecDeque<Check>,
    repeat_last: bool,
}

/// A scripted prober: each worker publishes its address's planned checks
/// in order, one per drain, optionally repeating the last one forever.
/// Unplanned addresses get a worker that never reports anything.
pub struct MockBackend {
    plans: Mutex<HashMap<SocketAddr, Plan>>,
    failing: Mutex<HashSet<SocketAddr>>,
    spawned: AtomicUsize,
    active: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> MockBackend {
        MockBackend {
            plans: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            spawned: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
        }
    }

    pub fn plan(&self, addr: SocketAddr, checks: Vec<Check>, repeat_last: bool) {
        let plan = Plan {
            checks: checks.into_iter().collect(),
            repeat_last,
        };
        self.plans.lock().unwrap().insert(addr, plan);
    }

    /// Makes workers for `addr` fail their startup handshake.
    pub fn fail_startup(&self, addr: SocketAddr) {
        self.failing.lock().unwrap().insert(addr);
    }

    /// Workers that ever confirmed startup.
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    /// Workers currently running.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn next_check(&self, addr: &SocketAddr) -> Option<Check> {
        let mut plans = self.plans.lock().unwrap();
        let plan = match plans.get_mut(addr) {
            Some(plan) => plan,
            None => return None,
        };
        if plan.repeat_last && plan.checks.len() == 1 {
            plan.checks.front().cloned()
        } else {
            plan.checks.pop_front()
        }
    }
}

impl Backend for MockBackend {
    fn probe(&self, ctx: Arc<ProbeCtx>) {
        if self.failing.lock().unwrap().contains(&ctx.addr()) {
            ctx.confirm_startup(Err(io::Error::new(io::ErrorKind::ConnectionRefused,
                                                   "scripted startup failure")));
            return;
        }

        self.spawned.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_add(1, Ordering::SeqCst);
        ctx.confirm_startup(Ok(()));

        loop {
            // publish the next planned check once the last one was drained
            if !ctx.has_unread_result() {
                if let Some(check) = self.next_check(&ctx.addr()) {
                    ctx.publish(check);
                }
            }
            if ctx.wait_quit(Duration::from_millis(5)) {
                break;
            }
        }

        ctx.retire();
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}
