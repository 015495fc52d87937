use linkerd_wdog::Router;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Records every accepted weight change; optionally refuses the first N
/// updates to exercise the watchdog's retry behavior.
pub struct MockRouter {
    log: Mutex<Vec<(SocketAddr, f64)>>,
    refusals: AtomicUsize,
}

impl MockRouter {
    pub fn new() -> MockRouter {
        MockRouter::refusing(0)
    }

    pub fn refusing(n: usize) -> MockRouter {
        MockRouter {
            log: Mutex::new(Vec::new()),
            refusals: AtomicUsize::new(n),
        }
    }

    pub fn updates(&self) -> Vec<(SocketAddr, f64)> {
        self.log.lock().unwrap().clone()
    }

    pub fn updates_for(&self, addr: SocketAddr) -> Vec<f64> {
        self.updates()
            .iter()
            .filter(|u| u.0 == addr)
            .map(|u| u.1)
            .collect()
    }

    pub fn last_for(&self, addr: SocketAddr) -> Option<f64> {
        self.updates_for(addr).last().cloned()
    }

    pub fn len(&self) -> usize {
        self.log.lock().unwrap().len()
    }
}

impl Router for MockRouter {
    fn change_dst(&self, addr: SocketAddr, weight: f64) -> bool {
        loop {
            let left = self.refusals.load(Ordering::SeqCst);
            if left == 0 {
                break;
            }
            if self.refusals
                   .compare_exchange(left, left - 1, Ordering::SeqCst, Ordering::SeqCst)
                   .is_ok() {
                return false;
            }
        }
        self.log.lock().unwrap().push((addr, weight));
        true
    }
}
