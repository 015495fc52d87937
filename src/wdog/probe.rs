use std::io;
use std::net::SocketAddr;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// What a probe learned about a destination.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CheckState {
    /// Unreachable or gone.
    NotFound,
    /// Alive but not serviceable.
    NotReady,
    /// Alive but should be drained.
    Avoid,
    /// Alive and ready for traffic.
    Ready,
}

impl Default for CheckState {
    fn default() -> CheckState {
        CheckState::NotFound
    }
}

/// One probe observation.
///
/// `ready` marks the observation as unread: the worker sets it when
/// publishing and the supervisor clears it when draining, so each
/// observation is weighed at most once.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Check {
    pub ready: bool,
    pub state: CheckState,
    /// Round-trip time of the check, in seconds.
    pub latency: f64,
    /// Gossip payload: peers the probed destination knows about.
    pub others: String,
}

/// The rendezvous between the supervisor and one probe worker.
///
/// The supervisor and the worker each hold a strong handle; the worker
/// announces its own termination through `retire` so the supervisor knows
/// when the thread is safe to reap. All fields are guarded by one mutex,
/// acquired strictly after the supervisor lock and never nested with
/// another context's.
pub struct ProbeCtx {
    addr: SocketAddr,
    state: Mutex<ProbeState>,
    cond: Condvar,
}

#[derive(Default)]
struct ProbeState {
    result: Check,
    started: bool,
    quit: bool,
    joined: bool,
    error: Option<io::Error>,
}

impl ProbeCtx {
    pub fn new(addr: SocketAddr) -> ProbeCtx {
        ProbeCtx {
            addr,
            state: Mutex::new(ProbeState::default()),
            cond: Condvar::new(),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn lock(&self) -> MutexGuard<ProbeState> {
        self.state.lock().expect("probe context poisoned")
    }

    // ----- worker side ------------------------------------------------

    /// Completes the startup handshake. Every worker must call this
    /// exactly once, before anything else; a failure also marks the
    /// context joined so the supervisor can reap the thread immediately.
    pub fn confirm_startup(&self, res: io::Result<()>) {
        let mut s = self.lock();
        s.started = true;
        if let Err(e) = res {
            s.error = Some(e);
            s.joined = true;
        }
        self.cond.notify_all();
    }

    /// Publishes a fresh observation into the result slot, replacing any
    /// unread one.
    pub fn publish(&self, check: Check) {
        let mut s = self.lock();
        s.result = check;
        s.result.ready = true;
        self.cond.notify_all();
    }

    /// True while the previous observation has not been drained yet.
    pub fn has_unread_result(&self) -> bool {
        self.lock().result.ready
    }

    pub fn quit_requested(&self) -> bool {
        self.lock().quit
    }

    /// Sleeps until `timeout` elapses or quit is requested; returns the
    /// quit flag. Workers pace their probe cycles with this so a quit
    /// request interrupts the pause.
    pub fn wait_quit(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut s = self.lock();
        loop {
            if s.quit {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self.cond
                .wait_timeout(s, deadline - now)
                .expect("probe context poisoned");
            s = guard;
        }
    }

    /// Sleeps with no deadline until quit is requested.
    pub fn park_until_quit(&self) {
        let mut s = self.lock();
        while !s.quit {
            s = self.cond.wait(s).expect("probe context poisoned");
        }
    }

    /// Announces that the worker is about to exit and the thread may be
    /// joined.
    pub fn retire(&self) {
        let mut s = self.lock();
        s.joined = true;
        self.cond.notify_all();
    }

    // ----- supervisor side --------------------------------------------

    /// Blocks until the worker has confirmed startup, then yields the
    /// startup error if there was one.
    pub fn wait_started(&self) -> io::Result<()> {
        let mut s = self.lock();
        while !s.started {
            s = self.cond.wait(s).expect("probe context poisoned");
        }
        match s.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Asks the worker to terminate.
    pub fn signal_quit(&self) {
        let mut s = self.lock();
        if !s.quit {
            s.quit = true;
            self.cond.notify_all();
        }
    }

    pub fn is_joined(&self) -> bool {
        self.lock().joined
    }

    /// Moves the current observation into `pending`, clearing the unread
    /// flag so the next drain sees the slot as stale.
    ///
    /// The caller's gossip buffer is reused unless the incoming payload
    /// does not fit or the buffer holds more than twice the payload, which
    /// keeps reallocation off the steady-state path. Returns true when the
    /// gossip payload differs from the one already in `pending`.
    pub fn copy_result_out(&self, pending: &mut Check) -> bool {
        let mut changed = false;
        let mut s = self.lock();
        let res = &mut s.result;

        pending.ready = res.ready;
        pending.state = res.state;
        pending.latency = res.latency;
        res.ready = false;

        if pending.ready && pending.state != CheckState::NotFound {
            // destination is live, refresh the gossip payload
            if pending.others != res.others {
                changed = true;
            }
            let need = res.others.len();
            let cap = pending.others.capacity();
            if cap < need || cap > 2 * need {
                pending.others = String::with_capacity(need);
            } else {
                pending.others.clear();
            }
            pending.others.push_str(&res.others);
        }

        changed
    }
}

#[test]
fn startup_handshake_success() {
    use std::sync::Arc;
    use std::thread;

    let ctx = Arc::new(ProbeCtx::new("127.0.0.1:9999".parse().unwrap()));
    let worker = {
        let ctx = ctx.clone();
        thread::spawn(move || {
            ctx.confirm_startup(Ok(()));
            ctx.park_until_quit();
            ctx.retire();
        })
    };
    assert!(ctx.wait_started().is_ok());
    assert!(!ctx.is_joined());
    ctx.signal_quit();
    worker.join().unwrap();
    assert!(ctx.is_joined());
}

#[test]
fn startup_handshake_failure_marks_joined() {
    use std::sync::Arc;
    use std::thread;

    let ctx = Arc::new(ProbeCtx::new("127.0.0.1:9999".parse().unwrap()));
    let worker = {
        let ctx = ctx.clone();
        thread::spawn(move || {
            ctx.confirm_startup(Err(io::Error::new(io::ErrorKind::ConnectionRefused, "nope")));
        })
    };
    assert!(ctx.wait_started().is_err());
    assert!(ctx.is_joined());
    worker.join().unwrap();
}

#[test]
fn drain_clears_unread_flag() {
    let ctx = ProbeCtx::new("127.0.0.1:9999".parse().unwrap());
    ctx.publish(Check {
        ready: true,
        state: CheckState::Ready,
        latency: 0.01,
        others: String::new(),
    });
    assert!(ctx.has_unread_result());

    let mut pending = Check::default();
    ctx.copy_result_out(&mut pending);
    assert!(pending.ready);
    assert_eq!(pending.state, CheckState::Ready);
    assert!(!ctx.has_unread_result());

    ctx.copy_result_out(&mut pending);
    assert!(!pending.ready);
}

#[test]
fn wait_quit_wakes_on_signal() {
    use std::sync::Arc;
    use std::thread;

    let ctx = Arc::new(ProbeCtx::new("127.0.0.1:9999".parse().unwrap()));
    let waiter = {
        let ctx = ctx.clone();
        thread::spawn(move || ctx.wait_quit(Duration::from_secs(30)))
    };
    thread::sleep(Duration::from_millis(20));
    ctx.signal_quit();
    assert!(waiter.join().unwrap());
}
