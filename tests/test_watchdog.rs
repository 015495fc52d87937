extern crate env_logger;
extern crate linkerd_wdog;
extern crate tacho;

mod mocks;

use linkerd_wdog::{CheckState, DstConfig, Error, Watchdog, WdogConfig, WeightedAddr};
use mocks::{check, check_with_others, MockBackend, MockRouter};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// 40ms router tick; the watchdog aggregates every 60ms.
const TICK_NS: u64 = 40_000_000;

fn addr(s: &str) -> SocketAddr {
    s.parse().expect("bad test addr")
}

fn config(dsts: Vec<(SocketAddr, f64)>) -> WdogConfig {
    WdogConfig {
        watchdog: None,
        interval_ns: Some(TICK_NS),
        dsts: Some(dsts.into_iter()
                       .map(|(addr, weight)| DstConfig { addr: addr, weight: weight })
                       .collect()),
    }
}

fn start(backend: &Arc<MockBackend>,
         router: &Arc<MockRouter>,
         dsts: Vec<(SocketAddr, f64)>)
         -> Watchdog {
    let (metrics, report) = tacho::new();
    drop(report);
    Watchdog::with_backend(&config(dsts), backend.clone(), router.clone(), &metrics)
        .expect("could not start watchdog")
}

fn eventually<F: FnMut() -> bool>(mut f: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if f() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

fn approx(v: Option<f64>, expected: f64) -> bool {
    match v {
        Some(v) => (v - expected).abs() < 1e-9,
        None => false,
    }
}

fn not_present(res: Result<usize, Error>) -> bool {
    match res {
        Err(Error::NotPresent(_)) => true,
        _ => false,
    }
}

#[test]
/// Two equally-weighted destinations, one twice as fast as the other:
/// the faster one ends up with twice the share.
fn faster_destinations_get_more_weight() {
    drop(env_logger::init());
    let a = addr("127.0.0.1:6001");
    let b = addr("127.0.0.1:6002");

    let backend = Arc::new(MockBackend::new());
    backend.plan(a, vec![check(CheckState::Ready, 0.05)], true);
    backend.plan(b, vec![check(CheckState::Ready, 0.1)], true);
    let router = Arc::new(MockRouter::new());

    let wdog = start(&backend, &router, vec![(a, 1.0), (b, 1.0)]);
    assert!(eventually(|| approx(router.last_for(a), 2.0) && approx(router.last_for(b), 1.0)));
    wdog.shutdown();
}

#[test]
/// Latency jitter within 10% of the published weight does not reach the
/// router.
fn small_weight_changes_are_suppressed() {
    drop(env_logger::init());
    let a = addr("127.0.0.1:6011");
    let b = addr("127.0.0.1:6012");

    let backend = Arc::new(MockBackend::new());
    backend.plan(a,
                 vec![check(CheckState::Ready, 0.05), check(CheckState::Ready, 0.052)],
                 true);
    backend.plan(b, vec![check(CheckState::Ready, 0.1)], true);
    let router = Arc::new(MockRouter::new());

    let wdog = start(&backend, &router, vec![(a, 1.0), (b, 1.0)]);

    // let the weights settle
    assert!(eventually(|| match router.last_for(a) {
        Some(w) => w > 1.9 && w <= 2.0,
        None => false,
    }));
    thread::sleep(Duration::from_millis(300));

    // jitter keeps arriving, updates do not
    let settled = router.len();
    thread::sleep(Duration::from_millis(400));
    assert_eq!(router.len(), settled);
    wdog.shutdown();
}

#[test]
/// A self-discovered destination that goes away cleans itself up: quit,
/// join, record removal.
fn self_discovered_notfound_is_removed() {
    drop(env_logger::init());
    let c = addr("127.0.0.1:6021");

    let backend = Arc::new(MockBackend::new());
    backend.plan(c, vec![check(CheckState::NotFound, 0.0)], true);
    let router = Arc::new(MockRouter::new());

    let wdog = start(&backend, &router, vec![]);
    wdog.change_dst(&WeightedAddr(c, 1.0), false).unwrap();

    assert!(eventually(|| not_present(wdog.change_dst(&WeightedAddr(c, -1.0), false))));
    assert!(eventually(|| backend.active() == 0));
    assert_eq!(backend.spawned(), 1);
    wdog.shutdown();
}

#[test]
/// An explicit destination that goes away is advertised as unusable but
/// stays in the registry with its worker running.
fn explicit_notfound_is_retained() {
    drop(env_logger::init());
    let d = addr("127.0.0.1:6031");

    let backend = Arc::new(MockBackend::new());
    backend.plan(d, vec![check(CheckState::NotFound, 0.0)], true);
    let router = Arc::new(MockRouter::new());

    let wdog = start(&backend, &router, vec![(d, 1.0)]);
    assert!(eventually(|| approx(router.last_for(d), -1.0)));

    thread::sleep(Duration::from_millis(300));
    assert_eq!(backend.active(), 1);
    // still present: a reweight addresses the existing record
    assert_eq!(wdog.change_dst(&WeightedAddr(d, 2.0), true).unwrap(), 0);
    wdog.shutdown();
}

#[test]
/// Shutdown joins every worker and issues no further router updates.
fn shutdown_is_ordered() {
    drop(env_logger::init());
    let dsts: Vec<_> = (0..3)
        .map(|i| (addr(&format!("127.0.0.1:604{}", i)), 1.0))
        .collect();

    let backend = Arc::new(MockBackend::new());
    for &(a, _) in &dsts {
        backend.plan(a, vec![check(CheckState::Ready, 0.05)], true);
    }
    let router = Arc::new(MockRouter::new());

    let wdog = start(&backend, &router, dsts);
    assert!(eventually(|| router.len() >= 3));
    wdog.shutdown();

    assert_eq!(backend.active(), 0);
    let closed = router.len();
    thread::sleep(Duration::from_millis(300));
    assert_eq!(router.len(), closed);
}

#[test]
/// Re-adding an identity is a no-op; reweighting reuses the one worker.
fn add_is_idempotent() {
    drop(env_logger::init());
    let a = addr("127.0.0.1:6051");

    let backend = Arc::new(MockBackend::new());
    let router = Arc::new(MockRouter::new());
    let wdog = start(&backend, &router, vec![]);

    let i = wdog.change_dst(&WeightedAddr(a, 1.0), true).unwrap();
    assert_eq!(wdog.change_dst(&WeightedAddr(a, 1.0), true).unwrap(), i);
    assert_eq!(wdog.change_dst(&WeightedAddr(a, 2.5), true).unwrap(), i);
    assert_eq!(backend.spawned(), 1);
    wdog.shutdown();
}

#[test]
fn removing_unknown_is_an_error() {
    drop(env_logger::init());
    let backend = Arc::new(MockBackend::new());
    let router = Arc::new(MockRouter::new());
    let wdog = start(&backend, &router, vec![]);

    assert!(not_present(wdog.change_dst(&WeightedAddr(addr("127.0.0.1:6061"), -1.0), true)));
    wdog.shutdown();
}

#[test]
/// A non-explicit caller cannot remove an explicit destination; it only
/// marks it unavailable. An explicit caller then really removes it.
fn explicit_removal_is_restricted() {
    drop(env_logger::init());
    let e = addr("127.0.0.1:6071");

    let backend = Arc::new(MockBackend::new());
    backend.plan(e, vec![check(CheckState::Ready, 0.05)], true);
    let router = Arc::new(MockRouter::new());

    let wdog = start(&backend, &router, vec![(e, 1.0)]);
    assert!(eventually(|| approx(router.last_for(e), 1.0)));

    // unauthorized removal: record stays, weight goes negative
    wdog.change_dst(&WeightedAddr(e, -1.0), false).unwrap();
    assert!(eventually(|| match router.last_for(e) {
        Some(w) => w < 0.0,
        None => false,
    }));
    assert_eq!(backend.active(), 1);

    // an explicit re-add brings it back
    wdog.change_dst(&WeightedAddr(e, 1.0), true).unwrap();
    assert!(eventually(|| approx(router.last_for(e), 1.0)));

    // an explicit removal goes through
    assert!(eventually(|| not_present(wdog.change_dst(&WeightedAddr(e, -1.0), true))));
    assert!(eventually(|| backend.active() == 0));
    assert_eq!(backend.spawned(), 1);
    wdog.shutdown();
}

#[test]
/// A worker that fails its startup handshake leaves the registry
/// unchanged and surfaces its error.
fn worker_startup_failure_is_reported() {
    drop(env_logger::init());
    let x = addr("127.0.0.1:6081");

    let backend = Arc::new(MockBackend::new());
    backend.fail_startup(x);
    let router = Arc::new(MockRouter::new());
    let wdog = start(&backend, &router, vec![]);

    match wdog.change_dst(&WeightedAddr(x, 1.0), true) {
        Err(Error::Worker(_)) => {}
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(not_present(wdog.change_dst(&WeightedAddr(x, -1.0), true)));
    assert_eq!(backend.spawned(), 0);
    wdog.shutdown();
}

#[test]
/// A preload failure undoes the partially built destination set.
fn preload_failure_unwinds() {
    drop(env_logger::init());
    let a = addr("127.0.0.1:6091");
    let x = addr("127.0.0.1:6092");

    let backend = Arc::new(MockBackend::new());
    backend.plan(a, vec![check(CheckState::Ready, 0.05)], true);
    backend.fail_startup(x);
    let router = Arc::new(MockRouter::new());

    let (metrics, report) = tacho::new();
    drop(report);
    let res = Watchdog::with_backend(&config(vec![(a, 1.0), (x, 1.0)]),
                                     backend.clone(),
                                     router.clone(),
                                     &metrics);
    assert!(res.is_err());
    assert_eq!(backend.active(), 0);
    assert_eq!(router.len(), 0);
}

#[test]
/// A refused router update leaves the previous effective weight in
/// place, and the change is retried on a later tick.
fn refused_updates_are_retried() {
    drop(env_logger::init());
    let a = addr("127.0.0.1:6101");

    let backend = Arc::new(MockBackend::new());
    backend.plan(a, vec![check(CheckState::Ready, 0.05)], true);
    let router = Arc::new(MockRouter::refusing(1));

    let wdog = start(&backend, &router, vec![(a, 1.0)]);
    assert!(eventually(|| approx(router.last_for(a), 1.0)));
    wdog.shutdown();
}

#[test]
/// Null-backend destinations never report, never reach the router, and
/// persist until removed.
fn null_backend_holds_destinations_at_zero() {
    drop(env_logger::init());
    let a = addr("127.0.0.1:6111");

    let router = Arc::new(MockRouter::new());
    let (metrics, report) = tacho::new();
    drop(report);
    let wdog = Watchdog::new(&config(vec![(a, 1.0)]), router.clone(), &metrics)
        .expect("could not start watchdog");

    thread::sleep(Duration::from_millis(300));
    assert_eq!(router.len(), 0);

    assert_eq!(wdog.change_dst(&WeightedAddr(a, -1.0), true).unwrap(), 0);
    assert!(eventually(|| not_present(wdog.change_dst(&WeightedAddr(a, -1.0), true))));
    wdog.shutdown();
}

#[test]
fn unknown_backends_fail_construction() {
    drop(env_logger::init());
    let router = Arc::new(MockRouter::new());
    let (metrics, report) = tacho::new();
    drop(report);

    let mut config = config(vec![]);
    config.watchdog = Some("script:check.sh".to_string());
    match Watchdog::new(&config, router, &metrics) {
        Err(Error::Config(_)) => {}
        _ => panic!("expected a configuration error"),
    }
}

#[test]
/// Addresses gossiped by a live destination join the set as
/// self-discovered; known addresses are not re-added.
fn gossip_discovers_new_destinations() {
    drop(env_logger::init());
    let a = addr("127.0.0.1:6121");
    let peer = addr("127.0.0.1:6122");

    let backend = Arc::new(MockBackend::new());
    backend.plan(a,
                 vec![check_with_others(CheckState::Ready,
                                        0.05,
                                        "127.0.0.1:6121 127.0.0.1:6122")],
                 true);
    backend.plan(peer, vec![check(CheckState::Ready, 0.05)], true);
    let router = Arc::new(MockRouter::new());

    let wdog = start(&backend, &router, vec![(a, 1.0)]);
    assert!(eventually(|| approx(router.last_for(peer), 1.0)));
    assert_eq!(backend.spawned(), 2);

    // discovered destinations are removable by anyone
    assert!(eventually(|| not_present(wdog.change_dst(&WeightedAddr(peer, -1.0), false))));
    wdog.shutdown();
}
