use std::io;
use std::net::SocketAddr;
use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::Backend;
use wdog::probe::{Check, CheckState, ProbeCtx};

/// Probes destinations by running an external command.
///
/// Once per probe interval the command is invoked with the destination's
/// ip and port appended:
///
/// ```text
/// <cmd...> <ip> <port>
/// ```
///
/// and the first line of its output is read as
///
/// ```text
/// <state> [<latency-seconds>] [<gossip...>]
/// ```
///
/// where `<state>` is one of `ready`, `avoid`, `notready` or `notfound`
/// (case-insensitive). When the latency field is absent the measured
/// command duration stands in for it. The remainder of the line is
/// carried verbatim as the gossip payload. A spawn failure or a non-zero
/// exit reports the destination as not found. The command is expected to
/// enforce its own probe timeout; a command that hangs blocks its
/// worker, and ultimately shutdown.
pub struct ExecBackend {
    cmd: Vec<String>,
    interval: Duration,
}

impl ExecBackend {
    pub fn new(cmd: &str, interval: Duration) -> ExecBackend {
        ExecBackend {
            cmd: cmd.split_whitespace().map(|s| s.to_string()).collect(),
            interval,
        }
    }

    fn run_check(&self, addr: &SocketAddr) -> Check {
        let start = Instant::now();
        let out = Command::new(&self.cmd[0])
            .args(&self.cmd[1..])
            .arg(format!("{}", addr.ip()))
            .arg(format!("{}", addr.port()))
            .output();
        let elapsed = duration_secs(start.elapsed());

        match out {
            Ok(ref out) if out.status.success() => {
                parse_check(&String::from_utf8_lossy(&out.stdout), elapsed)
            }
            Ok(out) => {
                debug!("{}: probe command exited with {}", addr, out.status);
                not_found()
            }
            Err(e) => {
                debug!("{}: probe command failed: {}", addr, e);
                not_found()
            }
        }
    }
}

impl Backend for ExecBackend {
    fn probe(&self, ctx: Arc<ProbeCtx>) {
        if self.cmd.is_empty() {
            ctx.confirm_startup(Err(io::Error::new(io::ErrorKind::InvalidInput,
                                                   "empty probe command")));
            return;
        }
        ctx.confirm_startup(Ok(()));

        loop {
            let start = Instant::now();
            let check = self.run_check(&ctx.addr());
            trace!("{}: {:?}", ctx.addr(), check.state);
            ctx.publish(check);

            let spent = start.elapsed();
            let pause = if spent < self.interval {
                self.interval - spent
            } else {
                Duration::new(0, 0)
            };
            if ctx.wait_quit(pause) {
                break;
            }
        }
        ctx.retire();
    }
}

fn parse_check(stdout: &str, measured_latency: f64) -> Check {
    let line = stdout.lines().next().unwrap_or("");
    let mut words = line.split_whitespace();

    let state = match words.next().map(|w| w.to_lowercase()) {
        Some(ref w) if w == "ready" => CheckState::Ready,
        Some(ref w) if w == "avoid" => CheckState::Avoid,
        Some(ref w) if w == "notready" => CheckState::NotReady,
        Some(ref w) if w == "notfound" => CheckState::NotFound,
        _ => CheckState::NotReady,
    };

    let rest: Vec<&str> = words.collect();
    let (latency, others) = match rest.first().and_then(|w| w.parse::<f64>().ok()) {
        Some(latency) => (latency, rest[1..].join(" ")),
        None => (measured_latency, rest.join(" ")),
    };

    Check {
        ready: true,
        state,
        latency,
        others,
    }
}

fn not_found() -> Check {
    Check {
        ready: true,
        state: CheckState::NotFound,
        latency: 0.0,
        others: String::new(),
    }
}

fn duration_secs(d: Duration) -> f64 {
    d.as_secs() as f64 + f64::from(d.subsec_nanos()) * 1e-9
}

#[test]
fn parses_state_and_latency() {
    let check = parse_check("ready 0.025\n", 1.0);
    assert_eq!(check.state, CheckState::Ready);
    assert_eq!(check.latency, 0.025);
    assert_eq!(check.others, "");
}

#[test]
fn missing_latency_falls_back_to_measured() {
    let check = parse_check("READY\n", 0.125);
    assert_eq!(check.state, CheckState::Ready);
    assert_eq!(check.latency, 0.125);
}

#[test]
fn trailing_words_become_gossip() {
    let check = parse_check("ready 0.01 10.0.0.1:3306 10.0.0.2:3306\n", 1.0);
    assert_eq!(check.others, "10.0.0.1:3306 10.0.0.2:3306");

    // gossip without a latency field
    let check = parse_check("avoid 10.0.0.1:3306\n", 0.5);
    assert_eq!(check.state, CheckState::Avoid);
    assert_eq!(check.latency, 0.5);
    assert_eq!(check.others, "10.0.0.1:3306");
}

#[test]
fn garbage_is_notready() {
    assert_eq!(parse_check("", 0.0).state, CheckState::NotReady);
    assert_eq!(parse_check("wat\n", 0.0).state, CheckState::NotReady);
}

#[test]
#[cfg(unix)]
fn echo_probe_round_trip() {
    use std::thread;

    let ctx = Arc::new(ProbeCtx::new("127.0.0.1:9999".parse().unwrap()));
    let backend = ExecBackend::new("echo ready 0.05", Duration::from_millis(10));
    let worker = {
        let ctx = ctx.clone();
        thread::spawn(move || backend.probe(ctx))
    };
    assert!(ctx.wait_started().is_ok());

    let mut pending = Check::default();
    for _ in 0..100 {
        ctx.copy_result_out(&mut pending);
        if pending.ready {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert!(pending.ready);
    assert_eq!(pending.state, CheckState::Ready);
    assert_eq!(pending.latency, 0.05);

    ctx.signal_quit();
    worker.join().unwrap();
    assert!(ctx.is_joined());
}
