//! A thin shell around the watchdog library: watches the destinations
//! named in a configuration file and logs the router updates it would
//! issue. Runs until stdin closes.

#[macro_use]
extern crate clap;
extern crate linkerd_wdog;
#[macro_use]
extern crate log;
extern crate pretty_env_logger;
extern crate tacho;

use clap::{Arg, App};
use linkerd_wdog::{Router, Watchdog, WdogConfig};
use std::fs;
use std::io::{self, Read};
use std::net::SocketAddr;
use std::sync::Arc;

/// Logs every accepted weight change instead of driving a real router.
struct LogRouter;

impl Router for LogRouter {
    fn change_dst(&self, addr: SocketAddr, weight: f64) -> bool {
        info!("router: {} *{}", addr, weight);
        true
    }
}

fn main() {
    // Configure the logger from the RUST_LOG environment variable.
    drop(pretty_env_logger::init());

    let opts = mk_app().get_matches();
    let config_path = opts.value_of(CONFIG_PATH_ARG).unwrap();
    let config_str: String = {
        let mut s = String::new();
        fs::File::open(config_path)
            .expect("could not open config file")
            .read_to_string(&mut s)
            .expect("could not read config file");
        s
    };
    let config = config_str.parse::<WdogConfig>().expect("configuration error");

    let (metrics, report) = tacho::new();
    let wdog = Watchdog::new(&config, Arc::new(LogRouter), &metrics)
        .expect("could not start watchdog");

    info!("watching; close stdin to stop");
    let mut sink = String::new();
    drop(io::stdin().read_to_string(&mut sink));

    wdog.shutdown();
    drop(report);
    info!("Closing.")
}

static CONFIG_PATH_ARG: &'static str = "PATH";

fn mk_app() -> App<'static, 'static> {
    App::new(crate_name!())
        .version(crate_version!())
        .about(crate_description!())
        .arg(Arg::with_name(CONFIG_PATH_ARG)
            .required(true)
            .index(1)
            .help("Config file path."))
}
