use std::env;
use std::process;
use std::str::FromStr;

use env_logger::Env;
use getopts::Options;
use tcpsim_rs::report;
use tcpsim_rs::sim::runner::{Runner, SimConfig};
use tcpsim_rs::socket::TcpVariant;

fn print_usage(program: &str, opts: &Options) {
    let brief = format!(
        "Usage: {program} [options] <Tahoe|Reno|NewReno> <iterations> <loss-rate>\n\n\
         Simulate a TCP sender over a bottleneck router and report per-round\n\
         congestion metrics."
    );
    eprint!("{}", opts.usage(&brief));
}

fn parse_or_exit<T: FromStr>(program: &str, what: &str, value: &str) -> T {
    match value.parse::<T>() {
        Ok(v) => v,
        Err(_) => {
            eprintln!("{program}: invalid {what}: {value}");
            process::exit(2);
        }
    }
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();

    let mut opts = Options::new();
    opts.optflag("h", "help", "print this help menu");
    opts.optopt("s", "seed", "seed for the random loss process", "N");
    opts.optopt("b", "buffer", "router buffer capacity in bytes", "BYTES");
    opts.optopt("w", "window", "receiver window in bytes", "BYTES");
    opts.optopt(
        "r",
        "report",
        "reporting-level bit mask (simulator=1 links=2 routers=4 senders=8 receivers=16 rto=32)",
        "MASK",
    );

    let matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(err) => {
            eprintln!("{program}: {err}");
            print_usage(&program, &opts);
            process::exit(2);
        }
    };
    if matches.opt_present("h") {
        print_usage(&program, &opts);
        return;
    }
    if matches.free.len() != 3 {
        print_usage(&program, &opts);
        process::exit(2);
    }

    let variant = match TcpVariant::from_str(&matches.free[0]) {
        Ok(v) => v,
        Err(err) => {
            eprintln!("{program}: {}: {err}", matches.free[0]);
            process::exit(1);
        }
    };
    let iterations: u32 = parse_or_exit(&program, "iteration count", &matches.free[1]);
    if iterations == 0 {
        eprintln!("{program}: iteration count must be positive");
        process::exit(2);
    }
    let loss_rate: f64 = parse_or_exit(&program, "loss rate", &matches.free[2]);
    if !(0.0..=1.0).contains(&loss_rate) {
        eprintln!("{program}: loss rate must lie in [0, 1]");
        process::exit(2);
    }

    let mut cfg = SimConfig {
        variant,
        iterations,
        loss_rate,
        ..SimConfig::default()
    };
    if let Some(seed) = matches.opt_str("s") {
        cfg.seed = parse_or_exit(&program, "seed", &seed);
    }
    if let Some(buffer) = matches.opt_str("b") {
        cfg.buffer_capacity = parse_or_exit(&program, "buffer capacity", &buffer);
    }
    if let Some(window) = matches.opt_str("w") {
        cfg.rcv_window = parse_or_exit(&program, "receiver window", &window);
    }
    if let Some(mask) = matches.opt_str("r") {
        cfg.report_mask = parse_or_exit(&program, "report mask", &mask);
    } else {
        cfg.report_mask = report::DEFAULT;
    }

    let mut runner = match Runner::new(cfg) {
        Ok(r) => r,
        Err(err) => {
            eprintln!("{program}: {err}");
            process::exit(1);
        }
    };
    if let Err(err) = runner.run() {
        eprintln!("{program}: {err}");
        process::exit(1);
    }
}
