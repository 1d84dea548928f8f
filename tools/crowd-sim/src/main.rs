//! crowd-sim: simulated occupancy feed for one zone
//!
//! Usage:
//!   crowd-sim <zone_id> [samples] [base] [trend] [seed] [capacity]
//!
//! Prints one `observation` JSON line per sample, ready to pipe into
//! crowd-engine. Occupancy is base + trend * t + uniform noise, clipped to
//! [0, capacity * 1.2]. Same arguments, same feed.

use std::env;
use std::io::{self, Write};
use std::process;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

const SAMPLE_INTERVAL_SECS: i64 = 10;
/// Noise amplitude as a share of base occupancy.
const NOISE_RATIO: f64 = 0.05;
/// Max people crossing in each direction per sample on top of the net change.
const MAX_CHURN: u32 = 8;

#[derive(Serialize)]
struct Observation<'a> {
    kind: &'static str,
    zone_id: &'a str,
    timestamp: DateTime<Utc>,
    occupancy: i64,
    inflow: f64,
    outflow: f64,
}

struct Args {
    zone_id: String,
    samples: usize,
    base: f64,
    trend: f64,
    seed: u64,
    capacity: f64,
}

fn usage() -> ! {
    eprintln!("Usage: crowd-sim <zone_id> [samples] [base] [trend] [seed] [capacity]");
    process::exit(2);
}

fn arg<T: std::str::FromStr>(args: &[String], idx: usize, name: &str, default: T) -> T {
    match args.get(idx) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            eprintln!("crowd-sim: invalid {}: {}", name, raw);
            process::exit(2);
        }),
    }
}

fn parse_args() -> Args {
    let args: Vec<String> = env::args().skip(1).collect();
    let zone_id = match args.first() {
        Some(z) if !z.starts_with('-') => z.clone(),
        _ => usage(),
    };
    let parsed = Args {
        zone_id,
        samples: arg(&args, 1, "samples", 60),
        base: arg(&args, 2, "base", 400.0),
        trend: arg(&args, 3, "trend", 5.0),
        seed: arg(&args, 4, "seed", 42),
        capacity: arg(&args, 5, "capacity", 1000.0),
    };
    if parsed.capacity <= 0.0 || parsed.base < 0.0 {
        eprintln!("crowd-sim: base must be >= 0 and capacity > 0");
        process::exit(2);
    }
    parsed
}

fn main() {
    let args = parse_args();
    let mut rng = StdRng::seed_from_u64(args.seed);
    let start = Utc
        .with_ymd_and_hms(2025, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_else(Utc::now);
    let ceiling = args.capacity * 1.2;
    let noise = (args.base * NOISE_RATIO).max(1.0);

    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());
    let mut previous: Option<i64> = None;

    for t in 0..args.samples {
        let raw = args.base + args.trend * t as f64 + rng.gen_range(-noise..=noise);
        let occupancy = raw.clamp(0.0, ceiling).round() as i64;

        let net = previous.map(|p| occupancy - p).unwrap_or(0);
        let churn = rng.gen_range(0..=MAX_CHURN) as f64;
        let obs = Observation {
            kind: "observation",
            zone_id: &args.zone_id,
            timestamp: start + Duration::seconds(t as i64 * SAMPLE_INTERVAL_SECS),
            occupancy,
            inflow: net.max(0) as f64 + churn,
            outflow: (-net).max(0) as f64 + churn,
        };
        previous = Some(occupancy);

        if serde_json::to_writer(&mut out, &obs).is_err() || writeln!(out).is_err() {
            eprintln!("crowd-sim: write failed");
            process::exit(1);
        }
    }
    let _ = out.flush();
}
