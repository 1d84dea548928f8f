//! Binary entrypoint: read JSON lines from stdin, write JSON lines to stdout.
//!
//! Each input line is an InboundMessage tagged by `kind`. Output lines are either:
//! - An OutputLine (incident reported/resolved, or a cycle report on `tick`)
//! - An ErrorOutput (when input is invalid or an operation fails)
//!
//! Setup messages (zones, units, observations) produce no output line.
//!
//! `CROWD_ENGINE_CONFIG` optionally names a venue JSON file loaded at startup.
//! `CROWD_ENGINE_LOG` sets the log filter (default `warn`); logs go to stderr.

use crowd_engine::types::ErrorOutput;
use crowd_engine::{config, Engine, EngineError, InboundMessage, VenueConfig};
use std::io::{self, BufRead, Write};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
  let filter = EnvFilter::try_from_env("CROWD_ENGINE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(io::stderr)
    .with_target(false)
    .init();
}

fn build_engine() -> Result<Engine, EngineError> {
  let venue = match std::env::var("CROWD_ENGINE_CONFIG") {
    Ok(path) => {
      tracing::info!(path = %path, "loading venue config");
      config::load(&path)?
    }
    Err(_) => VenueConfig::default(),
  };
  Engine::from_venue(venue)
}

fn emit<T: serde::Serialize>(out: &mut impl Write, value: &T) {
  let _ = serde_json::to_writer(&mut *out, value);
  let _ = writeln!(out);
}

fn main() {
  init_tracing();

  let mut engine = match build_engine() {
    Ok(e) => e,
    Err(e) => {
      let _ = writeln!(io::stderr(), "crowd-engine: {}", e);
      std::process::exit(2);
    }
  };

  let stdin = io::stdin();
  let stdout = io::stdout();
  let mut out = io::BufWriter::new(stdout.lock());

  for line in stdin.lock().lines() {
    let line = match line {
      Ok(l) => l,
      Err(e) => {
        let _ = writeln!(io::stderr(), "crowd-engine: read error: {}", e);
        std::process::exit(1);
      }
    };

    let trimmed = line.trim();
    if trimmed.is_empty() {
      continue;
    }

    let msg: InboundMessage = match serde_json::from_str(trimmed) {
      Ok(v) => v,
      Err(e) => {
        emit(&mut out, &ErrorOutput::new(format!("json parse: {}", e)));
        continue;
      }
    };

    match engine.process(&msg) {
      Ok(Some(output)) => emit(&mut out, &output),
      Ok(None) => {}
      Err(e) => {
        let err = match (&e, e.field()) {
          (EngineError::Validation { field, reason }, _) => {
            ErrorOutput::new(reason.clone()).with_field(field.clone())
          }
          (_, Some(field)) => ErrorOutput::new(e.to_string()).with_field(field),
          (_, None) => ErrorOutput::new(e.to_string()),
        };
        emit(&mut out, &err);
      }
    }
    // Flush per line so a driver can read responses interactively.
    let _ = out.flush();
  }

  let _ = out.flush();
}
