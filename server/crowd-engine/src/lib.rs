//! Crowd Risk Prediction & Dispatch Engine.
//!
//! Ingests per-zone occupancy and flow observations, forecasts short-horizon
//! bottlenecks, classifies zones into risk tiers, manages zone alerts with
//! hysteresis, and dispatches response units to reported incidents.
//!
//! No DB, no network; pure computation + in-memory state.

pub mod alerts;
pub mod classifier;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod incidents;
pub mod normalize;
pub mod predictor;
pub mod signals;
pub mod types;

pub use config::{Config, VenueConfig};
pub use engine::{CycleToken, Engine};
pub use error::EngineError;
pub use types::{CycleReport, InboundMessage, OutputLine};
