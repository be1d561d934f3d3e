//! gems-fleet: bulk configuration deployment for GEMS sensing devices.
//!
//! Pushes one configuration document to a fleet of remote loggers
//! through the Particle cloud gateway, rides out the reboot each device
//! performs when it accepts a new configuration, and independently
//! verifies the applied state by comparing bit-packed configuration
//! UIDs read back from the device against locally computed values.
//!
//! ## Architecture
//!
//! - **codec**: pure bit-packing of a configuration into system/sensor UIDs
//! - **client**: Particle cloud transport (`DeviceTransport` seam)
//! - **worker**: per-device apply/restart/verify state machine
//! - **orchestrator**: bounded-concurrency fleet runner and aggregation
//! - **results**: run result model and the persisted JSON artifact
//! - **audit**: Markdown run records, optionally committed to git

pub mod audit;
pub mod client;
pub mod codec;
pub mod config;
pub mod orchestrator;
pub mod results;
pub mod worker;

// Re-export the types a caller needs to drive a fleet run.
pub use client::{CallResult, DeviceTransport, ParticleClient, ParticleSessionFactory, SessionFactory};
pub use codec::ConfigUidPair;
pub use config::{ConfigDocument, SensorConfig, SystemConfig, UpdateSettings};
pub use orchestrator::FleetOrchestrator;
pub use results::{DeviceResult, FleetResult, FleetSummary, ResponseCode};
pub use worker::DeviceUpdateWorker;
