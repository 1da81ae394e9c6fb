//! Cadence: a test-driven delivery orchestrator.
//!
//! A plan is split into phases, each holding sessions with declared
//! dependencies. Every session is driven through RED → GREEN → REFACTOR →
//! COMMIT by a pluggable executor, pausing at human checkpoints between
//! stages. Independent sessions of a phase run concurrently.

pub mod checkpoint;
pub mod config;
pub mod dag;
pub mod errors;
pub mod events;
pub mod executor;
pub mod gates;
pub mod orchestrator;
pub mod plan;
pub mod scheduler;
pub mod state;
pub mod ui;
