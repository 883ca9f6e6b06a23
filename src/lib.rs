//! distsynth - SQL workload distribution synthesizer.
//!
//! Given a target distribution over a cost metric (cardinality, planner
//! cost, execution time, or a CPU-only plan cost emulation), synthesizes a
//! SQL workload whose per-query costs approximate that distribution by
//! generating templated queries, profiling them via Bayesian optimization
//! over their parameter ranges, and refining the template set against an LLM
//! where plain profiling can't close the gap.

pub mod bo;
pub mod catalog;
pub mod controller;
pub mod cost;
pub mod distribution;
pub mod error;
pub mod history;
pub mod llm;
pub mod model;
pub mod refiner;
pub mod runner;
pub mod template;
pub mod util;

pub use error::{Result, SynthError};
