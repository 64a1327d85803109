//! Limitador - self-annotating performance limits for benchmark competitions
//!
//! This library checks benchmark measurements against limits stored next to
//! the benchmark code (an inline `#[competition_bench(min, max)]` directive
//! or a sidecar TOML file), widens limits that no longer hold when asked to,
//! writes them back safely, and reruns until the result can be trusted.

pub mod annotations;
pub mod cli;
pub mod competition;
pub mod metrics;
pub mod stats;
