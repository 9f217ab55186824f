//! Edge-case harness: an offline driver that exercises the gateway's
//! public HTTP surface under bursty, high-latency, and connectivity-loss
//! scenarios and renders SLO verdicts.
//!
//! The harness never inspects internal state — everything it asserts is
//! observable by any client.

pub mod client;
pub mod report;
pub mod scenarios;

pub use client::HarnessClient;
pub use report::{percentile, ScenarioReport, SloCheck};
