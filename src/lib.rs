//! Real-time multi-venue perpetual-futures market-data aggregator and
//! cross-venue spread monitor.
//!
//! See `SPEC_FULL.md` at the repository root for the full component design.

pub mod adapter;
pub mod book;
pub mod bus;
pub mod config;
pub mod decimal;
pub mod error;
pub mod health;
pub mod ids;
pub mod logging;
pub mod multiplexer;
pub mod poller;
pub mod registry;
pub mod spread;
pub mod supervisor;
