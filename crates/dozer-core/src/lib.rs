//! Core of the Dozer chat bot: command dispatch, its gatekeeping and the
//! reaction pager.
//!
//! This crate is framework-agnostic. The chat platform lives behind
//! [`gateway::port::GatewayPort`], implemented in adapter crates.

pub mod audit;
pub mod classifier;
pub mod command;
pub mod commands;
pub mod concurrency;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod gateway;
pub mod impersonation;
pub mod lifecycle;
pub mod logging;
pub mod pager;
pub mod panics;
pub mod permissions;
pub mod prefix;
pub mod rate_gate;
pub mod reporting;

pub use errors::{Error, Result};
