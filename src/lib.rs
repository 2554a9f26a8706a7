#![forbid(unsafe_code)]

//! `agent-steward`: supervision core for a fixed pool of autonomous agents.
//!
//! A [`bus::MessageBus`] carries tasks to agents and their responses back.
//! The [`orchestrator::Watchdog`] escalates silent agents through resume,
//! restart and quarantine. The [`pipeline::ResponsePipeline`] turns change
//! descriptors in agent responses into validated commits on the workspace.

pub mod audit;
pub mod bus;
pub mod clock;
pub mod config;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod pipeline;
pub mod runtime;
pub mod vcs;
pub mod workspace;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
