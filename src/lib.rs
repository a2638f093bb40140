//! # Trueno-Trials: Deadline-Bounded Trial Worker
//!
//! **Version**: 0.1.0
//!
//! Trueno-Trials is the worker side of a distributed benchmarking harness.
//! A worker claims one trial at a time from a shared store, runs the
//! experiment's routine on it under a hard wall-clock deadline, and reports
//! the outcome back before claiming the next.
//!
//! ## Design Principles (Toyota Way Aligned)
//!
//! - **Jidoka**: A malformed routine stops the worker before any trial is claimed
//! - **Poka-Yoke safety**: Routines are interpreted, never compiled from host-language source
//! - **Heijunka**: One trial at a time per worker; scale out with more runners
//! - **Genchi Genbutsu**: Every claimed trial is reported, with task shape and trace on failure
//!
//! ## Components
//!
//! - [`routine`]: loads routine source into a callable bound under a fixed entry name
//! - [`deadline`]: runs a callable on its own thread under a wall-clock budget
//! - [`worker`]: the claim-execute-report loop
//! - [`store`]: the store interface plus in-memory, file and retrying stores
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use trueno_trials::config::WorkerConfig;
//! use trueno_trials::deadline::Budget;
//! use trueno_trials::store::open_store;
//! use trueno_trials::worker::TrialWorker;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = open_store("file://trials.json").await?;
//! let config = WorkerConfig::builder("exp-1", "runner-0")
//!     .budget(Budget::limited(Duration::from_secs(60))?)
//!     .build()?;
//!
//! let summary = TrialWorker::new(store, config).run().await?;
//! println!("{} trials, {} failed", summary.trials_run, summary.failed);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod deadline;
pub mod error;
pub mod routine;
pub mod shutdown;
pub mod store;
pub mod trial;
pub mod worker;

pub use error::{Error, Result};
