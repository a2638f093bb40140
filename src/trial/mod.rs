//! Trial Data Model
//!
//! Types exchanged between the worker loop and the trial store.
//!
//! ## Schema Overview
//!
//! ```text
//! TrialIdentity (experiment, runner) ──claims──> Trial (1)
//!                                                   │
//!                                                   ├── TaskDescriptor (origin, name, shape)
//!                                                   └── TrialRecord [store-side lifecycle]
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use trueno_trials::trial::{TaskDescriptor, Trial, TrialId, TrialRecord, TrialStatus};
//!
//! let task = TaskDescriptor::new("openml", "iris").with_shape(150, 4, 3);
//! let trial = Trial::new(TrialId(1), "exp-001", task, "ebm");
//!
//! let mut record = TrialRecord::new(trial);
//! record.claim("runner-0");
//! record.complete(None);
//! assert_eq!(record.status(), TrialStatus::Success);
//! ```

mod model;
mod outcome;
mod trial_record;

pub use model::{TaskDescriptor, Trial, TrialBuilder, TrialId, TrialIdentity};
pub use outcome::ExecutionOutcome;
pub use trial_record::{TrialRecord, TrialStatus};
