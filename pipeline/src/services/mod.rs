pub mod scheduler;

pub use scheduler::{BucketState, RunReport, Scheduler, Scope, ScopeOutcome};
