//! Job lifecycle — the status state machine and the creation/dispatch
//! entry point.

pub mod dispatcher;
pub mod state;

pub use dispatcher::{CreatedJob, JobDispatcher};
pub use state::JobStatus;
