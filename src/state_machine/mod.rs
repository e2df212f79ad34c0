mod job;
mod state;

pub use job::{Job, JobSnapshot, JobStatus, LookupKey};
pub use state::{
    CarrierRecord, NOT_FOUND, ProtocolStep, RetrievalResult, StatusPredicate, Transition,
};
