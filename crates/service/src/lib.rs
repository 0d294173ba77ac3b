pub mod service;

pub use service::{
    EventLog, PlanRequest, PlanSnapshot, ScanRequest, ScanSummary, SequencedEvent, Session,
};
