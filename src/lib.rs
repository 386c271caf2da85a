//! Ward care-compliance records: a live view over the shared evaluation
//! collection and the monthly aggregation behind the compliance reports.

pub mod aggregate;
pub mod bmi;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod mapping;
pub mod models;
pub mod report;
pub mod store;
pub mod subscription;

pub use error::StoreError;
pub use models::{
    CareStatus, EvaluationRecord, MonthlySummary, NewEvaluation, StatusCounts, StatusField,
};
pub use store::{MemoryStore, RecordStore, SnapshotQuery};
pub use subscription::{subscribe_all, subscribe_latest, SnapshotEvent, Subscription};
