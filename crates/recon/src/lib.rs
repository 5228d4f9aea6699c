//! `taxgraph-recon` - multi-source tax filing reconciliation and network
//! risk engine.
//!
//! Pure engine crate: reads normalized records through [`RecordStore`],
//! returns findings and entity metrics. No CLI dependencies.
//!
//! Levels:
//! - L1 fuzzy invoice matching across the two filing sources
//! - L2 documentary chain validation for credit claims
//! - L3 circular-trade detection
//! - L4 graph-wide risk propagation

pub mod centrality;
pub mod chain;
pub mod classify;
pub mod config;
pub mod cycles;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod graph;
pub mod gstin;
pub mod load;
pub mod matcher;
pub mod model;
pub mod period;
pub mod propagation;
pub mod scoring;
pub mod similarity;
pub mod store;

pub use chain::ClaimDocuments;
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::ReconError;
pub use model::{
    Entity, EntityMetrics, EntityStatus, Finding, FindingKind, FullOutcome, NetworkOutcome, Record,
    ReconOutcome, Severity, SourceTag, StepStatus,
};
pub use period::{Period, Window};
pub use store::{MemoryStore, RecordStore};
