//! Output stage of an event-processing job.
//!
//! [`OutputModule`] decides which products and which events reach an output
//! file and manages the file lifecycle; an [`OutputBackend`] puts the bytes on
//! storage.

pub mod alias;
pub mod backend;
pub mod error;
pub mod event_selector;
pub mod limit;
pub mod metadata;
pub mod output;
pub mod provenance;
pub mod replay;
pub mod selector;
pub mod storage;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use alias::AliasTable;
pub use backend::{KeptPayload, OutputBackend};
pub use error::{BackendError, ConfigurationError, OutputError, Result};
pub use event_selector::{EventSelector, SelectorConfigId};
pub use limit::EventLimit;
pub use metadata::{FileMetadata, OutputFileInfo};
pub use output::{FileState, OutputModule};
pub use provenance::{BranchChildren, BranchParents, ProvenanceTracker};
pub use replay::{replay, InputFilePlan, JobPlan, LuminosityBlockPlan, ReplaySummary, RunPlan};
pub use selector::{KeptProducts, ProductSelection, ProductSelectorRules};
pub use storage::SegmentFileBackend;
