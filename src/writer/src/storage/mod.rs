//! Storage backends for output files.

pub mod segment;

pub use segment::{
    read_segment, SegmentFileBackend, StoredEvent, StoredLuminosityBlock, StoredProduct,
    StoredRecord, StoredRun, SEGMENT_EXTENSION,
};
