use crate::event_selector::SelectorConfigId;
use crate::provenance::ProvenanceSnapshot;
use chrono::{DateTime, Utc};
use common::model::{BranchId, BranchType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Identity of an output file, fixed when it is opened
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFileInfo {
    pub file_id: Uuid,
    /// 0 for the first file of the job, incremented on every rotation
    pub sequence: u32,
    pub opened_at: DateTime<Utc>,
}

/// Everything a reader needs to interpret one output file, written at close
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub file: OutputFileInfo,
    pub closed_at: DateTime<Utc>,
    pub module_label: String,
    pub process_name: String,
    pub events_written: u64,
    pub kept_branches: BTreeMap<BranchType, Vec<String>>,
    pub has_newly_dropped_branch: [bool; BranchType::COUNT],
    pub selector_config: SelectorConfigId,
    /// Alias map, dropped original identity to the kept product standing in for it
    pub dropped_to_kept: BTreeMap<BranchId, BranchId>,
    pub kept_to_dropped: BTreeMap<BranchId, BranchId>,
    pub provenance: ProvenanceSnapshot,
}
