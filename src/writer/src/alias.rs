use crate::selector::SelectionDecision;
use common::model::{BranchId, ProductCatalog, ProductDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Redirections between a dropped product and the kept alias carrying the
/// same payload. Entries only exist where the two identities differ.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasTable {
    dropped_to_kept: HashMap<BranchId, BranchId>,
    kept_to_dropped: HashMap<BranchId, BranchId>,
}

impl AliasTable {
    /// Build the table once selection is final.
    ///
    /// `original_to_kept` maps the underlying identity of every kept product
    /// of this process to that product. A catalog entry whose own identity is
    /// such an underlying identity, but which was not kept itself, is
    /// superseded by the kept product.
    pub(crate) fn build(
        catalog: &ProductCatalog,
        original_to_kept: &BTreeMap<BranchId, Arc<ProductDescriptor>>,
        decisions: &BTreeMap<BranchId, SelectionDecision>,
    ) -> Self {
        let mut table = AliasTable::default();
        if original_to_kept.is_empty() {
            return table;
        }

        for desc in catalog.iter() {
            let Some(kept) = original_to_kept.get(&desc.branch_id) else {
                continue;
            };
            let already_kept = decisions.get(&desc.branch_id).is_some_and(|d| d.keep);
            if kept.branch_id != desc.branch_id && !already_kept {
                log::debug!(
                    "{} is written through its alias {}",
                    desc.branch_name(),
                    kept.branch_name()
                );
                table.insert(desc.branch_id, kept.branch_id);
            }
        }
        table
    }

    fn insert(&mut self, dropped: BranchId, kept: BranchId) {
        if dropped == kept {
            return;
        }
        self.dropped_to_kept.insert(dropped, kept);
        self.kept_to_dropped.insert(kept, dropped);
    }

    pub fn kept_for_dropped(&self, dropped: BranchId) -> Option<BranchId> {
        self.dropped_to_kept.get(&dropped).copied()
    }

    pub fn dropped_for_kept(&self, kept: BranchId) -> Option<BranchId> {
        self.kept_to_dropped.get(&kept).copied()
    }

    pub fn dropped_to_kept(&self) -> &HashMap<BranchId, BranchId> {
        &self.dropped_to_kept
    }

    pub fn kept_to_dropped(&self) -> &HashMap<BranchId, BranchId> {
        &self.kept_to_dropped
    }

    pub fn len(&self) -> usize {
        self.dropped_to_kept.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dropped_to_kept.is_empty()
    }
}
