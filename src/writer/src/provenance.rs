//! Parent/child bookkeeping between written products.
//!
//! Per event only the child -> parentage direction is accumulated. The
//! inverse parent -> children relation is derived on demand from it, at file
//! close and at end of job.

use crate::selector::ProductSelection;
use common::model::{BranchId, EventRecord, Parentage, ParentageId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub type BranchParents = BTreeMap<BranchId, BTreeSet<ParentageId>>;

/// Deduplicated store of every parent set seen by one tracker
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentageRegistry {
    entries: BTreeMap<ParentageId, Parentage>,
}

impl ParentageRegistry {
    pub fn insert(&mut self, parentage: Parentage) -> ParentageId {
        let id = parentage.id();
        self.entries.entry(id.clone()).or_insert(parentage);
        id
    }

    pub fn get(&self, id: &ParentageId) -> Option<&Parentage> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parent product -> products that consumed it
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchChildren {
    children: BTreeMap<BranchId, BTreeSet<BranchId>>,
}

impl BranchChildren {
    fn insert_empty(&mut self, parent: BranchId) {
        self.children.entry(parent).or_default();
    }

    fn insert_child(&mut self, parent: BranchId, child: BranchId) {
        self.children.entry(parent).or_default().insert(child);
    }

    pub fn children_of(&self, parent: BranchId) -> Option<&BTreeSet<BranchId>> {
        self.children.get(&parent)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BranchId, &BTreeSet<BranchId>)> {
        self.children.iter()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

/// Provenance written into an output file's metadata
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceSnapshot {
    pub branch_parents: BranchParents,
    pub parentages: BTreeMap<ParentageId, Parentage>,
}

#[derive(Debug, Default)]
pub struct ProvenanceTracker {
    branch_parents: BranchParents,
    registry: ParentageRegistry,
}

impl ProvenanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the parentage of every kept product written with `event`.
    ///
    /// Parents that were dropped are redirected to the kept alias carrying
    /// the same payload; dropped parents without such an alias are left out.
    pub fn update_from_event(&mut self, event: &EventRecord, selection: &ProductSelection) {
        for (&branch_id, product) in &event.products {
            if !selection.is_kept(branch_id) {
                continue;
            }

            let parents = product.provenance.parents.iter().filter_map(|&parent| {
                if selection.is_kept(parent) {
                    Some(parent)
                } else {
                    selection.aliases().kept_for_dropped(parent)
                }
            });
            let parentage_id = self.registry.insert(Parentage::new(parents));

            self.branch_parents
                .entry(branch_id)
                .or_default()
                .insert(parentage_id);
        }
    }

    /// Invert the accumulated parentage into parent -> children.
    ///
    /// Every product that was written gets an entry, possibly empty.
    pub fn fill_dependency_graph(&self) -> BranchChildren {
        let mut children = BranchChildren::default();
        for (&child, parentage_ids) in &self.branch_parents {
            children.insert_empty(child);
            for parentage_id in parentage_ids {
                let Some(parentage) = self.registry.get(parentage_id) else {
                    log::warn!("parentage {parentage_id} of branch {child} is not registered");
                    continue;
                };
                for &parent in parentage.parents() {
                    children.insert_child(parent, child);
                }
            }
        }
        children
    }

    pub fn branch_parents(&self) -> &BranchParents {
        &self.branch_parents
    }

    pub fn registry(&self) -> &ParentageRegistry {
        &self.registry
    }

    pub fn snapshot(&self) -> ProvenanceSnapshot {
        let parentages = self
            .branch_parents
            .values()
            .flatten()
            .filter_map(|id| self.registry.get(id).map(|p| (id.clone(), p.clone())))
            .collect();
        ProvenanceSnapshot {
            branch_parents: self.branch_parents.clone(),
            parentages,
        }
    }
}
