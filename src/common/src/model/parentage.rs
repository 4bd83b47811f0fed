use super::product::BranchId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Content-derived key of a [`Parentage`]
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParentageId(String);

impl ParentageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParentageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The set of parent products a product was derived from.
///
/// Parents are kept sorted and deduplicated so that equal sets always hash
/// to the same [`ParentageId`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parentage {
    parents: Vec<BranchId>,
}

impl Parentage {
    pub fn new(parents: impl IntoIterator<Item = BranchId>) -> Self {
        let mut parents: Vec<BranchId> = parents.into_iter().collect();
        parents.sort_unstable();
        parents.dedup();
        Self { parents }
    }

    pub fn parents(&self) -> &[BranchId] {
        &self.parents
    }

    pub fn id(&self) -> ParentageId {
        let mut hasher = Sha256::new();
        for parent in &self.parents {
            hasher.update(parent.0.to_be_bytes());
        }
        ParentageId(hex::encode(hasher.finalize()))
    }
}

/// Immediate parents of one product, as recorded by its producer
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductProvenance {
    #[serde(default)]
    pub parents: Vec<BranchId>,
}

impl ProductProvenance {
    pub fn new(parents: impl IntoIterator<Item = BranchId>) -> Self {
        Self {
            parents: parents.into_iter().collect(),
        }
    }
}
