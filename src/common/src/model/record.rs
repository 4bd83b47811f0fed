use super::parentage::ProductProvenance;
use super::product::BranchId;
use super::trigger::TriggerResults;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One product payload together with its provenance
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    #[serde(default)]
    pub payload: Vec<u8>,
    #[serde(default)]
    pub provenance: ProductProvenance,
}

impl Product {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            provenance: ProductProvenance::default(),
        }
    }

    pub fn with_parents(mut self, parents: impl IntoIterator<Item = BranchId>) -> Self {
        self.provenance = ProductProvenance::new(parents);
        self
    }
}

pub type ProductMap = BTreeMap<BranchId, Product>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId {
    pub run: u32,
    pub luminosity_block: u32,
    pub event: u64,
}

impl EventId {
    pub fn new(run: u32, luminosity_block: u32, event: u64) -> Self {
        Self {
            run,
            luminosity_block,
            event,
        }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.run, self.luminosity_block, self.event)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: EventId,
    #[serde(default)]
    pub products: ProductMap,
    /// Trigger results keyed by the process that produced them
    #[serde(default)]
    pub trigger_results: BTreeMap<String, TriggerResults>,
}

impl EventRecord {
    pub fn new(id: EventId) -> Self {
        Self {
            id,
            products: ProductMap::new(),
            trigger_results: BTreeMap::new(),
        }
    }

    pub fn with_product(mut self, branch_id: BranchId, product: Product) -> Self {
        self.products.insert(branch_id, product);
        self
    }

    pub fn with_trigger_results(mut self, results: TriggerResults) -> Self {
        self.trigger_results
            .insert(results.process_name.clone(), results);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run: u32,
    #[serde(default)]
    pub products: ProductMap,
}

impl RunRecord {
    pub fn new(run: u32) -> Self {
        Self {
            run,
            products: ProductMap::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LuminosityBlockRecord {
    pub run: u32,
    pub luminosity_block: u32,
    #[serde(default)]
    pub products: ProductMap,
}

impl LuminosityBlockRecord {
    pub fn new(run: u32, luminosity_block: u32) -> Self {
        Self {
            run,
            luminosity_block,
            products: ProductMap::new(),
        }
    }
}

/// An upstream input file, as announced at input-file boundaries
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBlock {
    pub file_name: String,
    #[serde(default)]
    pub branch_ids_present: Vec<BranchId>,
}

impl FileBlock {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            branch_ids_present: Vec::new(),
        }
    }
}
