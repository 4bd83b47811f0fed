use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// The category of record a product is attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchType {
    Event,
    LuminosityBlock,
    Run,
}

impl BranchType {
    pub const COUNT: usize = 3;

    pub const ALL: [BranchType; Self::COUNT] =
        [BranchType::Event, BranchType::LuminosityBlock, BranchType::Run];

    /// Dense index for per-type arrays
    pub fn index(self) -> usize {
        match self {
            BranchType::Event => 0,
            BranchType::LuminosityBlock => 1,
            BranchType::Run => 2,
        }
    }
}

impl fmt::Display for BranchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BranchType::Event => "event",
            BranchType::LuminosityBlock => "luminosity_block",
            BranchType::Run => "run",
        };
        write!(f, "{s}")
    }
}

/// Stable identity of a branch, derived from its branch name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchId(pub u32);

impl BranchId {
    /// Hash a branch name into its identity (first four bytes of SHA-256, big endian)
    pub fn from_branch_name(branch_name: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(branch_name.as_bytes());
        let digest = hasher.finalize();
        BranchId(u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]))
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Describes one produced data item.
///
/// The identity fields (type, module label, instance label, process name) are
/// fixed at construction; the builder-style setters only adjust the
/// availability flags and alias target before the descriptor is registered in
/// a [`ProductCatalog`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDescriptor {
    pub branch_type: BranchType,
    pub friendly_class_name: String,
    pub module_label: String,
    #[serde(default)]
    pub product_instance_name: String,
    pub process_name: String,
    pub branch_id: BranchId,
    /// Identity of the product an alias points at; equals `branch_id` otherwise
    pub original_branch_id: BranchId,
    /// Made by the current process
    #[serde(default = "default_true")]
    pub produced: bool,
    /// Available from the input
    #[serde(default = "default_true")]
    pub present: bool,
    #[serde(default)]
    pub transient: bool,
}

fn default_true() -> bool {
    true
}

impl ProductDescriptor {
    pub fn new(
        branch_type: BranchType,
        friendly_class_name: impl Into<String>,
        module_label: impl Into<String>,
        product_instance_name: impl Into<String>,
        process_name: impl Into<String>,
    ) -> Self {
        let friendly_class_name = friendly_class_name.into();
        let module_label = module_label.into();
        let product_instance_name = product_instance_name.into();
        let process_name = process_name.into();
        let branch_id = BranchId::from_branch_name(&branch_name(
            &friendly_class_name,
            &module_label,
            &product_instance_name,
            &process_name,
        ));
        Self {
            branch_type,
            friendly_class_name,
            module_label,
            product_instance_name,
            process_name,
            branch_id,
            original_branch_id: branch_id,
            produced: true,
            present: true,
            transient: false,
        }
    }

    /// Mark this descriptor as an alias of `target`
    pub fn alias_of(mut self, target: &ProductDescriptor) -> Self {
        self.original_branch_id = target.original_branch_id;
        self
    }

    /// Mark this descriptor as coming from the input rather than this process
    pub fn from_input(mut self) -> Self {
        self.produced = false;
        self
    }

    /// Mark this descriptor as dropped by an earlier process
    pub fn dropped_upstream(mut self) -> Self {
        self.produced = false;
        self.present = false;
        self
    }

    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    pub fn branch_name(&self) -> String {
        branch_name(
            &self.friendly_class_name,
            &self.module_label,
            &self.product_instance_name,
            &self.process_name,
        )
    }

    pub fn is_alias(&self) -> bool {
        self.branch_id != self.original_branch_id
    }

    pub fn is_dropped_upstream(&self) -> bool {
        !self.present && !self.produced
    }
}

fn branch_name(class: &str, label: &str, instance: &str, process: &str) -> String {
    format!("{class}_{label}_{instance}_{process}.")
}

/// Every product known to the job, keyed by branch identity.
#[derive(Clone, Debug, Default)]
pub struct ProductCatalog {
    products: BTreeMap<BranchId, Arc<ProductDescriptor>>,
}

impl ProductCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor. Two descriptors with the same branch identity are rejected.
    pub fn insert(&mut self, descriptor: ProductDescriptor) -> anyhow::Result<Arc<ProductDescriptor>> {
        if let Some(existing) = self.products.get(&descriptor.branch_id) {
            anyhow::bail!(
                "branch {} is already registered as {}",
                descriptor.branch_name(),
                existing.branch_name()
            );
        }
        let descriptor = Arc::new(descriptor);
        self.products
            .insert(descriptor.branch_id, Arc::clone(&descriptor));
        Ok(descriptor)
    }

    pub fn get(&self, branch_id: BranchId) -> Option<&Arc<ProductDescriptor>> {
        self.products.get(&branch_id)
    }

    pub fn contains(&self, branch_id: BranchId) -> bool {
        self.products.contains_key(&branch_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ProductDescriptor>> {
        self.products.values()
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

impl TryFrom<Vec<ProductDescriptor>> for ProductCatalog {
    type Error = anyhow::Error;

    fn try_from(descriptors: Vec<ProductDescriptor>) -> Result<Self, Self::Error> {
        let mut catalog = ProductCatalog::new();
        for descriptor in descriptors {
            catalog.insert(descriptor)?;
        }
        Ok(catalog)
    }
}
