//! Value types shared between the output stage and its collaborators.

pub mod parentage;
pub mod product;
pub mod record;
pub mod trigger;

pub use parentage::{Parentage, ParentageId, ProductProvenance};
pub use product::{BranchId, BranchType, ProductCatalog, ProductDescriptor};
pub use record::{
    EventId, EventRecord, FileBlock, LuminosityBlockRecord, Product, ProductMap, RunRecord,
};
pub use trigger::{PathStatus, TriggerResults};
