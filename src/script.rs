//! JSON job scripts for `eventout replay`.
//!
//! A script names products by branch name (`Class_label_instance_PROCESS.`);
//! loading resolves every name against the script's own catalog.

use anyhow::{anyhow, bail, Context, Result};
use common::model::{
    BranchId, BranchType, EventId, EventRecord, FileBlock, LuminosityBlockRecord, PathStatus,
    Product, ProductCatalog, ProductDescriptor, ProductMap, RunRecord, TriggerResults,
};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use writer::{InputFilePlan, JobPlan, LuminosityBlockPlan, RunPlan};

#[derive(Debug, Deserialize)]
pub struct JobScript {
    pub catalog: Vec<ScriptProduct>,
    #[serde(default)]
    pub input_files: Vec<ScriptInputFile>,
}

#[derive(Debug, Deserialize)]
pub struct ScriptProduct {
    pub branch_type: BranchType,
    #[serde(rename = "type")]
    pub friendly_class_name: String,
    pub module_label: String,
    #[serde(default)]
    pub instance: String,
    pub process_name: String,
    /// Branch name of the product this one aliases
    #[serde(default)]
    pub alias_of: Option<String>,
    #[serde(default)]
    pub from_input: bool,
    #[serde(default)]
    pub dropped_upstream: bool,
    #[serde(default)]
    pub transient: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScriptProductData {
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub parents: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ScriptTriggerResults {
    pub process_name: String,
    /// `[path name, status]` pairs in path order
    pub paths: Vec<(String, PathStatus)>,
}

#[derive(Debug, Deserialize)]
pub struct ScriptEvent {
    pub event: u64,
    #[serde(default)]
    pub products: BTreeMap<String, ScriptProductData>,
    #[serde(default)]
    pub trigger_results: Vec<ScriptTriggerResults>,
}

#[derive(Debug, Deserialize)]
pub struct ScriptLuminosityBlock {
    pub luminosity_block: u32,
    #[serde(default)]
    pub products: BTreeMap<String, ScriptProductData>,
    #[serde(default)]
    pub events: Vec<ScriptEvent>,
}

#[derive(Debug, Deserialize)]
pub struct ScriptRun {
    pub run: u32,
    #[serde(default)]
    pub products: BTreeMap<String, ScriptProductData>,
    #[serde(default)]
    pub luminosity_blocks: Vec<ScriptLuminosityBlock>,
}

#[derive(Debug, Deserialize)]
pub struct ScriptInputFile {
    pub file_name: String,
    #[serde(default)]
    pub runs: Vec<ScriptRun>,
}

/// A loaded job: the product catalog and the records to replay
pub struct Job {
    pub catalog: ProductCatalog,
    pub plan: JobPlan,
}

pub fn load_job(path: &Path) -> Result<Job> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read job script {}", path.display()))?;
    let script: JobScript = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse job script {}", path.display()))?;
    script.into_job()
}

impl ScriptProduct {
    fn descriptor(&self) -> ProductDescriptor {
        let mut descriptor = ProductDescriptor::new(
            self.branch_type,
            &self.friendly_class_name,
            &self.module_label,
            &self.instance,
            &self.process_name,
        );
        if self.dropped_upstream {
            descriptor = descriptor.dropped_upstream();
        } else if self.from_input {
            descriptor = descriptor.from_input();
        }
        if self.transient {
            descriptor = descriptor.transient();
        }
        descriptor
    }
}

struct Resolver {
    branch_ids: HashMap<String, BranchId>,
}

impl Resolver {
    fn id(&self, branch_name: &str) -> Result<BranchId> {
        self.branch_ids
            .get(branch_name)
            .copied()
            .ok_or_else(|| anyhow!("unknown branch '{branch_name}'"))
    }

    fn products(&self, products: &BTreeMap<String, ScriptProductData>) -> Result<ProductMap> {
        products
            .iter()
            .map(|(name, data)| {
                let parents = data
                    .parents
                    .iter()
                    .map(|parent| self.id(parent))
                    .collect::<Result<Vec<_>>>()?;
                let product = Product::new(data.payload.as_bytes()).with_parents(parents);
                Ok((self.id(name)?, product))
            })
            .collect()
    }
}

impl JobScript {
    pub fn into_job(self) -> Result<Job> {
        let mut descriptors: Vec<ProductDescriptor> =
            self.catalog.iter().map(ScriptProduct::descriptor).collect();

        let by_name: HashMap<String, ProductDescriptor> = descriptors
            .iter()
            .map(|d| (d.branch_name(), d.clone()))
            .collect();
        for (descriptor, entry) in descriptors.iter_mut().zip(&self.catalog) {
            if let Some(target) = &entry.alias_of {
                let Some(target) = by_name.get(target) else {
                    bail!(
                        "{} is an alias of unknown branch '{target}'",
                        descriptor.branch_name()
                    );
                };
                *descriptor = descriptor.clone().alias_of(target);
            }
        }

        let resolver = Resolver {
            branch_ids: descriptors
                .iter()
                .map(|d| (d.branch_name(), d.branch_id))
                .collect(),
        };
        let catalog = ProductCatalog::try_from(descriptors)?;

        let input_files = self
            .input_files
            .iter()
            .map(|file| resolver.input_file(file))
            .collect::<Result<Vec<_>>>()?;

        Ok(Job {
            catalog,
            plan: JobPlan { input_files },
        })
    }
}

impl Resolver {
    fn input_file(&self, file: &ScriptInputFile) -> Result<InputFilePlan> {
        let runs = file
            .runs
            .iter()
            .map(|run| self.run(run))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("in input file {}", file.file_name))?;
        Ok(InputFilePlan {
            file: FileBlock::new(&file.file_name),
            runs,
        })
    }

    fn run(&self, run: &ScriptRun) -> Result<RunPlan> {
        let mut record = RunRecord::new(run.run);
        record.products = self.products(&run.products)?;

        let luminosity_blocks = run
            .luminosity_blocks
            .iter()
            .map(|lumi| self.luminosity_block(run.run, lumi))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("in run {}", run.run))?;
        Ok(RunPlan {
            run: record,
            luminosity_blocks,
        })
    }

    fn luminosity_block(
        &self,
        run: u32,
        lumi: &ScriptLuminosityBlock,
    ) -> Result<LuminosityBlockPlan> {
        let mut block = LuminosityBlockRecord::new(run, lumi.luminosity_block);
        block.products = self.products(&lumi.products)?;

        let events = lumi
            .events
            .iter()
            .map(|event| {
                let id = EventId::new(run, lumi.luminosity_block, event.event);
                let mut record = EventRecord::new(id);
                record.products = self
                    .products(&event.products)
                    .with_context(|| format!("in event {id}"))?;
                for results in &event.trigger_results {
                    let trigger = results.paths.iter().fold(
                        TriggerResults::new(&results.process_name),
                        |acc, (path, status)| acc.with_path(path, *status),
                    );
                    record = record.with_trigger_results(trigger);
                }
                Ok(record)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(LuminosityBlockPlan { block, events })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = r#"{
        "catalog": [
            {"branch_type": "event", "type": "recoPhotons", "module_label": "photons", "process_name": "RECO"},
            {"branch_type": "event", "type": "recoPhotons", "module_label": "gedPhotons", "process_name": "RECO",
             "alias_of": "recoPhotons_photons__RECO."},
            {"branch_type": "run", "type": "edmMergeableCounter", "module_label": "events", "process_name": "RECO"}
        ],
        "input_files": [{
            "file_name": "input.root",
            "runs": [{
                "run": 1,
                "products": {"edmMergeableCounter_events__RECO.": {"payload": "42"}},
                "luminosity_blocks": [{
                    "luminosity_block": 7,
                    "events": [{
                        "event": 3,
                        "products": {
                            "recoPhotons_photons__RECO.": {"payload": "p"},
                            "recoPhotons_gedPhotons__RECO.": {"payload": "p", "parents": ["recoPhotons_photons__RECO."]}
                        },
                        "trigger_results": [{"process_name": "HLT", "paths": [["pathA", "pass"], ["pathB", "fail"]]}]
                    }]
                }]
            }]
        }]
    }"#;

    #[test]
    fn test_script_resolves_branch_names() {
        let script: JobScript = serde_json::from_str(SCRIPT).unwrap();
        let job = script.into_job().unwrap();

        assert_eq!(job.catalog.len(), 3);
        assert_eq!(job.plan.event_count(), 1);

        let photons = BranchId::from_branch_name("recoPhotons_photons__RECO.");
        let ged = BranchId::from_branch_name("recoPhotons_gedPhotons__RECO.");
        assert_eq!(job.catalog.get(ged).unwrap().original_branch_id, photons);

        let run = &job.plan.input_files[0].runs[0];
        assert_eq!(run.run.products.len(), 1);
        let event = &run.luminosity_blocks[0].events[0];
        assert_eq!(event.id, EventId::new(1, 7, 3));
        assert_eq!(event.products[&ged].provenance.parents, vec![photons]);
        assert_eq!(event.products[&photons].payload, b"p".to_vec());

        let hlt = &event.trigger_results["HLT"];
        assert_eq!(hlt.path_names, vec!["pathA", "pathB"]);
        assert!(hlt.accepted(0));
    }

    #[test]
    fn test_unknown_branch_is_rejected() {
        let script: JobScript = serde_json::from_str(
            r#"{
                "catalog": [{"branch_type": "event", "type": "A", "module_label": "a", "process_name": "P"}],
                "input_files": [{"file_name": "f", "runs": [{"run": 1, "luminosity_blocks": [{
                    "luminosity_block": 1,
                    "events": [{"event": 1, "products": {"B_b__P.": {}}}]
                }]}]}]
            }"#,
        )
        .unwrap();
        let err = script.into_job().err().unwrap();
        assert!(format!("{err:#}").contains("unknown branch 'B_b__P.'"));
    }

    #[test]
    fn test_unknown_alias_target_is_rejected() {
        let script: JobScript = serde_json::from_str(
            r#"{"catalog": [{"branch_type": "event", "type": "A", "module_label": "a",
                             "process_name": "P", "alias_of": "Z_z__P."}]}"#,
        )
        .unwrap();
        assert!(script.into_job().is_err());
    }
}
