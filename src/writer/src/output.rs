//! The output module: record selection and output-file lifecycle for one
//! output stream.
//!
//! An external scheduler drives the module through
//! `begin_job -> {begin_run -> {begin_luminosity_block -> {write_event}* ->
//! end_luminosity_block}* -> end_run}* -> end_job`, interleaved with file
//! open/close calls. Output files move through `Closed -> Open -> Closing ->
//! Closed`; a rotation is a close immediately followed by an open.

use crate::backend::{KeptPayload, OutputBackend};
use crate::error::{OutputError, Result};
use crate::event_selector::{EventSelector, SelectorConfigId};
use crate::limit::EventLimit;
use crate::metadata::{FileMetadata, OutputFileInfo};
use crate::provenance::{BranchChildren, ProvenanceTracker};
use crate::selector::{KeptProducts, ProductSelection, ProductSelectorRules};
use chrono::Utc;
use common::config::{Configuration, OutputModuleConfig};
use common::model::{
    BranchType, EventRecord, FileBlock, LuminosityBlockRecord, ProductCatalog, ProductDescriptor,
    ProductMap, RunRecord,
};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileState {
    Closed,
    Open,
    Closing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum JobState {
    Constructed,
    Running,
    Ended,
}

#[derive(Debug)]
struct CurrentFile {
    info: OutputFileInfo,
    events_written: u64,
}

pub struct OutputModule<B: OutputBackend> {
    module_label: String,
    process_name: String,
    rules: ProductSelectorRules,
    event_selector: EventSelector,
    selection: ProductSelection,
    limit: EventLimit,
    provenance: ProvenanceTracker,
    branch_children: Option<BranchChildren>,
    backend: B,
    job_state: JobState,
    file_state: FileState,
    current_file: Option<CurrentFile>,
    next_sequence: u32,
}

/// Kept products of `branch_type` present in `products`, in kept-list order
fn kept_payloads<'a>(
    kept: &'a [Arc<ProductDescriptor>],
    products: &'a ProductMap,
) -> Vec<KeptPayload<'a>> {
    kept.iter()
        .filter_map(|descriptor| {
            products.get(&descriptor.branch_id).map(|product| KeptPayload {
                descriptor: descriptor.as_ref(),
                product,
            })
        })
        .collect()
}

impl<B: OutputBackend> OutputModule<B> {
    /// Compile selection rules and event-selection specs; malformed ones fail here.
    pub fn new(process_name: &str, config: &OutputModuleConfig, backend: B) -> Result<Self> {
        let rules = ProductSelectorRules::new(&config.output_commands, config.default_polarity)?;
        let event_selector = EventSelector::new(&config.select_events, process_name)?;

        Ok(Self {
            module_label: config.module_label.clone(),
            process_name: process_name.to_string(),
            rules,
            event_selector,
            selection: ProductSelection::default(),
            limit: EventLimit::new(config.max_events),
            provenance: ProvenanceTracker::new(),
            branch_children: None,
            backend,
            job_state: JobState::Constructed,
            file_state: FileState::Closed,
            current_file: None,
            next_sequence: 0,
        })
    }

    pub fn from_configuration(config: &Configuration, backend: B) -> Result<Self> {
        Self::new(&config.process_name, &config.output, backend)
    }

    fn require_running(&self, operation: &'static str) -> Result<()> {
        match self.job_state {
            JobState::Running => Ok(()),
            JobState::Constructed => Err(OutputError::ordering(operation, "job has not begun")),
            JobState::Ended => Err(OutputError::ordering(operation, "job has already ended")),
        }
    }

    fn require_open(&self, operation: &'static str) -> Result<()> {
        self.require_running(operation)?;
        match self.file_state {
            FileState::Open => Ok(()),
            state => Err(OutputError::ordering(
                operation,
                format!("output file is {state:?}, not Open"),
            )),
        }
    }

    /// Freeze product selection against the job's catalog
    pub fn begin_job(&mut self, catalog: &ProductCatalog) -> Result<()> {
        if self.job_state != JobState::Constructed {
            return Err(OutputError::ordering("begin_job", "job already begun"));
        }

        self.selection = ProductSelection::compute(&self.rules, catalog)?;
        self.job_state = JobState::Running;

        let kept = self.selection.kept_products();
        log::info!(
            "{}: keeping {} of {} products (event={}, lumi={}, run={}), {}",
            self.module_label,
            kept.len(),
            catalog.len(),
            kept.get(BranchType::Event).len(),
            kept.get(BranchType::LuminosityBlock).len(),
            kept.get(BranchType::Run).len(),
            if self.event_selector.want_all_events() {
                "writing all events".to_string()
            } else {
                format!("event selection {}", self.event_selector.selector_config())
            }
        );

        self.backend.begin_job()?;
        Ok(())
    }

    /// Close any open file and derive the product dependency graph.
    ///
    /// Also the cleanup path after an aborted job: the graph is materialized
    /// and the job marked ended even if closing the file fails.
    pub fn end_job(&mut self) -> Result<()> {
        self.require_running("end_job")?;

        let close_result = if self.file_state == FileState::Open {
            self.really_close_file()
        } else {
            Ok(())
        };
        self.branch_children = Some(self.provenance.fill_dependency_graph());
        self.job_state = JobState::Ended;
        close_result?;

        log::info!(
            "{}: job ended, {} files written",
            self.module_label,
            self.next_sequence
        );
        self.backend.end_job()?;
        Ok(())
    }

    pub fn begin_run(&mut self, run: &RunRecord) -> Result<()> {
        self.require_running("begin_run")?;
        self.backend.begin_run(run)?;
        Ok(())
    }

    pub fn end_run(&mut self, run: &RunRecord) -> Result<()> {
        self.require_running("end_run")?;
        self.backend.end_run(run)?;
        Ok(())
    }

    pub fn begin_luminosity_block(&mut self, block: &LuminosityBlockRecord) -> Result<()> {
        self.require_running("begin_luminosity_block")?;
        self.backend.begin_luminosity_block(block)?;
        Ok(())
    }

    pub fn end_luminosity_block(&mut self, block: &LuminosityBlockRecord) -> Result<()> {
        self.require_running("end_luminosity_block")?;
        self.backend.end_luminosity_block(block)?;
        Ok(())
    }

    /// Open an output file unless one is already open
    pub fn open_if_needed(&mut self) -> Result<()> {
        self.require_running("open_if_needed")?;
        match self.file_state {
            FileState::Open => Ok(()),
            FileState::Closing => Err(OutputError::ordering(
                "open_if_needed",
                "previous output file did not finish closing",
            )),
            FileState::Closed => self.really_open_file(),
        }
    }

    /// Input-file boundary: make sure an output file is open, then notify the backend
    pub fn open_file(&mut self, file: &FileBlock) -> Result<()> {
        self.open_if_needed()?;
        self.backend.open_file(file)?;
        Ok(())
    }

    /// Close the current output file if one is open
    pub fn close_file(&mut self) -> Result<()> {
        self.require_running("close_file")?;
        if self.file_state == FileState::Open {
            self.really_close_file()?;
        }
        Ok(())
    }

    /// Close the current file if the backend asks for it; returns whether it did
    pub fn close_file_if_requested(&mut self) -> Result<bool> {
        self.require_running("close_file_if_requested")?;
        if self.file_state == FileState::Open && self.backend.should_close_file() {
            self.really_close_file()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Close and immediately reopen when the backend asks for a new file
    pub fn rotate_if_requested(&mut self) -> Result<bool> {
        if self.close_file_if_requested()? {
            self.open_if_needed()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn really_open_file(&mut self) -> Result<()> {
        let info = OutputFileInfo {
            file_id: Uuid::new_v4(),
            sequence: self.next_sequence,
            opened_at: Utc::now(),
        };
        self.backend.really_open_file(&info)?;

        log::info!(
            "{}: opened output file #{} ({})",
            self.module_label,
            info.sequence,
            info.file_id
        );
        self.next_sequence += 1;
        self.current_file = Some(CurrentFile {
            info,
            events_written: 0,
        });
        self.file_state = FileState::Open;
        Ok(())
    }

    fn really_close_file(&mut self) -> Result<()> {
        self.file_state = FileState::Closing;
        let Some(current) = self.current_file.take() else {
            return Err(OutputError::ordering(
                "close_file",
                "file marked open without file information",
            ));
        };

        let metadata = self.file_metadata(current);
        self.backend.really_close_file(&metadata)?;

        log::info!(
            "{}: closed output file #{} with {} events",
            self.module_label,
            metadata.file.sequence,
            metadata.events_written
        );
        self.file_state = FileState::Closed;
        Ok(())
    }

    fn file_metadata(&self, current: CurrentFile) -> FileMetadata {
        let kept = self.selection.kept_products();
        let aliases = self.selection.aliases();
        FileMetadata {
            file: current.info,
            closed_at: Utc::now(),
            module_label: self.module_label.clone(),
            process_name: self.process_name.clone(),
            events_written: current.events_written,
            kept_branches: BranchType::ALL
                .iter()
                .map(|&bt| (bt, kept.branch_names(bt)))
                .collect(),
            has_newly_dropped_branch: *self.selection.has_newly_dropped_branch(),
            selector_config: self.event_selector.selector_config().clone(),
            dropped_to_kept: aliases
                .dropped_to_kept()
                .iter()
                .map(|(&dropped, &kept)| (dropped, kept))
                .collect(),
            kept_to_dropped: aliases
                .kept_to_dropped()
                .iter()
                .map(|(&kept, &dropped)| (kept, dropped))
                .collect(),
            provenance: self.provenance.snapshot(),
        }
    }

    /// Write one event if the trigger selection and the event limit allow it.
    ///
    /// Returns `Ok(false)` for a rejected event; nothing is written and no
    /// counter or provenance changes in that case.
    pub fn write_event(&mut self, event: &EventRecord) -> Result<bool> {
        self.require_open("write_event")?;

        if !self.event_selector.want_event(&event.trigger_results)? {
            log::debug!("{}: event {} rejected by selection", self.module_label, event.id);
            return Ok(false);
        }
        if self.limit.reached() {
            log::debug!(
                "{}: event {} not written, event limit reached",
                self.module_label,
                event.id
            );
            return Ok(false);
        }

        let payloads = kept_payloads(
            self.selection.kept_products().get(BranchType::Event),
            &event.products,
        );
        self.backend.write_event(event.id, &payloads)?;

        self.limit.consume()?;
        if let Some(current) = self.current_file.as_mut() {
            current.events_written += 1;
        }
        self.provenance.update_from_event(event, &self.selection);
        Ok(true)
    }

    pub fn write_run(&mut self, run: &RunRecord) -> Result<()> {
        self.require_open("write_run")?;
        let payloads = kept_payloads(
            self.selection.kept_products().get(BranchType::Run),
            &run.products,
        );
        self.backend.write_run(run.run, &payloads)?;
        Ok(())
    }

    pub fn write_luminosity_block(&mut self, block: &LuminosityBlockRecord) -> Result<()> {
        self.require_open("write_luminosity_block")?;
        let payloads = kept_payloads(
            self.selection.kept_products().get(BranchType::LuminosityBlock),
            &block.products,
        );
        self.backend
            .write_luminosity_block(block.run, block.luminosity_block, &payloads)?;
        Ok(())
    }

    pub fn respond_to_open_input_file(&mut self, file: &FileBlock) -> Result<()> {
        self.require_running("respond_to_open_input_file")?;
        self.backend.respond_to_open_input_file(file)?;
        Ok(())
    }

    pub fn respond_to_close_input_file(&mut self, file: &FileBlock) -> Result<()> {
        self.require_running("respond_to_close_input_file")?;
        self.backend.respond_to_close_input_file(file)?;
        Ok(())
    }

    pub fn pre_fork_release_resources(&mut self) -> Result<()> {
        self.backend.pre_fork_release_resources()?;
        Ok(())
    }

    pub fn post_fork_reacquire_resources(
        &mut self,
        child_index: u32,
        number_of_children: u32,
    ) -> Result<()> {
        self.backend
            .post_fork_reacquire_resources(child_index, number_of_children)?;
        Ok(())
    }

    /// Whether the rules select `desc`, independent of catalog state
    pub fn selected(&self, desc: &ProductDescriptor) -> bool {
        self.rules.select(desc)
    }

    pub fn max_events(&self) -> Option<u64> {
        self.limit.max()
    }

    pub fn remaining_events(&self) -> Option<u64> {
        self.limit.remaining()
    }

    pub fn limit_reached(&self) -> bool {
        self.limit.reached()
    }

    /// Empty until `begin_job`
    pub fn kept_products(&self) -> &KeptProducts {
        self.selection.kept_products()
    }

    pub fn has_newly_dropped_branch(&self) -> &[bool; BranchType::COUNT] {
        self.selection.has_newly_dropped_branch()
    }

    pub fn selection(&self) -> &ProductSelection {
        &self.selection
    }

    /// Available once `end_job` has run
    pub fn branch_children(&self) -> Option<&BranchChildren> {
        self.branch_children.as_ref()
    }

    pub fn provenance(&self) -> &ProvenanceTracker {
        &self.provenance
    }

    pub fn want_all_events(&self) -> bool {
        self.event_selector.want_all_events()
    }

    pub fn selector_config(&self) -> &SelectorConfigId {
        self.event_selector.selector_config()
    }

    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    pub fn module_label(&self) -> &str {
        &self.module_label
    }

    pub fn file_state(&self) -> FileState {
        self.file_state
    }

    pub fn is_file_open(&self) -> bool {
        self.file_state == FileState::Open
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }
}
