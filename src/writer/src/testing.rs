//! In-memory backend that records every call, for tests.

use crate::backend::{KeptPayload, OutputBackend};
use crate::error::BackendError;
use crate::metadata::{FileMetadata, OutputFileInfo};
use common::model::{BranchId, EventId, FileBlock, LuminosityBlockRecord, RunRecord};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendCall {
    BeginJob,
    EndJob,
    OpenFile(u32),
    CloseFile(u32),
    Event(EventId, Vec<BranchId>),
    Run(u32, Vec<BranchId>),
    LuminosityBlock(u32, u32, Vec<BranchId>),
    BeginRun(u32),
    EndRun(u32),
    BeginLuminosityBlock(u32, u32),
    EndLuminosityBlock(u32, u32),
    InputFileOpened(String),
    InputFileClosed(String),
    OutputFileBlock(String),
    PreFork,
    PostFork(u32, u32),
}

#[derive(Debug, Default)]
pub struct RecordingBackend {
    pub calls: Vec<BackendCall>,
    pub closed_files: Vec<FileMetadata>,
    /// Request a file close once this many events are in the current file
    pub rotate_every: Option<u64>,
    /// Fail the event write with this ordinal (0-based, counted over the job)
    pub fail_event_write: Option<u64>,
    /// Request a file close whenever an input file is closed
    pub rotate_per_input_file: bool,
    events_in_file: u64,
    events_attempted: u64,
    input_closed: bool,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rotating_every(events: u64) -> Self {
        Self {
            rotate_every: Some(events),
            ..Self::default()
        }
    }

    pub fn rotating_per_input_file() -> Self {
        Self {
            rotate_per_input_file: true,
            ..Self::default()
        }
    }

    pub fn failing_at(event: u64) -> Self {
        Self {
            fail_event_write: Some(event),
            ..Self::default()
        }
    }

    pub fn written_events(&self) -> Vec<EventId> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                BackendCall::Event(id, _) => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&BackendCall) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }
}

fn ids(products: &[KeptPayload<'_>]) -> Vec<BranchId> {
    products.iter().map(|p| p.descriptor.branch_id).collect()
}

impl OutputBackend for RecordingBackend {
    fn write_event(
        &mut self,
        id: EventId,
        products: &[KeptPayload<'_>],
    ) -> Result<(), BackendError> {
        let attempt = self.events_attempted;
        self.events_attempted += 1;
        if self.fail_event_write == Some(attempt) {
            return Err(BackendError::Io(std::io::Error::other("injected write failure")));
        }
        self.events_in_file += 1;
        self.calls.push(BackendCall::Event(id, ids(products)));
        Ok(())
    }

    fn write_run(&mut self, run: u32, products: &[KeptPayload<'_>]) -> Result<(), BackendError> {
        self.calls.push(BackendCall::Run(run, ids(products)));
        Ok(())
    }

    fn write_luminosity_block(
        &mut self,
        run: u32,
        luminosity_block: u32,
        products: &[KeptPayload<'_>],
    ) -> Result<(), BackendError> {
        self.calls
            .push(BackendCall::LuminosityBlock(run, luminosity_block, ids(products)));
        Ok(())
    }

    fn really_open_file(&mut self, info: &OutputFileInfo) -> Result<(), BackendError> {
        self.events_in_file = 0;
        self.input_closed = false;
        self.calls.push(BackendCall::OpenFile(info.sequence));
        Ok(())
    }

    fn really_close_file(&mut self, metadata: &FileMetadata) -> Result<(), BackendError> {
        self.calls.push(BackendCall::CloseFile(metadata.file.sequence));
        self.closed_files.push(metadata.clone());
        Ok(())
    }

    fn should_close_file(&self) -> bool {
        self.input_closed
            || self
                .rotate_every
                .is_some_and(|limit| self.events_in_file >= limit)
    }

    fn begin_job(&mut self) -> Result<(), BackendError> {
        self.calls.push(BackendCall::BeginJob);
        Ok(())
    }

    fn end_job(&mut self) -> Result<(), BackendError> {
        self.calls.push(BackendCall::EndJob);
        Ok(())
    }

    fn begin_run(&mut self, run: &RunRecord) -> Result<(), BackendError> {
        self.calls.push(BackendCall::BeginRun(run.run));
        Ok(())
    }

    fn end_run(&mut self, run: &RunRecord) -> Result<(), BackendError> {
        self.calls.push(BackendCall::EndRun(run.run));
        Ok(())
    }

    fn begin_luminosity_block(&mut self, block: &LuminosityBlockRecord) -> Result<(), BackendError> {
        self.calls
            .push(BackendCall::BeginLuminosityBlock(block.run, block.luminosity_block));
        Ok(())
    }

    fn end_luminosity_block(&mut self, block: &LuminosityBlockRecord) -> Result<(), BackendError> {
        self.calls
            .push(BackendCall::EndLuminosityBlock(block.run, block.luminosity_block));
        Ok(())
    }

    fn open_file(&mut self, file: &FileBlock) -> Result<(), BackendError> {
        self.calls
            .push(BackendCall::OutputFileBlock(file.file_name.clone()));
        Ok(())
    }

    fn respond_to_open_input_file(&mut self, file: &FileBlock) -> Result<(), BackendError> {
        self.calls
            .push(BackendCall::InputFileOpened(file.file_name.clone()));
        Ok(())
    }

    fn respond_to_close_input_file(&mut self, file: &FileBlock) -> Result<(), BackendError> {
        if self.rotate_per_input_file {
            self.input_closed = true;
        }
        self.calls
            .push(BackendCall::InputFileClosed(file.file_name.clone()));
        Ok(())
    }

    fn pre_fork_release_resources(&mut self) -> Result<(), BackendError> {
        self.calls.push(BackendCall::PreFork);
        Ok(())
    }

    fn post_fork_reacquire_resources(
        &mut self,
        child_index: u32,
        number_of_children: u32,
    ) -> Result<(), BackendError> {
        self.calls
            .push(BackendCall::PostFork(child_index, number_of_children));
        Ok(())
    }
}
