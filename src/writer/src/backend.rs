use crate::error::BackendError;
use crate::metadata::{FileMetadata, OutputFileInfo};
use common::model::{
    EventId, FileBlock, LuminosityBlockRecord, Product, ProductDescriptor, RunRecord,
};

/// A kept product of one record, handed to the backend for writing
#[derive(Clone, Copy, Debug)]
pub struct KeptPayload<'a> {
    pub descriptor: &'a ProductDescriptor,
    pub product: &'a Product,
}

/// Storage format of an output stage.
///
/// The output module decides *what* is written and *when* files begin and
/// end; implementations decide how bytes land on storage. Only the write and
/// file open/close operations are required, every other hook defaults to a
/// no-op.
pub trait OutputBackend {
    fn write_event(
        &mut self,
        id: EventId,
        products: &[KeptPayload<'_>],
    ) -> Result<(), BackendError>;

    fn write_run(&mut self, run: u32, products: &[KeptPayload<'_>]) -> Result<(), BackendError>;

    fn write_luminosity_block(
        &mut self,
        run: u32,
        luminosity_block: u32,
        products: &[KeptPayload<'_>],
    ) -> Result<(), BackendError>;

    fn really_open_file(&mut self, info: &OutputFileInfo) -> Result<(), BackendError>;

    fn really_close_file(&mut self, metadata: &FileMetadata) -> Result<(), BackendError>;

    /// Asked after writes; `true` requests that the current file be closed
    fn should_close_file(&self) -> bool {
        false
    }

    fn begin_job(&mut self) -> Result<(), BackendError> {
        Ok(())
    }

    fn end_job(&mut self) -> Result<(), BackendError> {
        Ok(())
    }

    fn begin_run(&mut self, _run: &RunRecord) -> Result<(), BackendError> {
        Ok(())
    }

    fn end_run(&mut self, _run: &RunRecord) -> Result<(), BackendError> {
        Ok(())
    }

    fn begin_luminosity_block(&mut self, _block: &LuminosityBlockRecord) -> Result<(), BackendError> {
        Ok(())
    }

    fn end_luminosity_block(&mut self, _block: &LuminosityBlockRecord) -> Result<(), BackendError> {
        Ok(())
    }

    /// Called after the output file is known to be open for an input file
    fn open_file(&mut self, _file: &FileBlock) -> Result<(), BackendError> {
        Ok(())
    }

    fn respond_to_open_input_file(&mut self, _file: &FileBlock) -> Result<(), BackendError> {
        Ok(())
    }

    fn respond_to_close_input_file(&mut self, _file: &FileBlock) -> Result<(), BackendError> {
        Ok(())
    }

    fn pre_fork_release_resources(&mut self) -> Result<(), BackendError> {
        Ok(())
    }

    fn post_fork_reacquire_resources(
        &mut self,
        _child_index: u32,
        _number_of_children: u32,
    ) -> Result<(), BackendError> {
        Ok(())
    }
}
