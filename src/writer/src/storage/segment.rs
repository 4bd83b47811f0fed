//! Segment files: one file per output file, a plain sequence of frames.
//!
//! Each frame is an 8-byte little-endian length followed by a `bincode`
//! encoded [`StoredRecord`]. The last frame of a cleanly closed file is
//! [`StoredRecord::Metadata`].

use crate::backend::{KeptPayload, OutputBackend};
use crate::error::BackendError;
use crate::metadata::{FileMetadata, OutputFileInfo};
use common::config::StorageConfig;
use common::model::{BranchId, EventId};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

pub const SEGMENT_EXTENSION: &str = "evo";

const FRAME_HEADER_LEN: u64 = 8;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredProduct {
    pub branch_id: BranchId,
    pub branch_name: String,
    pub payload: Vec<u8>,
    pub parents: Vec<BranchId>,
}

impl From<&KeptPayload<'_>> for StoredProduct {
    fn from(kept: &KeptPayload<'_>) -> Self {
        Self {
            branch_id: kept.descriptor.branch_id,
            branch_name: kept.descriptor.branch_name(),
            payload: kept.product.payload.clone(),
            parents: kept.product.provenance.parents.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: EventId,
    pub products: Vec<StoredProduct>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRun {
    pub run: u32,
    pub products: Vec<StoredProduct>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredLuminosityBlock {
    pub run: u32,
    pub luminosity_block: u32,
    pub products: Vec<StoredProduct>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoredRecord {
    Event(StoredEvent),
    Run(StoredRun),
    LuminosityBlock(StoredLuminosityBlock),
    Metadata(Box<FileMetadata>),
}

fn stored(products: &[KeptPayload<'_>]) -> Vec<StoredProduct> {
    products.iter().map(StoredProduct::from).collect()
}

#[derive(Debug)]
struct OpenSegment {
    path: PathBuf,
    writer: BufWriter<File>,
    size: u64,
    events: u64,
}

impl OpenSegment {
    fn append(&mut self, record: &StoredRecord) -> Result<(), BackendError> {
        let frame = bincode::serialize(record)?;
        let frame_len = frame.len() as u64;
        self.writer.write_all(&frame_len.to_le_bytes())?;
        self.writer.write_all(&frame)?;
        self.size += FRAME_HEADER_LEN + frame_len;
        Ok(())
    }
}

/// Writes output files as segment files under a directory
#[derive(Debug)]
pub struct SegmentFileBackend {
    dir: PathBuf,
    file_prefix: String,
    max_events_per_file: Option<u64>,
    max_file_size: Option<u64>,
    current: Option<OpenSegment>,
    written_files: Vec<PathBuf>,
}

impl SegmentFileBackend {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            dir: PathBuf::from(&config.dir),
            file_prefix: config.file_prefix.clone(),
            max_events_per_file: config.max_events_per_file,
            max_file_size: config.max_file_size,
            current: None,
            written_files: Vec::new(),
        }
    }

    pub fn segment_path(&self, sequence: u32) -> PathBuf {
        self.dir.join(format!(
            "{}-{:06}.{SEGMENT_EXTENSION}",
            self.file_prefix, sequence
        ))
    }

    /// Files closed so far, in the order they were written
    pub fn written_files(&self) -> &[PathBuf] {
        &self.written_files
    }

    fn current(&mut self) -> Result<&mut OpenSegment, BackendError> {
        self.current.as_mut().ok_or_else(|| {
            BackendError::Io(std::io::Error::other("no output segment is open"))
        })
    }
}

impl OutputBackend for SegmentFileBackend {
    fn write_event(
        &mut self,
        id: EventId,
        products: &[KeptPayload<'_>],
    ) -> Result<(), BackendError> {
        let segment = self.current()?;
        segment.append(&StoredRecord::Event(StoredEvent {
            id,
            products: stored(products),
        }))?;
        segment.events += 1;
        Ok(())
    }

    fn write_run(&mut self, run: u32, products: &[KeptPayload<'_>]) -> Result<(), BackendError> {
        self.current()?.append(&StoredRecord::Run(StoredRun {
            run,
            products: stored(products),
        }))
    }

    fn write_luminosity_block(
        &mut self,
        run: u32,
        luminosity_block: u32,
        products: &[KeptPayload<'_>],
    ) -> Result<(), BackendError> {
        self.current()?
            .append(&StoredRecord::LuminosityBlock(StoredLuminosityBlock {
                run,
                luminosity_block,
                products: stored(products),
            }))
    }

    fn really_open_file(&mut self, info: &OutputFileInfo) -> Result<(), BackendError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.segment_path(info.sequence);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        log::debug!("Opened segment {}", path.display());
        self.current = Some(OpenSegment {
            path,
            writer: BufWriter::new(file),
            size: 0,
            events: 0,
        });
        Ok(())
    }

    fn really_close_file(&mut self, metadata: &FileMetadata) -> Result<(), BackendError> {
        let Some(mut segment) = self.current.take() else {
            return Err(BackendError::Io(std::io::Error::other(
                "no output segment is open",
            )));
        };

        segment.append(&StoredRecord::Metadata(Box::new(metadata.clone())))?;
        segment.writer.flush()?;
        segment.writer.get_ref().sync_all()?;

        log::debug!(
            "Closed segment {} ({} bytes, {} events)",
            segment.path.display(),
            segment.size,
            segment.events
        );
        self.written_files.push(segment.path);
        Ok(())
    }

    fn should_close_file(&self) -> bool {
        let Some(segment) = &self.current else {
            return false;
        };
        self.max_events_per_file
            .is_some_and(|max| segment.events >= max)
            || self.max_file_size.is_some_and(|max| segment.size >= max)
    }

    fn pre_fork_release_resources(&mut self) -> Result<(), BackendError> {
        if let Some(segment) = self.current.as_mut() {
            segment.writer.flush()?;
        }
        Ok(())
    }
}

/// Decode every frame of a segment file
pub fn read_segment(path: &Path) -> Result<Vec<StoredRecord>, BackendError> {
    let mut buffer = Vec::new();
    File::open(path)?.read_to_end(&mut buffer)?;

    let corrupt = |reason: String| BackendError::Corrupt {
        path: path.display().to_string(),
        reason,
    };

    let mut records = Vec::new();
    let mut offset = 0usize;
    while offset < buffer.len() {
        let header_end = offset + FRAME_HEADER_LEN as usize;
        let Some(header) = buffer.get(offset..header_end) else {
            return Err(corrupt(format!("truncated frame header at offset {offset}")));
        };
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(header);
        let frame_len = u64::from_le_bytes(len_bytes) as usize;

        let Some(frame) = header_end
            .checked_add(frame_len)
            .and_then(|end| buffer.get(header_end..end))
        else {
            return Err(corrupt(format!(
                "frame at offset {offset} claims {frame_len} bytes, file ends first"
            )));
        };
        records.push(bincode::deserialize(frame)?);
        offset = header_end + frame_len;
    }

    Ok(records)
}
