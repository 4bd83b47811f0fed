//! Drives an [`OutputModule`] through a recorded job in scheduler order.

use crate::backend::OutputBackend;
use crate::error::Result;
use crate::output::OutputModule;
use common::model::{EventRecord, FileBlock, LuminosityBlockRecord, ProductCatalog, RunRecord};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Clone, Debug)]
pub struct LuminosityBlockPlan {
    pub block: LuminosityBlockRecord,
    pub events: Vec<EventRecord>,
}

#[derive(Clone, Debug)]
pub struct RunPlan {
    pub run: RunRecord,
    pub luminosity_blocks: Vec<LuminosityBlockPlan>,
}

#[derive(Clone, Debug)]
pub struct InputFilePlan {
    pub file: FileBlock,
    pub runs: Vec<RunPlan>,
}

/// Input files in the order the scheduler presents them
#[derive(Clone, Debug, Default)]
pub struct JobPlan {
    pub input_files: Vec<InputFilePlan>,
}

impl JobPlan {
    pub fn event_count(&self) -> usize {
        self.input_files
            .iter()
            .flat_map(|f| &f.runs)
            .flat_map(|r| &r.luminosity_blocks)
            .map(|l| l.events.len())
            .sum()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub events_seen: u64,
    pub events_written: u64,
    pub events_rejected: u64,
    /// Output files closed because the backend asked for a new one
    pub rotations: u64,
    pub cancelled: bool,
}

/// Run a whole job: `begin_job`, every input file, then `end_job`.
///
/// `end_job` runs even when the job fails or `cancel` is raised; the original
/// error is returned and a failing cleanup is only logged in that case.
pub fn replay<B: OutputBackend>(
    module: &mut OutputModule<B>,
    catalog: &ProductCatalog,
    plan: &JobPlan,
    cancel: &AtomicBool,
) -> Result<ReplaySummary> {
    module.begin_job(catalog)?;

    let mut summary = ReplaySummary::default();
    let outcome = drive(module, plan, cancel, &mut summary);
    let cleanup = module.end_job();

    match (outcome, cleanup) {
        (Ok(()), Ok(())) => {
            log::info!(
                "{}: replayed {} events, wrote {}, rejected {}{}",
                module.module_label(),
                summary.events_seen,
                summary.events_written,
                summary.events_rejected,
                if summary.cancelled { " (cancelled)" } else { "" }
            );
            Ok(summary)
        }
        (Ok(()), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(cleanup)) => {
            log::warn!(
                "{}: end of job after failure also failed: {cleanup}",
                module.module_label()
            );
            Err(e)
        }
    }
}

fn drive<B: OutputBackend>(
    module: &mut OutputModule<B>,
    plan: &JobPlan,
    cancel: &AtomicBool,
    summary: &mut ReplaySummary,
) -> Result<()> {
    for input in &plan.input_files {
        module.respond_to_open_input_file(&input.file)?;
        module.open_file(&input.file)?;

        for run_plan in &input.runs {
            module.begin_run(&run_plan.run)?;

            for lumi_plan in &run_plan.luminosity_blocks {
                module.begin_luminosity_block(&lumi_plan.block)?;

                for event in &lumi_plan.events {
                    if cancel.load(Ordering::Relaxed) {
                        log::warn!(
                            "{}: cancelled before event {}",
                            module.module_label(),
                            event.id
                        );
                        summary.cancelled = true;
                        return Ok(());
                    }

                    summary.events_seen += 1;
                    if module.write_event(event)? {
                        summary.events_written += 1;
                    } else {
                        summary.events_rejected += 1;
                    }
                }

                module.end_luminosity_block(&lumi_plan.block)?;
                module.write_luminosity_block(&lumi_plan.block)?;
                // files are switched between luminosity blocks and input files
                if module.rotate_if_requested()? {
                    summary.rotations += 1;
                }
            }

            module.end_run(&run_plan.run)?;
            module.write_run(&run_plan.run)?;
        }

        module.respond_to_close_input_file(&input.file)?;
        // the next input file reopens lazily through `open_file`
        if module.close_file_if_requested()? {
            summary.rotations += 1;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OutputError;
    use crate::output::FileState;
    use crate::testing::{BackendCall, RecordingBackend};
    use common::config::OutputModuleConfig;
    use common::model::{BranchId, BranchType, EventId, Product, ProductDescriptor};

    fn catalog() -> (ProductCatalog, BranchId) {
        let tracks = ProductDescriptor::new(BranchType::Event, "recoTracks", "tracks", "", "RECO");
        let id = tracks.branch_id;
        (ProductCatalog::try_from(vec![tracks]).unwrap(), id)
    }

    fn plan(tracks: BranchId, lumis: u32, events_per_lumi: u64) -> JobPlan {
        let luminosity_blocks = (1..=lumis)
            .map(|lumi| LuminosityBlockPlan {
                block: LuminosityBlockRecord::new(1, lumi),
                events: (0..events_per_lumi)
                    .map(|n| {
                        EventRecord::new(EventId::new(1, lumi, u64::from(lumi) * 100 + n))
                            .with_product(tracks, Product::new(vec![1u8]))
                    })
                    .collect(),
            })
            .collect();
        JobPlan {
            input_files: vec![InputFilePlan {
                file: FileBlock::new("input.root"),
                runs: vec![RunPlan {
                    run: RunRecord::new(1),
                    luminosity_blocks,
                }],
            }],
        }
    }

    fn module(backend: RecordingBackend, max_events: Option<u64>) -> OutputModule<RecordingBackend> {
        let config = OutputModuleConfig {
            max_events,
            ..OutputModuleConfig::default()
        };
        OutputModule::new("RECO", &config, backend).unwrap()
    }

    #[test]
    fn test_replay_calls_in_scheduler_order() {
        let (catalog, tracks) = catalog();
        let plan = plan(tracks, 1, 1);
        assert_eq!(plan.event_count(), 1);

        let mut module = module(RecordingBackend::new(), None);
        let summary = replay(&mut module, &catalog, &plan, &AtomicBool::new(false)).unwrap();
        assert_eq!(summary.events_written, 1);
        assert!(!summary.cancelled);

        assert_eq!(
            module.backend().calls,
            vec![
                BackendCall::BeginJob,
                BackendCall::InputFileOpened("input.root".to_string()),
                BackendCall::OpenFile(0),
                BackendCall::OutputFileBlock("input.root".to_string()),
                BackendCall::BeginRun(1),
                BackendCall::BeginLuminosityBlock(1, 1),
                BackendCall::Event(EventId::new(1, 1, 100), vec![tracks]),
                BackendCall::EndLuminosityBlock(1, 1),
                BackendCall::LuminosityBlock(1, 1, vec![]),
                BackendCall::EndRun(1),
                BackendCall::Run(1, vec![]),
                BackendCall::InputFileClosed("input.root".to_string()),
                BackendCall::CloseFile(0),
                BackendCall::EndJob,
            ]
        );
    }

    #[test]
    fn test_replay_rotates_between_luminosity_blocks() {
        let (catalog, tracks) = catalog();
        let mut module = module(RecordingBackend::rotating_every(2), None);
        let summary =
            replay(&mut module, &catalog, &plan(tracks, 3, 2), &AtomicBool::new(false)).unwrap();

        assert_eq!(summary.rotations, 3);
        // the last rotation opens a file that only receives the run record
        let closed = &module.backend().closed_files;
        assert_eq!(closed.len(), 4);
        assert_eq!(closed[3].events_written, 0);
        assert_eq!(module.file_state(), FileState::Closed);
    }

    #[test]
    fn test_replay_rotates_at_input_file_boundary() {
        let (catalog, tracks) = catalog();
        let input = |name: &str, run: u32| InputFilePlan {
            file: FileBlock::new(name),
            runs: vec![RunPlan {
                run: RunRecord::new(run),
                luminosity_blocks: vec![LuminosityBlockPlan {
                    block: LuminosityBlockRecord::new(run, 1),
                    events: (1..=3)
                        .map(|n| {
                            EventRecord::new(EventId::new(run, 1, n))
                                .with_product(tracks, Product::new(vec![1u8]))
                        })
                        .collect(),
                }],
            }],
        };
        let plan = JobPlan {
            input_files: vec![input("first.root", 1), input("second.root", 2)],
        };

        let mut module = module(RecordingBackend::rotating_per_input_file(), None);
        let summary = replay(&mut module, &catalog, &plan, &AtomicBool::new(false)).unwrap();

        assert_eq!(summary.rotations, 2);
        let per_file: Vec<u64> = module
            .backend()
            .closed_files
            .iter()
            .map(|meta| meta.events_written)
            .collect();
        assert_eq!(per_file, vec![3, 3]);
        assert_eq!(module.file_state(), FileState::Closed);

        let calls = &module.backend().calls;
        let closed_first = calls
            .iter()
            .position(|c| *c == BackendCall::InputFileClosed("first.root".to_string()))
            .unwrap();
        assert_eq!(
            calls[closed_first + 1..closed_first + 4],
            [
                BackendCall::CloseFile(0),
                BackendCall::InputFileOpened("second.root".to_string()),
                BackendCall::OpenFile(1),
            ]
        );
        assert_eq!(calls.last(), Some(&BackendCall::EndJob));
    }

    #[test]
    fn test_replay_honours_event_limit() {
        let (catalog, tracks) = catalog();
        let mut module = module(RecordingBackend::new(), Some(3));
        let summary =
            replay(&mut module, &catalog, &plan(tracks, 2, 4), &AtomicBool::new(false)).unwrap();

        assert_eq!(summary.events_seen, 8);
        assert_eq!(summary.events_written, 3);
        assert_eq!(summary.events_rejected, 5);
        assert_eq!(module.remaining_events(), Some(0));
    }

    #[test]
    fn test_cancelled_replay_still_ends_job() {
        let (catalog, tracks) = catalog();
        let mut module = module(RecordingBackend::new(), None);
        let summary =
            replay(&mut module, &catalog, &plan(tracks, 2, 2), &AtomicBool::new(true)).unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.events_seen, 0);
        assert!(module.branch_children().is_some());
        assert_eq!(module.backend().calls.last(), Some(&BackendCall::EndJob));
    }

    #[test]
    fn test_failed_replay_returns_original_error_after_cleanup() {
        let (catalog, tracks) = catalog();
        let mut module = module(RecordingBackend::failing_at(2), None);
        let err = replay(&mut module, &catalog, &plan(tracks, 2, 2), &AtomicBool::new(false))
            .unwrap_err();

        assert!(matches!(err, OutputError::Backend(_)));
        assert_eq!(module.backend().closed_files.len(), 1);
        assert_eq!(module.backend().closed_files[0].events_written, 2);
        assert!(module.branch_children().is_some());
    }
}
