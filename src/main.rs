mod script;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::cli::{utils, CommonArgs, CommonCommands};
use common::config::Configuration;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use writer::storage::{read_segment, StoredRecord};
use writer::{OutputModule, SegmentFileBackend};

#[derive(Parser, Debug)]
#[command(name = "eventout", version, about = "Output stage for event-processing jobs")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a JSON job script through the output module
    Replay {
        /// Path to the job script
        job: PathBuf,
    },
    /// Print the records and metadata of an output file
    Inspect {
        file: PathBuf,
        #[arg(long, help = "Print records as JSON")]
        json: bool,
    },
    #[command(flatten)]
    Common(CommonCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    utils::init_logging(&cli.common);

    let config = utils::load_config(cli.common.config.as_ref())?;

    match cli.command {
        Command::Common(command) => utils::handle_common_command(&command, &config),
        Command::Inspect { file, json } => inspect(&file, json),
        Command::Replay { job } => run_replay(config, job).await,
    }
}

async fn run_replay(config: Configuration, job_path: PathBuf) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    let job = script::load_job(&job_path)?;
    log::info!(
        "Loaded job {} with {} products and {} events",
        job_path.display(),
        job.catalog.len(),
        job.plan.event_count()
    );

    let cancel = Arc::new(AtomicBool::new(false));
    let worker_cancel = cancel.clone();
    let mut worker = tokio::task::spawn_blocking(move || {
        let backend = SegmentFileBackend::new(&config.storage);
        let mut module = OutputModule::from_configuration(&config, backend)?;
        let summary = writer::replay(&mut module, &job.catalog, &job.plan, &worker_cancel)?;
        Ok::<_, writer::OutputError>((summary, module.into_backend()))
    });
    let finished = tokio::select! {
        joined = &mut worker => Some(joined),
        _ = signal::ctrl_c() => None,
    };
    let joined = match finished {
        Some(joined) => joined,
        None => {
            log::info!("Interrupt received, finishing the current output file");
            cancel.store(true, Ordering::Relaxed);
            worker.await
        }
    };

    let (summary, backend) = joined
        .context("Replay task panicked")?
        .context("Replay failed")?;

    for path in backend.written_files() {
        log::info!("Wrote {}", path.display());
    }
    println!(
        "events: {} seen, {} written, {} rejected; files: {}{}",
        summary.events_seen,
        summary.events_written,
        summary.events_rejected,
        backend.written_files().len(),
        if summary.cancelled { " (cancelled)" } else { "" }
    );
    Ok(())
}

fn inspect(path: &Path, json: bool) -> Result<()> {
    let records = read_segment(path)
        .with_context(|| format!("Failed to read output file {}", path.display()))?;

    if json {
        let text = serde_json::to_string_pretty(&records)
            .context("Failed to serialize records to JSON")?;
        println!("{text}");
        return Ok(());
    }

    for record in &records {
        match record {
            StoredRecord::Event(event) => {
                println!("event {} ({} products)", event.id, event.products.len());
                for product in &event.products {
                    println!("  {} [{} bytes]", product.branch_name, product.payload.len());
                }
            }
            StoredRecord::LuminosityBlock(block) => println!(
                "luminosity block {}:{} ({} products)",
                block.run,
                block.luminosity_block,
                block.products.len()
            ),
            StoredRecord::Run(run) => {
                println!("run {} ({} products)", run.run, run.products.len())
            }
            StoredRecord::Metadata(meta) => {
                println!(
                    "file #{} {} written by {}/{}: {} events, opened {}, closed {}",
                    meta.file.sequence,
                    meta.file.file_id,
                    meta.process_name,
                    meta.module_label,
                    meta.events_written,
                    meta.file.opened_at,
                    meta.closed_at
                );
                for (branch_type, names) in &meta.kept_branches {
                    println!("  kept {branch_type}: {}", names.join(", "));
                }
                println!("  event selection: {}", meta.selector_config);
                for (dropped, kept) in &meta.dropped_to_kept {
                    println!("  alias {dropped} -> {kept}");
                }
                println!(
                    "  provenance: {} branches, {} parentages",
                    meta.provenance.branch_parents.len(),
                    meta.provenance.parentages.len()
                );
            }
        }
    }
    Ok(())
}
