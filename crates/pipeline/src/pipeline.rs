//! Run orchestration: plan, encode, segment, optionally mux, summarize
//!
//! The pipeline validates the plan before anything is scheduled (a bad plan
//! is fatal), drives every encode job through the scheduler, segments each
//! succeeded container concurrently, and finishes with a [`RunSummary`]
//! naming every identity that fell out of the run and at which stage. A
//! succeeded identity is complete and correct regardless of sibling
//! failures.

use crate::encode::{EncoderInvoker, Tmc2Encoder};
use crate::jobs::{build_jobs, parse_triplet_list, EncodeJob, JobStatus, TripletParseError};
use crate::muxer::mux_identity;
use crate::plan::{GofPlan, PlanError, ThreadBudget};
use crate::scheduler::{Scheduler, StopHandle};
use crate::segmenter::Segmenter;
use crate::tiles::{load_tile_manifest, TileError, TILE_MANIFEST_FILE};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use v3ctk_config::Config;

/// Run summary file name, written under the V3C output root
pub const RUN_SUMMARY_FILE: &str = "run_summary.json";

/// Error type for pipeline setup and orchestration
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Plan validation failed; nothing was scheduled
    #[error("plan error: {0}")]
    Plan(#[from] PlanError),

    /// Configured quality triplets did not parse
    #[error("quality triplet error: {0}")]
    Triplets(#[from] TripletParseError),

    /// Tile manifest missing or malformed
    #[error("tile manifest error: {0}")]
    Tiles(#[from] TileError),

    /// IO error preparing output roots or persisting the summary
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Pipeline stage an identity failed at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Encode,
    Segment,
    Mux,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Encode => write!(f, "encode"),
            Stage::Segment => write!(f, "segment"),
            Stage::Mux => write!(f, "mux"),
        }
    }
}

/// One identity that fell out of the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Bitstream identity, e.g. `tile_2_occ24_geo32_attr43`
    pub id: String,
    /// Stage the identity failed at
    pub stage: Stage,
    /// Failure reason as reported by the stage
    pub reason: String,
}

/// Outcome of one pipeline run
///
/// Downstream manifest generation reads this to omit failed identities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Project the run belonged to
    pub project: String,
    /// Jobs planned for the run
    pub total_jobs: usize,
    /// Identities that made it through every requested stage
    pub succeeded: usize,
    /// True when any identity failed at any stage
    pub degraded: bool,
    /// Every failed identity with its stage and reason
    pub failures: Vec<FailureRecord>,
}

/// Per-run stage toggles
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Skip encoding; containers under the encoded root are reused
    pub skip_encode: bool,
    /// Skip segmentation; encoded containers are validated only
    pub skip_segment: bool,
    /// Multiplex each segmented identity back into a combined track
    pub mux: bool,
}

/// The encode-segment-mux pipeline for one project
#[derive(Debug)]
pub struct Pipeline {
    config: Config,
    budget: ThreadBudget,
    plan: GofPlan,
    scheduler: Scheduler,
}

impl Pipeline {
    /// Validate the plan and build a pipeline
    ///
    /// `parallelism = 0` auto-detects the logical core count. Plan errors
    /// are fatal here so no job is ever scheduled under a bad plan.
    pub fn new(config: Config) -> Result<Self, PipelineError> {
        let parallelism = if config.encode.parallelism == 0 {
            num_cpus::get() as u32
        } else {
            config.encode.parallelism
        };
        let budget = ThreadBudget::new(parallelism, config.encode.threads_per_instance)?;
        let plan = GofPlan::new(
            config.segmentation.segment_size,
            config.segmentation.encoder_gof,
        )?;

        info!(
            project = %config.project.name,
            segment_size = plan.segment_size,
            encoder_gof = plan.encoder_gof,
            split_components = config.segmentation.split_components,
            "segmentation plan"
        );
        info!(
            thread_cap = budget.parallelism,
            threads_per_instance = budget.threads_per_instance,
            max_concurrent_encodes = budget.max_concurrent_encodes(),
            "thread budget"
        );

        let scheduler = Scheduler::new(budget.max_concurrent_encodes() as usize);
        Ok(Self {
            config,
            budget,
            plan,
            scheduler,
        })
    }

    /// Handle for stopping a running batch, e.g. from a signal handler
    pub fn stop_handle(&self) -> StopHandle {
        self.scheduler.stop_handle()
    }

    /// Run the pipeline with the configured TMC2 encoder
    pub async fn run(&self, options: RunOptions) -> Result<RunSummary, PipelineError> {
        let invoker = Arc::new(Tmc2Encoder::new(
            self.config.tmc2.clone(),
            self.plan.encoder_gof,
            self.budget.threads_per_instance,
        ));
        self.run_with_invoker(invoker, options).await
    }

    /// Run the pipeline with an arbitrary encoder invoker
    pub async fn run_with_invoker<I: EncoderInvoker>(
        &self,
        invoker: Arc<I>,
        options: RunOptions,
    ) -> Result<RunSummary, PipelineError> {
        let cfg = &self.config;
        let triplets = parse_triplet_list(&cfg.encode.qp_triplets)?;
        let manifest = load_tile_manifest(&cfg.project.tiles_root.join(TILE_MANIFEST_FILE))?;
        let jobs = build_jobs(
            &manifest.tiles,
            &triplets,
            &cfg.project.tiles_root,
            &cfg.project.encoded_root,
        );
        info!(
            tiles = manifest.tiles.len(),
            qp_sets = triplets.len(),
            jobs = jobs.len(),
            "run planned"
        );

        let jobs = self.encode_stage(jobs, invoker, &options).await?;
        let mut failures: Vec<FailureRecord> = jobs
            .iter()
            .filter(|job| job.status != JobStatus::Succeeded)
            .map(|job| FailureRecord {
                id: job.id.stem(),
                stage: Stage::Encode,
                reason: job
                    .error_reason
                    .clone()
                    .unwrap_or_else(|| "never started".to_string()),
            })
            .collect();

        let succeeded: Vec<&EncodeJob> = jobs
            .iter()
            .filter(|job| job.status == JobStatus::Succeeded)
            .collect();

        // A stop ends the run after encoding: succeeded containers are
        // retained for a later `--skip-encoding` pass, nothing is segmented.
        let stopped = self.scheduler.is_stopped();
        let segmented = if stopped {
            warn!(
                retained = succeeded.len(),
                "stop requested; leaving encoded containers unsegmented"
            );
            Vec::new()
        } else {
            self.segment_stage(&succeeded, &options, &mut failures)
                .await?
        };

        if options.mux && !stopped {
            self.mux_stage(&segmented, &mut failures).await?;
        }

        let summary = RunSummary {
            project: cfg.project.name.clone(),
            total_jobs: jobs.len(),
            succeeded: jobs.len() - failures.len(),
            degraded: !failures.is_empty(),
            failures,
        };
        std::fs::create_dir_all(&cfg.project.v3c_root)?;
        let json = serde_json::to_vec_pretty(&summary).map_err(std::io::Error::other)?;
        std::fs::write(cfg.project.v3c_root.join(RUN_SUMMARY_FILE), json)?;

        if summary.degraded {
            warn!(
                succeeded = summary.succeeded,
                failed = summary.failures.len(),
                "run completed degraded"
            );
        } else {
            info!(succeeded = summary.succeeded, "run completed");
        }
        Ok(summary)
    }

    async fn encode_stage<I: EncoderInvoker>(
        &self,
        jobs: Vec<EncodeJob>,
        invoker: Arc<I>,
        options: &RunOptions,
    ) -> Result<Vec<EncodeJob>, PipelineError> {
        if options.skip_encode {
            info!("encode stage skipped; validating existing containers");
            return Ok(jobs
                .into_iter()
                .map(|mut job| {
                    match std::fs::metadata(&job.output_path) {
                        Ok(meta) if meta.len() > 0 => job.succeed(),
                        _ => job.fail("container missing with encoding skipped"),
                    }
                    job
                })
                .collect());
        }
        std::fs::create_dir_all(&self.config.project.encoded_root)?;
        Ok(self.scheduler.run_all(jobs, invoker).await)
    }

    async fn segment_stage(
        &self,
        succeeded: &[&EncodeJob],
        options: &RunOptions,
        failures: &mut Vec<FailureRecord>,
    ) -> Result<Vec<(String, PathBuf)>, PipelineError> {
        let project_root = self.config.project.v3c_root.join(&self.config.project.name);
        if options.skip_segment {
            info!("segmentation stage skipped");
            return Ok(succeeded
                .iter()
                .map(|job| (job.id.stem(), project_root.join(job.id.stem())))
                .collect());
        }

        std::fs::create_dir_all(&project_root)?;
        let segmenter = Segmenter::new(self.plan, self.config.segmentation.split_components);

        // Identities never share an output directory, so segmentation runs
        // without cross-identity locking.
        let mut handles = Vec::with_capacity(succeeded.len());
        for job in succeeded {
            let segmenter = segmenter.clone();
            let container = job.output_path.clone();
            let out_dir = project_root.join(job.id.stem());
            let frames = u64::from(job.frame_count);
            let id = job.id.stem();
            handles.push(tokio::task::spawn_blocking(move || {
                let result = segmenter.segment_container(&container, &out_dir, frames);
                (id, out_dir, result)
            }));
        }

        let mut segmented = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok((id, out_dir, Ok(_))) => segmented.push((id, out_dir)),
                Ok((id, _, Err(e))) => {
                    warn!(id = %id, "segmentation failed: {e}");
                    failures.push(FailureRecord {
                        id,
                        stage: Stage::Segment,
                        reason: e.to_string(),
                    });
                }
                Err(e) => error!("segmentation task panicked: {e}"),
            }
        }
        Ok(segmented)
    }

    async fn mux_stage(
        &self,
        segmented: &[(String, PathBuf)],
        failures: &mut Vec<FailureRecord>,
    ) -> Result<(), PipelineError> {
        if !self.config.segmentation.split_components {
            warn!("mux requested but components were not split; skipping");
            return Ok(());
        }

        let mux_root = self
            .config
            .project
            .v3c_root
            .join(format!("{}_muxed", self.config.project.name));
        std::fs::create_dir_all(&mux_root)?;

        let mut handles = Vec::with_capacity(segmented.len());
        for (id, input_dir) in segmented {
            let id = id.clone();
            let input_dir = input_dir.clone();
            let output_dir = mux_root.join(&id);
            handles.push(tokio::task::spawn_blocking(move || {
                let result = mux_identity(&input_dir, &output_dir);
                (id, result)
            }));
        }

        for handle in handles {
            match handle.await {
                Ok((_, Ok(_))) => {}
                Ok((id, Err(e))) => {
                    warn!(id = %id, "mux failed: {e}");
                    failures.push(FailureRecord {
                        id,
                        stage: Stage::Mux,
                        reason: e.to_string(),
                    });
                }
                Err(e) => error!("mux task panicked: {e}"),
            }
        }
        Ok(())
    }
}
