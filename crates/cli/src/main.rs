//! CLI entry point for the V3C Toolkit pipeline
//!
//! `run` drives the full encode-segment pipeline from a config file;
//! `segment` and `mux` expose the bitstream stages standalone.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, warn};
use v3ctk_pipeline::{
    mux_identity, Config, GofPlan, Pipeline, RunOptions, Segmenter,
};

#[derive(Parser, Debug)]
#[command(name = "v3ctk")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full pipeline: encode every tile/quality job, then segment
    Run(RunArgs),
    /// Segment a single encoded container into DASH-style tracks
    Segment(SegmentArgs),
    /// Rebuild combined segments from a split segment tree
    Mux(MuxArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Path to the configuration file (config.toml)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Reuse containers under the encoded root instead of encoding
    #[arg(long)]
    skip_encoding: bool,

    /// Stop after encoding; leave containers unsegmented
    #[arg(long)]
    skip_segmentation: bool,

    /// Also rebuild combined segments for each segmented identity
    #[arg(long)]
    mux: bool,
}

#[derive(Parser, Debug)]
struct SegmentArgs {
    /// Encoded V3C container to segment
    container: PathBuf,

    /// Output directory for the segment tree
    #[arg(short, long)]
    output_dir: PathBuf,

    /// Frames the container was encoded from
    #[arg(long)]
    total_frames: u64,

    /// Frames per output segment
    #[arg(long, default_value_t = 16)]
    segment_size: u32,

    /// Frames per encoder group-of-frames
    #[arg(long, default_value_t = 16)]
    encoder_gof: u32,

    /// Write one combined track instead of per-component tracks
    #[arg(long)]
    combined: bool,
}

#[derive(Parser, Debug)]
struct MuxArgs {
    /// Split segment tree produced by `segment` (or a pipeline run)
    #[arg(long)]
    input_root: PathBuf,

    /// Destination for the combined segment tree
    #[arg(long)]
    output_root: PathBuf,
}

fn init_tracing() {
    let filter = std::env::var("V3CTK_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    match Args::parse().command {
        Command::Run(args) => run(args).await,
        Command::Segment(args) => segment(args),
        Command::Mux(args) => mux(args),
    }
}

async fn run(args: RunArgs) -> ExitCode {
    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load {}: {e}", args.config.display());
            return ExitCode::FAILURE;
        }
    };

    let pipeline = match Pipeline::new(config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("failed to set up pipeline: {e}");
            return ExitCode::FAILURE;
        }
    };

    let stop = pipeline.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping encodes");
            stop.stop();
        }
    });

    let options = RunOptions {
        skip_encode: args.skip_encoding,
        skip_segment: args.skip_segmentation,
        mux: args.mux,
    };
    match pipeline.run(options).await {
        Ok(summary) if summary.degraded => {
            warn!(
                failed = summary.failures.len(),
                "run finished with failed identities"
            );
            ExitCode::FAILURE
        }
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("pipeline run failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn segment(args: SegmentArgs) -> ExitCode {
    let plan = match GofPlan::new(args.segment_size, args.encoder_gof) {
        Ok(plan) => plan,
        Err(e) => {
            error!("invalid plan: {e}");
            return ExitCode::FAILURE;
        }
    };

    let segmenter = Segmenter::new(plan, !args.combined);
    match segmenter.segment_container(&args.container, &args.output_dir, args.total_frames) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("segmentation failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn mux(args: MuxArgs) -> ExitCode {
    match mux_identity(&args.input_root, &args.output_root) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("mux failed: {e}");
            ExitCode::FAILURE
        }
    }
}
