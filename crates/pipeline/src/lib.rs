//! V3C Toolkit pipeline
//!
//! Core of the point-cloud-video packaging pipeline: encode-job planning and
//! scheduling over an external V-PCC encoder, V3C sample-stream segmentation
//! into DASH-style tracks, and the identity-preserving multiplexer.

pub mod bitstream;
pub mod encode;
pub mod jobs;
pub mod layout;
pub mod muxer;
pub mod pipeline;
pub mod plan;
pub mod scheduler;
pub mod segmenter;
pub mod tiles;

pub use bitstream::{parse_sample_stream, Component, ParseError, SampleStream, Unit, UnitKind};
pub use encode::{
    build_tmc2_command, derive_frame_sequence, EncodeError, EncoderInvoker, Tmc2Encoder,
};
pub use jobs::{
    build_jobs, parse_triplet_list, BitstreamId, EncodeJob, JobStatus, QualityTriplet,
    TripletParseError,
};
pub use muxer::{mux_identity, MuxError};
pub use pipeline::{
    FailureRecord, Pipeline, PipelineError, RunOptions, RunSummary, Stage, RUN_SUMMARY_FILE,
};
pub use plan::{GofPlan, PlanError, ThreadBudget};
pub use scheduler::{Scheduler, StopHandle};
pub use segmenter::{SegmentError, SegmentIndex, SegmentRecord, Segmenter, TrackIndex};
pub use tiles::{load_tile_manifest, Tile, TileError, TileManifest, TILE_MANIFEST_FILE};

pub use v3ctk_config as config;
pub use v3ctk_config::Config;
