//! TMC2 (V-PCC reference encoder) process driver
//!
//! Builds `PccAppEncoder` command lines from job parameters and runs the
//! process under a cancellation watch. The frame numbering pattern is
//! inferred from the `.ply` files present in the tile directory.

use crate::jobs::EncodeJob;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::EncoderInvoker;
use v3ctk_config::Tmc2Config;

/// Fixed encoder parameters that never vary per job.
/// Metrics and checksums are disabled: the pipeline only consumes the
/// compressed stream, and intermediate files would leak into the tile dirs.
const FIXED_PARAMS: &[(&str, &str)] = &[
    ("computeMetrics", "0"),
    ("computeChecksum", "0"),
    ("keepIntermediateFiles", "0"),
];

/// Error type for encoding operations
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Encoder process exited with non-zero status
    #[error("encoder failed with exit code: {0}")]
    EncoderFailed(i32),

    /// Encoder process was terminated by signal
    #[error("encoder process was terminated by signal")]
    EncoderTerminated,

    /// Encode was cancelled before or during the run
    #[error("encode cancelled")]
    Cancelled,

    /// Tile directory holds no .ply frames
    #[error("no .ply frames found in {0}")]
    NoFrames(PathBuf),

    /// Frame file names carry no trailing frame number
    #[error("unable to infer frame numbering in {0}")]
    UnnumberedFrames(PathBuf),

    /// IO error during encoding
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Frame sequence inferred from the files in a tile directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSequence {
    /// printf-style file name pattern, e.g. `frame_%04d.ply`
    pub pattern: String,
    /// Lowest frame number present
    pub start_frame: u32,
    /// Number of numbered frames found
    pub frame_count: u32,
}

/// Split a file stem into a prefix and its trailing decimal digits.
fn split_trailing_digits(stem: &str) -> Option<(&str, &str)> {
    let digits_start = stem
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)?;
    Some((&stem[..digits_start], &stem[digits_start..]))
}

/// Infer the frame pattern, start frame, and frame count from the `.ply`
/// files in `tile_dir`.
///
/// The prefix is taken from the first file in sorted order; the digit width
/// is the widest trailing number seen across all frames. Files without a
/// trailing number are ignored unless no file has one.
pub fn derive_frame_sequence(tile_dir: &Path) -> Result<FrameSequence, EncodeError> {
    let mut stems: Vec<String> = std::fs::read_dir(tile_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "ply"))
        .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .collect();
    stems.sort();

    if stems.is_empty() {
        return Err(EncodeError::NoFrames(tile_dir.to_path_buf()));
    }

    let mut prefix: Option<String> = None;
    let mut width = 0usize;
    let mut frame_numbers: Vec<u32> = Vec::new();
    for stem in &stems {
        let Some((head, digits)) = split_trailing_digits(stem) else {
            continue;
        };
        if prefix.is_none() {
            prefix = Some(head.to_string());
        }
        width = width.max(digits.len());
        if let Ok(n) = digits.parse::<u32>() {
            frame_numbers.push(n);
        }
    }

    let Some(prefix) = prefix else {
        return Err(EncodeError::UnnumberedFrames(tile_dir.to_path_buf()));
    };
    let start_frame = frame_numbers
        .iter()
        .copied()
        .min()
        .ok_or_else(|| EncodeError::UnnumberedFrames(tile_dir.to_path_buf()))?;

    Ok(FrameSequence {
        pattern: format!("{prefix}%0{width}d.ply"),
        start_frame,
        frame_count: frame_numbers.len() as u32,
    })
}

/// Build a `PccAppEncoder` command for one job
///
/// TMC2 takes `--key=value` arguments. The command covers:
/// - input folder and frame pattern, start frame, and frame count
/// - the three per-component QPs from the job's quality triplet
/// - group-of-frames size and thread count
/// - compressed stream output path
/// - optional configuration folder and source voxel bit depth
pub fn build_tmc2_command(
    settings: &Tmc2Config,
    job: &EncodeJob,
    frame_pattern: &str,
    gof_size: u32,
    threads: u32,
) -> Command {
    let mut cmd = Command::new(&settings.binary);

    if let Some(config_dir) = &settings.config_dir {
        cmd.arg(format!("--configurationFolder={}", config_dir.display()));
    }

    cmd.arg(format!(
        "--uncompressedDataFolder={}/",
        job.input_dir.display()
    ));
    cmd.arg(format!("--uncompressedDataPath={frame_pattern}"));
    cmd.arg(format!("--startFrameNumber={}", job.start_frame));
    cmd.arg(format!("--frameCount={}", job.frame_count));
    cmd.arg(format!(
        "--compressedStreamPath={}",
        job.output_path.display()
    ));

    cmd.arg(format!("--groupOfFramesSize={gof_size}"));
    cmd.arg(format!("--nbThread={threads}"));

    cmd.arg(format!("--occupancyMapQP={}", job.id.triplet.occ));
    cmd.arg(format!("--geometryQP={}", job.id.triplet.geo));
    cmd.arg(format!("--attributeQP={}", job.id.triplet.attr));

    if let Some(vox) = settings.vox {
        cmd.arg(format!("--geometry3dCoordinatesBitdepth={vox}"));
    }

    for (key, value) in FIXED_PARAMS {
        cmd.arg(format!("--{key}={value}"));
    }

    cmd
}

/// Run an encoder process under a cancellation watch
///
/// Waits for the process to exit. If the stop signal is raised first, the
/// child is killed and the run resolves with [`EncodeError::Cancelled`].
pub async fn run_encoder_process(
    cmd: Command,
    mut stop: watch::Receiver<bool>,
) -> Result<(), EncodeError> {
    if *stop.borrow() {
        return Err(EncodeError::Cancelled);
    }

    let mut cmd = tokio::process::Command::from(cmd);
    cmd.kill_on_drop(true);
    let mut child = cmd.spawn()?;

    loop {
        tokio::select! {
            status = child.wait() => {
                let status = status?;
                return if status.success() {
                    Ok(())
                } else {
                    match status.code() {
                        Some(code) => Err(EncodeError::EncoderFailed(code)),
                        None => Err(EncodeError::EncoderTerminated),
                    }
                };
            }
            changed = stop.changed() => {
                // A closed stop channel counts as a stop request.
                if changed.is_err() || *stop.borrow() {
                    warn!("stop requested; killing encoder process");
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                    return Err(EncodeError::Cancelled);
                }
            }
        }
    }
}

/// TMC2-backed encoder invoker
///
/// Holds the per-run settings that do not vary across jobs.
#[derive(Debug, Clone)]
pub struct Tmc2Encoder {
    settings: Tmc2Config,
    gof_size: u32,
    threads: u32,
}

impl Tmc2Encoder {
    pub fn new(settings: Tmc2Config, gof_size: u32, threads: u32) -> Self {
        Self {
            settings,
            gof_size,
            threads,
        }
    }
}

impl EncoderInvoker for Tmc2Encoder {
    fn encode(
        &self,
        job: &EncodeJob,
        stop: watch::Receiver<bool>,
    ) -> impl std::future::Future<Output = Result<(), EncodeError>> + Send {
        async move {
            let sequence = derive_frame_sequence(&job.input_dir)?;
            let cmd = build_tmc2_command(
                &self.settings,
                job,
                &sequence.pattern,
                self.gof_size,
                self.threads,
            );
            debug!(
                job = %job.id.stem(),
                pattern = %sequence.pattern,
                frames = job.frame_count,
                "launching TMC2 encoder"
            );
            run_encoder_process(cmd, stop).await
        }
    }
}
