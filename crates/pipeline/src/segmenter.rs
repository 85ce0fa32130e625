//! Container segmentation into DASH-style init and media segments
//!
//! Splits one encoded V3C container into per-component tracks (atlas,
//! occupancy, geometry, attribute) or a single combined track, cutting media
//! segments on group-of-frames boundaries per the [`GofPlan`]. Emits an
//! `init.bin` per track plus numbered media segments, and a `segments.json`
//! index describing everything written.
//!
//! Re-running over an existing output directory replaces it wholesale, so a
//! re-segmentation never leaves stale files behind. A failed run removes the
//! partially written directory.

use crate::bitstream::{encode_units, parse_sample_stream, Component, ParseError, Unit, UnitKind};
use crate::layout::{segment_file_name, COMBINED_DIR, INIT_FILE, SEGMENT_INDEX_FILE};
use crate::plan::GofPlan;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Error type for segmentation operations
#[derive(Debug, Error)]
pub enum SegmentError {
    /// Container's GoF count disagrees with the plan for its frame count
    #[error("container holds {actual} GoFs, expected {expected} for the declared frame count")]
    GofCountMismatch { expected: u64, actual: u64 },

    /// Container failed to parse as a V3C sample stream
    #[error("container parse error: {0}")]
    Parse(#[from] ParseError),

    /// IO error while reading the container or writing segments
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One media segment as written to disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRecord {
    /// 1-based segment index
    pub index: u32,
    /// File name within the track directory
    pub file: String,
    /// Size on disk in bytes
    pub bytes: u64,
    /// Frames covered by this segment
    pub frames: u32,
    /// GoFs covered by this segment
    pub gofs: u32,
}

/// One track (component or combined) of a segmented bitstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackIndex {
    /// Track directory name: `atlas`, `occp`, `geom`, `attr`, or `combined`
    pub track: String,
    /// Init artifact file name within the track directory
    pub init_file: String,
    /// Init artifact size in bytes
    pub init_bytes: u64,
    /// Media segments in index order
    pub segments: Vec<SegmentRecord>,
}

/// Index of everything written for one bitstream identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentIndex {
    /// Bitstream identity, e.g. `tile_2_occ24_geo32_attr43`
    pub id: String,
    /// Frames per media segment
    pub segment_size: u32,
    /// Frames per encoder GoF
    pub encoder_gof: u32,
    /// Total frames in the source container
    pub total_frames: u64,
    /// Tracks written, in fixed component order
    pub tracks: Vec<TrackIndex>,
}

/// Segmenter configured with a validated GoF plan
#[derive(Debug, Clone)]
pub struct Segmenter {
    plan: GofPlan,
    split_components: bool,
}

impl Segmenter {
    pub fn new(plan: GofPlan, split_components: bool) -> Self {
        Self {
            plan,
            split_components,
        }
    }

    /// Segment one container into `output_dir`
    ///
    /// `total_frames` is the frame count the container was encoded from; the
    /// container's GoF count must match the plan's expectation for it. The
    /// output directory is replaced wholesale; on failure it is removed.
    pub fn segment_container(
        &self,
        container_path: &Path,
        output_dir: &Path,
        total_frames: u64,
    ) -> Result<SegmentIndex, SegmentError> {
        let data = std::fs::read(container_path)?;
        let stream = parse_sample_stream(&data)?;

        let expected = self.plan.expected_gof_count(total_frames);
        let actual = u64::from(stream.gof_count());
        if actual != expected {
            return Err(SegmentError::GofCountMismatch { expected, actual });
        }

        if output_dir.exists() {
            std::fs::remove_dir_all(output_dir)?;
        }
        std::fs::create_dir_all(output_dir)?;

        let id = container_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "container".to_string());

        let result = self.write_tracks(&stream.units, output_dir, &id, total_frames);
        match result {
            Ok(index) => {
                let json = serde_json::to_vec_pretty(&index).map_err(std::io::Error::other);
                let written =
                    json.and_then(|json| std::fs::write(output_dir.join(SEGMENT_INDEX_FILE), json));
                if let Err(e) = written {
                    let _ = std::fs::remove_dir_all(output_dir);
                    return Err(e.into());
                }
                info!(
                    id = %index.id,
                    tracks = index.tracks.len(),
                    segments = index.tracks.first().map(|t| t.segments.len()).unwrap_or(0),
                    "container segmented"
                );
                Ok(index)
            }
            Err(e) => {
                let _ = std::fs::remove_dir_all(output_dir);
                Err(e)
            }
        }
    }

    fn write_tracks(
        &self,
        units: &[Unit],
        output_dir: &Path,
        id: &str,
        total_frames: u64,
    ) -> Result<SegmentIndex, SegmentError> {
        let gof_frames = self.plan.gof_frame_counts(total_frames);
        let gofs_per_segment = self.plan.gofs_per_segment();
        let segment_count = self.plan.segment_count(gof_frames.len() as u64) as u32;

        // Every track's init is the container-level parameter set; all tracks
        // share the same header.
        let first_vps = units
            .iter()
            .find(|u| u.kind == UnitKind::Vps)
            .ok_or(ParseError::MissingParameterSet)?;

        let selections: Vec<Option<Component>> = if self.split_components {
            Component::ALL.iter().copied().map(Some).collect()
        } else {
            vec![None]
        };

        let mut tracks = Vec::with_capacity(selections.len());
        for selection in selections {
            let dir_name = selection.map(Component::dir_name).unwrap_or(COMBINED_DIR);
            let track_dir = output_dir.join(dir_name);
            std::fs::create_dir_all(&track_dir)?;

            let init = encode_units(&[first_vps]);
            let init_bytes = init.len() as u64;
            std::fs::write(track_dir.join(INIT_FILE), init)?;

            let mut segments = Vec::with_capacity(segment_count as usize);
            for seg in 1..=segment_count {
                let gof_lo = (seg - 1) * gofs_per_segment;
                let gof_hi = (seg * gofs_per_segment).min(gof_frames.len() as u32);

                let selected: Vec<&Unit> = units
                    .iter()
                    .filter(|u| u.gof >= gof_lo && u.gof < gof_hi)
                    .filter(|u| match selection {
                        Some(component) => Component::of_unit(u.kind) == component,
                        None => true,
                    })
                    .collect();

                let encoded = encode_units(&selected);
                let file = segment_file_name(seg);
                std::fs::write(track_dir.join(&file), &encoded)?;

                let frames: u32 = gof_frames[gof_lo as usize..gof_hi as usize].iter().sum();
                debug!(id, track = dir_name, segment = seg, frames, "segment written");
                segments.push(SegmentRecord {
                    index: seg,
                    file,
                    bytes: encoded.len() as u64,
                    frames,
                    gofs: gof_hi - gof_lo,
                });
            }

            tracks.push(TrackIndex {
                track: dir_name.to_string(),
                init_file: INIT_FILE.to_string(),
                init_bytes,
                segments,
            });
        }

        Ok(SegmentIndex {
            id: id.to_string(),
            segment_size: self.plan.segment_size,
            encoder_gof: self.plan.encoder_gof,
            total_frames,
            tracks,
        })
    }
}
