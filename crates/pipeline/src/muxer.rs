//! Identity-preserving multiplexer over a split segment tree
//!
//! Rebuilds combined media segments from the four per-component tracks,
//! interleaving unit-for-unit on GoF boundaries: each GoF contributes its
//! atlas run (parameter set first) followed by one occupancy, one geometry,
//! and one attribute unit. The atlas track defines the GoF structure; the
//! other tracks must line up with it exactly, and any disagreement is an
//! error rather than a best-effort merge.

use crate::bitstream::{encode_units, parse_segment_units, Component, ParseError, Unit, UnitKind};
use crate::layout::{parse_segment_index, segment_file_name, COMBINED_DIR, INIT_FILE, SEGMENT_INDEX_FILE};
use crate::segmenter::{SegmentIndex, SegmentRecord, TrackIndex};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Error type for multiplexing operations
#[derive(Debug, Error)]
pub enum MuxError {
    /// A component track directory is absent from the input tree
    #[error("missing track directory: {0}")]
    MissingTrack(&'static str),

    /// Segment files do not form a contiguous 1-based run
    #[error("{track}: segment files are not contiguous, expected {expected}")]
    NonContiguous { track: &'static str, expected: String },

    /// Tracks disagree on how many segments exist
    #[error("{track}: found {actual} segments, expected {expected}")]
    SegmentCountMismatch {
        track: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A non-atlas segment's unit count disagrees with the atlas GoF count
    #[error("{track} segment {index}: {actual} units for {expected} GoFs")]
    UnitCountMismatch {
        track: &'static str,
        index: u32,
        expected: usize,
        actual: usize,
    },

    /// An atlas segment opens without a parameter set
    #[error("atlas segment {index} has no parameter set")]
    AtlasWithoutParameterSet { index: u32 },

    /// A segment file failed to parse
    #[error("segment parse error: {0}")]
    Parse(#[from] ParseError),

    /// The input tree's segment index is missing or malformed
    #[error("segment index error: {0}")]
    Index(#[from] serde_json::Error),

    /// IO error while reading or writing segments
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Collect a track's media segments in index order, validating contiguity.
fn collect_segments(track_dir: &Path, track: &'static str) -> Result<Vec<PathBuf>, MuxError> {
    let mut found: Vec<(u32, PathBuf)> = WalkDir::new(track_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            parse_segment_index(&entry.file_name().to_string_lossy())
                .map(|index| (index, entry.into_path()))
        })
        .collect();
    found.sort_by_key(|(index, _)| *index);

    for (position, (index, _)) in found.iter().enumerate() {
        let expected = position as u32 + 1;
        if *index != expected {
            return Err(MuxError::NonContiguous {
                track,
                expected: segment_file_name(expected),
            });
        }
    }
    Ok(found.into_iter().map(|(_, path)| path).collect())
}

/// Split an atlas segment's units into per-GoF runs, each opened by a VPS.
fn atlas_runs(units: &[Unit], index: u32) -> Result<Vec<Vec<&Unit>>, MuxError> {
    let mut runs: Vec<Vec<&Unit>> = Vec::new();
    for unit in units {
        if unit.kind == UnitKind::Vps {
            runs.push(vec![unit]);
        } else {
            match runs.last_mut() {
                Some(run) => run.push(unit),
                None => return Err(MuxError::AtlasWithoutParameterSet { index }),
            }
        }
    }
    if runs.is_empty() {
        return Err(MuxError::AtlasWithoutParameterSet { index });
    }
    Ok(runs)
}

/// Multiplex one identity's split segment tree into a combined track
///
/// `input_root` is a segmenter output directory holding `atlas/`, `occp/`,
/// `geom/`, and `attr/`. The combined track is written under `output_root`,
/// which is replaced wholesale; a failed run removes it.
pub fn mux_identity(input_root: &Path, output_root: &Path) -> Result<SegmentIndex, MuxError> {
    // The input index is metadata only; a tree of bare component
    // directories still muxes, with frame counts left best-effort.
    let input_index: Option<SegmentIndex> =
        match std::fs::read(input_root.join(SEGMENT_INDEX_FILE)) {
            Ok(raw) => Some(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

    let mut track_segments: Vec<(Component, Vec<PathBuf>)> = Vec::new();
    for component in Component::ALL {
        let dir = input_root.join(component.dir_name());
        if !dir.is_dir() {
            return Err(MuxError::MissingTrack(component.dir_name()));
        }
        track_segments.push((component, collect_segments(&dir, component.dir_name())?));
    }

    let atlas_count = track_segments[0].1.len();
    for (component, segments) in &track_segments {
        if segments.len() != atlas_count {
            return Err(MuxError::SegmentCountMismatch {
                track: component.dir_name(),
                expected: atlas_count,
                actual: segments.len(),
            });
        }
    }

    if output_root.exists() {
        std::fs::remove_dir_all(output_root)?;
    }
    let combined_dir = output_root.join(COMBINED_DIR);
    std::fs::create_dir_all(&combined_dir)?;

    let result = write_combined(&track_segments, input_root, &combined_dir, atlas_count);
    match result {
        Ok(records) => {
            let id = input_index
                .as_ref()
                .map(|index| index.id.clone())
                .or_else(|| {
                    input_root
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                })
                .unwrap_or_else(|| "identity".to_string());
            let segments = match &input_index {
                Some(index) => merge_frame_counts(records, index),
                None => records,
            };
            let output_index = SegmentIndex {
                id,
                segment_size: input_index.as_ref().map(|i| i.segment_size).unwrap_or(0),
                encoder_gof: input_index.as_ref().map(|i| i.encoder_gof).unwrap_or(0),
                total_frames: input_index.as_ref().map(|i| i.total_frames).unwrap_or(0),
                tracks: vec![TrackIndex {
                    track: COMBINED_DIR.to_string(),
                    init_file: INIT_FILE.to_string(),
                    init_bytes: std::fs::metadata(combined_dir.join(INIT_FILE))?.len(),
                    segments,
                }],
            };
            let json = serde_json::to_vec_pretty(&output_index)?;
            std::fs::write(output_root.join(SEGMENT_INDEX_FILE), json)?;
            info!(id = %output_index.id, segments = atlas_count, "identity multiplexed");
            Ok(output_index)
        }
        Err(e) => {
            let _ = std::fs::remove_dir_all(output_root);
            Err(e)
        }
    }
}

fn write_combined(
    track_segments: &[(Component, Vec<PathBuf>)],
    input_root: &Path,
    combined_dir: &Path,
    segment_count: usize,
) -> Result<Vec<SegmentRecord>, MuxError> {
    // All tracks share one header, so the atlas init is the combined init.
    let atlas_init = input_root
        .join(Component::Atlas.dir_name())
        .join(INIT_FILE);
    std::fs::copy(&atlas_init, combined_dir.join(INIT_FILE))?;

    let mut records = Vec::with_capacity(segment_count);
    for position in 0..segment_count {
        let index = position as u32 + 1;

        let mut parsed: Vec<(Component, Vec<Unit>)> = Vec::with_capacity(track_segments.len());
        for (component, segments) in track_segments {
            let data = std::fs::read(&segments[position])?;
            parsed.push((*component, parse_segment_units(&data)?.units));
        }

        let runs = atlas_runs(&parsed[0].1, index)?;
        let gof_count = runs.len();

        for (component, units) in parsed.iter().skip(1) {
            if units.len() != gof_count {
                return Err(MuxError::UnitCountMismatch {
                    track: component.dir_name(),
                    index,
                    expected: gof_count,
                    actual: units.len(),
                });
            }
        }

        let mut interleaved: Vec<&Unit> = Vec::new();
        for gof in 0..gof_count {
            interleaved.extend(&runs[gof]);
            for (_, units) in parsed.iter().skip(1) {
                interleaved.push(&units[gof]);
            }
        }

        let encoded = encode_units(&interleaved);
        let file = segment_file_name(index);
        std::fs::write(combined_dir.join(&file), &encoded)?;
        debug!(segment = index, gofs = gof_count, "combined segment written");

        records.push(SegmentRecord {
            index,
            file,
            bytes: encoded.len() as u64,
            frames: 0,
            gofs: gof_count as u32,
        });
    }
    Ok(records)
}

/// Fill per-segment frame counts from the input index's atlas track.
fn merge_frame_counts(mut records: Vec<SegmentRecord>, input_index: &SegmentIndex) -> Vec<SegmentRecord> {
    let atlas = input_index
        .tracks
        .iter()
        .find(|t| t.track == Component::Atlas.dir_name());
    if let Some(atlas) = atlas {
        for record in records.iter_mut() {
            if let Some(source) = atlas.segments.iter().find(|s| s.index == record.index) {
                record.frames = source.frames;
            }
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::sample_stream::testutil::make_container;
    use crate::plan::GofPlan;
    use crate::segmenter::Segmenter;
    use tempfile::TempDir;

    fn segmented_tree(tmp: &TempDir, gofs: u32, segment_size: u32, encoder_gof: u32, frames: u64) -> PathBuf {
        let container = tmp.path().join("tile_1_occ24_geo32_attr43.bin");
        std::fs::write(&container, make_container(gofs, 48)).unwrap();
        let out = tmp.path().join("split");
        let plan = GofPlan::new(segment_size, encoder_gof).unwrap();
        Segmenter::new(plan, true)
            .segment_container(&container, &out, frames)
            .unwrap();
        out
    }

    #[test]
    fn mux_reproduces_the_combined_segmentation() {
        let tmp = TempDir::new().unwrap();
        let split = segmented_tree(&tmp, 3, 16, 16, 40);

        let muxed = tmp.path().join("muxed");
        let index = mux_identity(&split, &muxed).unwrap();

        // Reference: segmenting the same container without splitting.
        let container = tmp.path().join("tile_1_occ24_geo32_attr43.bin");
        let reference = tmp.path().join("reference");
        let plan = GofPlan::new(16, 16).unwrap();
        Segmenter::new(plan, false)
            .segment_container(&container, &reference, 40)
            .unwrap();

        for seg in 1..=3u32 {
            let ours = std::fs::read(muxed.join(COMBINED_DIR).join(segment_file_name(seg))).unwrap();
            let theirs =
                std::fs::read(reference.join(COMBINED_DIR).join(segment_file_name(seg))).unwrap();
            assert_eq!(ours, theirs, "segment {seg} diverged");
        }

        assert_eq!(index.tracks.len(), 1);
        let frames: Vec<u32> = index.tracks[0].segments.iter().map(|s| s.frames).collect();
        assert_eq!(frames, vec![16, 16, 8]);
    }

    #[test]
    fn bare_component_tree_muxes_without_an_index() {
        let tmp = TempDir::new().unwrap();
        let split = segmented_tree(&tmp, 3, 16, 16, 40);

        let with_index = tmp.path().join("with_index");
        mux_identity(&split, &with_index).unwrap();

        std::fs::remove_file(split.join(SEGMENT_INDEX_FILE)).unwrap();
        let bare = tmp.path().join("bare");
        let index = mux_identity(&split, &bare).unwrap();

        for seg in 1..=3u32 {
            let ours = std::fs::read(bare.join(COMBINED_DIR).join(segment_file_name(seg))).unwrap();
            let reference =
                std::fs::read(with_index.join(COMBINED_DIR).join(segment_file_name(seg))).unwrap();
            assert_eq!(ours, reference, "segment {seg} diverged");
        }

        // Identity falls back to the directory name; frame metadata is
        // best-effort without the index.
        assert_eq!(index.id, "split");
        assert_eq!(index.total_frames, 0);
        assert!(index.tracks[0].segments.iter().all(|s| s.frames == 0));
    }

    #[test]
    fn init_is_copied_from_the_atlas_track() {
        let tmp = TempDir::new().unwrap();
        let split = segmented_tree(&tmp, 2, 16, 16, 32);

        let muxed = tmp.path().join("muxed");
        mux_identity(&split, &muxed).unwrap();

        let atlas_init = std::fs::read(split.join("atlas").join(INIT_FILE)).unwrap();
        let combined_init = std::fs::read(muxed.join(COMBINED_DIR).join(INIT_FILE)).unwrap();
        assert_eq!(atlas_init, combined_init);
    }

    #[test]
    fn missing_track_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let split = segmented_tree(&tmp, 2, 16, 16, 32);
        std::fs::remove_dir_all(split.join("occp")).unwrap();

        let err = mux_identity(&split, &tmp.path().join("muxed")).unwrap_err();
        assert!(matches!(err, MuxError::MissingTrack("occp")));
    }

    #[test]
    fn gap_in_segment_numbering_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let split = segmented_tree(&tmp, 3, 16, 16, 40);
        std::fs::remove_file(split.join("geom").join(segment_file_name(2))).unwrap();

        let err = mux_identity(&split, &tmp.path().join("muxed")).unwrap_err();
        assert!(matches!(err, MuxError::NonContiguous { track: "geom", .. }));
    }

    #[test]
    fn short_track_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let split = segmented_tree(&tmp, 3, 16, 16, 40);
        std::fs::remove_file(split.join("attr").join(segment_file_name(3))).unwrap();

        let err = mux_identity(&split, &tmp.path().join("muxed")).unwrap_err();
        assert!(matches!(
            err,
            MuxError::SegmentCountMismatch {
                track: "attr",
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn unit_count_mismatch_cleans_up_output() {
        let tmp = TempDir::new().unwrap();
        // One segment holding 4 GoFs.
        let split = segmented_tree(&tmp, 4, 32, 8, 32);

        // Rewrite the occupancy segment with one unit too few.
        let occ_path = split.join("occp").join(segment_file_name(1));
        let occ_units = parse_segment_units(&std::fs::read(&occ_path).unwrap())
            .unwrap()
            .units;
        let short: Vec<&Unit> = occ_units.iter().take(3).collect();
        std::fs::write(&occ_path, encode_units(&short)).unwrap();

        let muxed = tmp.path().join("muxed");
        let err = mux_identity(&split, &muxed).unwrap_err();
        assert!(matches!(
            err,
            MuxError::UnitCountMismatch {
                track: "occp",
                index: 1,
                expected: 4,
                actual: 3
            }
        ));
        assert!(!muxed.exists());
    }
}
