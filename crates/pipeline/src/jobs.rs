//! Encode job model
//!
//! One job is created per (tile, quality triplet) pair; the job's bitstream
//! identity keys its output container and the derived segment tree. Jobs carry
//! their terminal state for end-of-run reporting and are never reused.

use crate::tiles::Tile;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Error parsing a quality triplet from its `occ:geo:attr` string form
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TripletParseError {
    /// Wrong number of colon-separated fields
    #[error("Invalid qp group '{0}', expected occ:geo:attr")]
    Malformed(String),

    /// A field was not a non-negative integer
    #[error("Invalid qp value '{0}', expected a non-negative integer")]
    BadValue(String),
}

/// The (occupancy, geometry, attribute) quantization parameters identifying
/// one encoded variant of a tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualityTriplet {
    pub occ: u32,
    pub geo: u32,
    pub attr: u32,
}

impl QualityTriplet {
    pub fn new(occ: u32, geo: u32, attr: u32) -> Self {
        Self { occ, geo, attr }
    }

    /// Stable label used in directory and file names
    pub fn label(&self) -> String {
        format!("occ{}_geo{}_attr{}", self.occ, self.geo, self.attr)
    }
}

impl fmt::Display for QualityTriplet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "occ{}/geo{}/attr{}", self.occ, self.geo, self.attr)
    }
}

impl FromStr for QualityTriplet {
    type Err = TripletParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 {
            return Err(TripletParseError::Malformed(s.to_string()));
        }
        let parse = |p: &str| {
            p.trim()
                .parse::<u32>()
                .map_err(|_| TripletParseError::BadValue(p.to_string()))
        };
        Ok(Self {
            occ: parse(parts[0])?,
            geo: parse(parts[1])?,
            attr: parse(parts[2])?,
        })
    }
}

/// Parse a comma-separated list of `occ:geo:attr` triplets
pub fn parse_triplet_list(values: &[String]) -> Result<Vec<QualityTriplet>, TripletParseError> {
    let mut triplets = Vec::with_capacity(values.len());
    for value in values {
        for item in value.split(',') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            triplets.push(item.parse()?);
        }
    }
    if triplets.is_empty() {
        return Err(TripletParseError::Malformed(String::new()));
    }
    Ok(triplets)
}

/// The unique key (tile, quality triplet) identifying one encode job's output
/// and its derived segment tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BitstreamId {
    pub tile_id: u32,
    pub triplet: QualityTriplet,
}

impl BitstreamId {
    pub fn new(tile_id: u32, triplet: QualityTriplet) -> Self {
        Self { tile_id, triplet }
    }

    /// File/directory stem for this identity, e.g. `tile_2_occ24_geo32_attr43`
    pub fn stem(&self) -> String {
        format!("tile_{}_{}", self.tile_id, self.triplet.label())
    }

    /// Container file name for this identity
    pub fn container_name(&self) -> String {
        format!("{}.bin", self.stem())
    }
}

impl fmt::Display for BitstreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tile={} {}", self.tile_id, self.triplet)
    }
}

/// Status of an encode job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting for a free execution slot
    #[default]
    Pending,
    /// Job's external encoder process is running
    Running,
    /// Job produced a non-empty output container
    Succeeded,
    /// Job's process failed, its container was unusable, or it was interrupted
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl JobStatus {
    /// Whether the job has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

/// One external encode of one tile at one quality triplet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeJob {
    /// Bitstream identity; unique per job
    pub id: BitstreamId,
    /// Tile input frame directory
    pub input_dir: PathBuf,
    /// First frame number of the tile's range
    pub start_frame: u32,
    /// Frames in the tile's range
    pub frame_count: u32,
    /// Output container path, exclusive to this job
    pub output_path: PathBuf,
    /// Current status; terminal state persists for reporting
    pub status: JobStatus,
    /// Failure reason when status is Failed
    pub error_reason: Option<String>,
}

impl EncodeJob {
    /// Create a pending job
    pub fn new(
        id: BitstreamId,
        input_dir: PathBuf,
        start_frame: u32,
        frame_count: u32,
        output_path: PathBuf,
    ) -> Self {
        Self {
            id,
            input_dir,
            start_frame,
            frame_count,
            output_path,
            status: JobStatus::Pending,
            error_reason: None,
        }
    }

    /// Mark the job as running
    pub fn start(&mut self) {
        self.status = JobStatus::Running;
    }

    /// Mark the job as succeeded
    pub fn succeed(&mut self) {
        self.status = JobStatus::Succeeded;
    }

    /// Mark the job as failed with a reason
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.error_reason = Some(reason.into());
    }
}

/// Build the job list: the Cartesian product of tiles and quality triplets
///
/// Order is tile-major, quality-minor; not a correctness requirement, but it
/// is stable so logs are reproducible across runs.
pub fn build_jobs(
    tiles: &[Tile],
    triplets: &[QualityTriplet],
    tiles_root: &Path,
    encoded_root: &Path,
) -> Vec<EncodeJob> {
    let mut jobs = Vec::with_capacity(tiles.len() * triplets.len());
    for tile in tiles {
        for triplet in triplets {
            let id = BitstreamId::new(tile.id, *triplet);
            jobs.push(EncodeJob {
                id,
                input_dir: tile.input_dir(tiles_root),
                start_frame: tile.start_frame,
                frame_count: tile.frame_count,
                output_path: encoded_root.join(id.container_name()),
                status: JobStatus::Pending,
                error_reason: None,
            });
        }
    }
    jobs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiles::SpatialBounds;
    use proptest::prelude::*;

    fn make_tile(id: u32, frame_count: u32) -> Tile {
        Tile {
            id,
            start_frame: 0,
            frame_count,
            bounds: SpatialBounds {
                x_min: 0.0,
                x_max: 1.0,
                y_min: 0.0,
                y_max: 1.0,
                z_min: 0.0,
                z_max: 1.0,
            },
        }
    }

    #[test]
    fn test_triplet_from_str() {
        let t: QualityTriplet = "24:32:43".parse().unwrap();
        assert_eq!(t, QualityTriplet::new(24, 32, 43));
        assert_eq!(t.label(), "occ24_geo32_attr43");
    }

    #[test]
    fn test_triplet_from_str_rejects_malformed() {
        assert!(matches!(
            "24:32".parse::<QualityTriplet>(),
            Err(TripletParseError::Malformed(_))
        ));
        assert!(matches!(
            "24:32:43:1".parse::<QualityTriplet>(),
            Err(TripletParseError::Malformed(_))
        ));
        assert!(matches!(
            "24:-3:43".parse::<QualityTriplet>(),
            Err(TripletParseError::BadValue(_))
        ));
        assert!(matches!(
            "a:b:c".parse::<QualityTriplet>(),
            Err(TripletParseError::BadValue(_))
        ));
    }

    #[test]
    fn test_parse_triplet_list_accepts_comma_lists() {
        let triplets =
            parse_triplet_list(&["24:32:43,28:36:45".to_string(), "32:40:49".to_string()])
                .unwrap();
        assert_eq!(
            triplets,
            vec![
                QualityTriplet::new(24, 32, 43),
                QualityTriplet::new(28, 36, 45),
                QualityTriplet::new(32, 40, 49),
            ]
        );
    }

    #[test]
    fn test_parse_triplet_list_rejects_empty() {
        assert!(parse_triplet_list(&[]).is_err());
        assert!(parse_triplet_list(&["".to_string()]).is_err());
    }

    #[test]
    fn test_bitstream_id_stem() {
        let id = BitstreamId::new(2, QualityTriplet::new(24, 32, 43));
        assert_eq!(id.stem(), "tile_2_occ24_geo32_attr43");
        assert_eq!(id.container_name(), "tile_2_occ24_geo32_attr43.bin");
    }

    #[test]
    fn test_job_status_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_job_transitions() {
        let tiles = [make_tile(0, 40)];
        let triplets = [QualityTriplet::new(24, 32, 43)];
        let mut jobs = build_jobs(&tiles, &triplets, Path::new("tiles"), Path::new("enc"));
        let job = &mut jobs[0];

        assert_eq!(job.status, JobStatus::Pending);
        job.start();
        assert_eq!(job.status, JobStatus::Running);
        job.fail("encoder exited with code 1");
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(
            job.error_reason.as_deref(),
            Some("encoder exited with code 1")
        );
    }

    #[test]
    fn test_build_jobs_order_is_tile_major() {
        let tiles = [make_tile(0, 40), make_tile(1, 40)];
        let triplets = [
            QualityTriplet::new(24, 32, 43),
            QualityTriplet::new(28, 36, 45),
        ];
        let jobs = build_jobs(&tiles, &triplets, Path::new("tiles"), Path::new("enc"));

        assert_eq!(jobs.len(), 4);
        let stems: Vec<String> = jobs.iter().map(|j| j.id.stem()).collect();
        assert_eq!(
            stems,
            vec![
                "tile_0_occ24_geo32_attr43",
                "tile_0_occ28_geo36_attr45",
                "tile_1_occ24_geo32_attr43",
                "tile_1_occ28_geo36_attr45",
            ]
        );
        assert_eq!(
            jobs[0].output_path,
            PathBuf::from("enc/tile_0_occ24_geo32_attr43.bin")
        );
        assert_eq!(jobs[0].input_dir, PathBuf::from("tiles/tile_0"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        // Any valid triplet survives a format/parse round trip.
        #[test]
        fn prop_triplet_round_trip(occ in 0u32..64, geo in 0u32..64, attr in 0u32..64) {
            let t = QualityTriplet::new(occ, geo, attr);
            let s = format!("{}:{}:{}", occ, geo, attr);
            prop_assert_eq!(s.parse::<QualityTriplet>().unwrap(), t);
        }

        // The job list is the full Cartesian product with unique identities.
        #[test]
        fn prop_jobs_cover_product(n_tiles in 1usize..8, n_triplets in 1usize..6) {
            let tiles: Vec<Tile> = (0..n_tiles as u32).map(|i| make_tile(i, 16)).collect();
            let triplets: Vec<QualityTriplet> = (0..n_triplets as u32)
                .map(|i| QualityTriplet::new(20 + i, 30 + i, 40 + i))
                .collect();

            let jobs = build_jobs(&tiles, &triplets, Path::new("t"), Path::new("e"));
            prop_assert_eq!(jobs.len(), n_tiles * n_triplets);

            let mut ids: Vec<BitstreamId> = jobs.iter().map(|j| j.id).collect();
            ids.sort_by_key(|id| (id.tile_id, id.triplet.occ));
            ids.dedup();
            prop_assert_eq!(ids.len(), n_tiles * n_triplets);
        }
    }
}
