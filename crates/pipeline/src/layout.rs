//! Persisted segment-tree layout
//!
//! The directory contract other stages and the manifest feed read:
//!
//! ```text
//! <root>/<bitstream-identity>/
//!   atlas/ occp/ geom/ attr/        (or combined/)
//!     init.bin
//!     segment_0001.bin
//!     segment_0002.bin
//!     ...
//! ```
//!
//! Stable across re-runs of the same identity; a re-run overwrites the
//! identity directory wholesale.

/// Subdirectory name used when components are not split
pub const COMBINED_DIR: &str = "combined";

/// Init artifact file name (segment index 0)
pub const INIT_FILE: &str = "init.bin";

/// Per-identity segment index consumed by the manifest stage
pub const SEGMENT_INDEX_FILE: &str = "segments.json";

/// File name of the media segment with the given 1-based index
pub fn segment_file_name(index: u32) -> String {
    format!("segment_{:04}.bin", index)
}

/// Parse a media segment's 1-based index from its file name
pub fn parse_segment_index(name: &str) -> Option<u32> {
    let digits = name.strip_prefix("segment_")?.strip_suffix(".bin")?;
    // Width is at least 4 but grows past segment 9999.
    if digits.len() < 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let index: u32 = digits.parse().ok()?;
    if index == 0 {
        return None;
    }
    Some(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_file_name() {
        assert_eq!(segment_file_name(1), "segment_0001.bin");
        assert_eq!(segment_file_name(42), "segment_0042.bin");
        assert_eq!(segment_file_name(1234), "segment_1234.bin");
    }

    #[test]
    fn test_parse_segment_index_round_trip() {
        for index in [1u32, 7, 99, 1000, 10000] {
            assert_eq!(parse_segment_index(&segment_file_name(index)), Some(index));
        }
    }

    #[test]
    fn test_parse_segment_index_rejects_foreign_names() {
        assert_eq!(parse_segment_index("init.bin"), None);
        assert_eq!(parse_segment_index("segment_0000.bin"), None);
        assert_eq!(parse_segment_index("segment_12.bin"), None);
        assert_eq!(parse_segment_index("segment_abcd.bin"), None);
        assert_eq!(parse_segment_index("segment_0001.tmp"), None);
    }
}
