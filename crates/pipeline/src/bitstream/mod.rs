//! V3C bitstream handling
//!
//! A TMC2 output container is a V3C sample stream: a one-byte header giving
//! the unit-size precision, followed by size-prefixed units. Each unit belongs
//! to one component of the volumetric bitstream; this module defines the
//! component taxonomy and the sample-stream codec.

pub mod sample_stream;

pub use sample_stream::{
    encode_units, parse_sample_stream, parse_segment_units, ParseError, SampleStream, Unit,
    UnitKind,
};

/// One of the separable sub-streams of a V3C bitstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    /// Atlas metadata (parameter sets travel with it)
    Atlas,
    /// Occupancy map video
    Occupancy,
    /// Geometry video
    Geometry,
    /// Attribute/texture video
    Attribute,
}

impl Component {
    /// Fixed, deterministic component order used for interleaving
    pub const ALL: [Component; 4] = [
        Component::Atlas,
        Component::Occupancy,
        Component::Geometry,
        Component::Attribute,
    ];

    /// Subdirectory name under a bitstream identity's output directory
    pub fn dir_name(self) -> &'static str {
        match self {
            Component::Atlas => "atlas",
            Component::Occupancy => "occp",
            Component::Geometry => "geom",
            Component::Attribute => "attr",
        }
    }

    /// Component a unit kind belongs to
    ///
    /// Parameter sets are carried with the atlas track, matching the split
    /// layout where atlas segments hold `[VPS, AD]` runs.
    pub fn of_unit(kind: UnitKind) -> Component {
        match kind {
            UnitKind::Vps | UnitKind::Ad => Component::Atlas,
            UnitKind::Ovd => Component::Occupancy,
            UnitKind::Gvd => Component::Geometry,
            UnitKind::Avd => Component::Attribute,
        }
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}
