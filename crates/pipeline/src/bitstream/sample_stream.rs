//! V3C sample-stream codec
//!
//! Wire layout: the first byte's top three bits encode the unit-size
//! precision (`(header >> 5) + 1` bytes). Each unit is a big-endian size of
//! that precision followed by the unit payload; the payload's first byte
//! carries the unit type in its top five bits. TMC2 emits one parameter set
//! (VPS) at the start of every group of frames, so VPS units double as GoF
//! boundaries.
//!
//! Writing always regenerates framing fresh: the header byte and size
//! prefixes are recomputed from the units being written, never copied from
//! the source container.

use thiserror::Error;

/// Error type for sample-stream parsing
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// Input held no bytes at all
    #[error("Sample stream is empty")]
    Empty,

    /// A unit's declared size ran past the end of the input
    #[error("Truncated unit at offset {offset}")]
    TruncatedUnit { offset: usize },

    /// A unit declared a zero-byte payload
    #[error("Zero-length unit at offset {offset}")]
    EmptyUnit { offset: usize },

    /// The unit type code is not a V3C unit this core understands
    #[error("Unrecognized unit type {0}")]
    UnknownUnitType(u8),

    /// The stream does not begin with a parameter set
    #[error("Sample stream does not begin with a parameter set")]
    MissingParameterSet,
}

/// V3C unit type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitKind {
    /// V3C parameter set; opens each group of frames
    Vps,
    /// Atlas data
    Ad,
    /// Occupancy video data
    Ovd,
    /// Geometry video data
    Gvd,
    /// Attribute video data
    Avd,
}

impl UnitKind {
    /// Wire type code (top five bits of the payload's first byte)
    pub fn code(self) -> u8 {
        match self {
            UnitKind::Vps => 0,
            UnitKind::Ad => 1,
            UnitKind::Ovd => 2,
            UnitKind::Gvd => 3,
            UnitKind::Avd => 4,
        }
    }

    /// Decode a wire type code
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(UnitKind::Vps),
            1 => Some(UnitKind::Ad),
            2 => Some(UnitKind::Ovd),
            3 => Some(UnitKind::Gvd),
            4 => Some(UnitKind::Avd),
            _ => None,
        }
    }

    /// Whether this unit is a header/parameter-set unit
    pub fn is_parameter_set(self) -> bool {
        matches!(self, UnitKind::Vps)
    }
}

/// One encoded unit with its component kind and GoF attribution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    /// Unit type decoded from the payload
    pub kind: UnitKind,
    /// Zero-based group-of-frames index this unit belongs to
    pub gof: u32,
    /// Raw unit payload, first byte included
    pub payload: Vec<u8>,
}

impl Unit {
    /// Build a unit from a body, prefixing the type byte
    ///
    /// The body is the payload after the type byte; useful for constructing
    /// streams in tests and tools.
    pub fn from_body(kind: UnitKind, gof: u32, body: &[u8]) -> Self {
        let mut payload = Vec::with_capacity(body.len() + 1);
        payload.push(kind.code() << 3);
        payload.extend_from_slice(body);
        Self { kind, gof, payload }
    }
}

/// A parsed sample stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleStream {
    /// Unit-size precision in bytes (1..=8) declared by the header
    pub size_precision: u8,
    /// Units in wire order, each tagged with its GoF index
    pub units: Vec<Unit>,
}

impl SampleStream {
    /// Number of groups of frames in the stream
    pub fn gof_count(&self) -> u32 {
        self.units.last().map(|u| u.gof + 1).unwrap_or(0)
    }
}

/// Parse a V3C sample stream, attributing each unit to its GoF
///
/// The stream must begin with a VPS; every subsequent VPS starts the next
/// GoF. The input is read-only and never mutated.
pub fn parse_sample_stream(data: &[u8]) -> Result<SampleStream, ParseError> {
    scan_units(data, true)
}

/// Parse a single-track segment file
///
/// Same framing as a full container, but a leading VPS is not required:
/// non-atlas tracks open with their own component's units. GoF attribution
/// still advances on each VPS seen.
pub fn parse_segment_units(data: &[u8]) -> Result<SampleStream, ParseError> {
    scan_units(data, false)
}

fn scan_units(data: &[u8], require_leading_vps: bool) -> Result<SampleStream, ParseError> {
    if data.is_empty() {
        return Err(ParseError::Empty);
    }

    let size_precision = (data[0] >> 5) + 1;
    let size_len = size_precision as usize;
    let mut offset = 1;
    let mut units = Vec::new();
    let mut gof: u32 = 0;

    while offset + size_len <= data.len() {
        let mut size: usize = 0;
        for &b in &data[offset..offset + size_len] {
            size = (size << 8) | b as usize;
        }
        let payload_start = offset + size_len;
        let payload_end = payload_start
            .checked_add(size)
            .ok_or(ParseError::TruncatedUnit { offset })?;
        if payload_end > data.len() {
            return Err(ParseError::TruncatedUnit { offset });
        }
        if size == 0 {
            return Err(ParseError::EmptyUnit { offset });
        }

        let payload = data[payload_start..payload_end].to_vec();
        let code = (payload[0] >> 3) & 0x1f;
        let kind = UnitKind::from_code(code).ok_or(ParseError::UnknownUnitType(code))?;

        if kind.is_parameter_set() {
            if !units.is_empty() {
                gof += 1;
            }
        } else if units.is_empty() && require_leading_vps {
            return Err(ParseError::MissingParameterSet);
        }

        units.push(Unit { kind, gof, payload });
        offset = payload_end;
    }

    if units.is_empty() {
        return Err(ParseError::MissingParameterSet);
    }

    Ok(SampleStream {
        size_precision,
        units,
    })
}

/// Smallest size precision able to frame every unit in the slice
fn required_precision(units: &[&Unit]) -> u8 {
    let max_len = units.iter().map(|u| u.payload.len()).max().unwrap_or(0);
    let mut precision = 1u8;
    while precision < 8 && max_len >= 1usize << (8 * precision) {
        precision += 1;
    }
    precision
}

/// Serialize units as a sample stream with freshly generated framing
pub fn encode_units(units: &[&Unit]) -> Vec<u8> {
    let precision = required_precision(units);
    let size_len = precision as usize;

    let body_len: usize = units.iter().map(|u| size_len + u.payload.len()).sum();
    let mut out = Vec::with_capacity(1 + body_len);
    out.push((precision - 1) << 5);

    for unit in units {
        let size = unit.payload.len() as u64;
        for i in (0..size_len).rev() {
            out.push((size >> (8 * i)) as u8);
        }
        out.extend_from_slice(&unit.payload);
    }
    out
}
