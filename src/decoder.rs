/// Advertisement decoder: one compiled layout applied to raw scan bytes.
///
/// Runs on the scan callback hot path. No allocation, no blocking, no I/O.
/// Anything that does not fit the layout is `None`, never an error.
use core::fmt::{self, Write};

use heapless::{String, Vec};
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::ad::{ad_structures, AdStructure, AD_TYPE_MANUFACTURER_DATA};
use crate::layout::{
    read_signed, read_unsigned, BeaconSource, FieldRange, Layout, MAX_DATA_FIELDS,
    MAX_IDENTIFIERS, MAX_IDENTIFIER_LEN,
};

/// Raw bytes of a hex identifier.
pub type IdentifierBytes = Vec<u8, MAX_IDENTIFIER_LEN>;

/// Longest identifier text: `0x` plus two digits per byte.
pub const IDENTIFIER_TEXT_LEN: usize = 2 + 2 * MAX_IDENTIFIER_LEN;

/// Textual form of an [`Identifier`].
pub type IdentifierString = String<IDENTIFIER_TEXT_LEN>;

/// One decoded beacon identifier, classified by byte width:
/// 16 bytes → UUID, up to 4 bytes → integer, anything else → hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    Uuid(Uuid),
    Int(u32),
    Hex(IdentifierBytes),
}

impl Identifier {
    /// Classify big-endian identifier bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes.len() {
            16 => {
                let raw: [u8; 16] = bytes.try_into().ok()?;
                Some(Identifier::Uuid(Uuid::from_bytes(raw)))
            }
            1..=4 => Some(Identifier::Int(read_unsigned(bytes, false) as u32)),
            _ => IdentifierBytes::from_slice(bytes).ok().map(Identifier::Hex),
        }
    }

    /// Render into a fixed-capacity string.
    pub fn to_text(&self) -> IdentifierString {
        let mut text = IdentifierString::new();
        // capacity covers the widest identifier
        let _ = write!(text, "{}", self);
        text
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Uuid(uuid) => write!(f, "{}", uuid.hyphenated()),
            Identifier::Int(value) => write!(f, "{}", value),
            Identifier::Hex(bytes) => {
                f.write_str("0x")?;
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

impl Serialize for Identifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_text())
    }
}

/// Typed fields of one advertisement that matched a layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BeaconData {
    /// Matcher value, or 0 for layouts without a matcher.
    pub beacon_type: u64,
    pub identifiers: Vec<Identifier, MAX_IDENTIFIERS>,
    pub data_fields: Vec<u64, MAX_DATA_FIELDS>,
    /// Calibrated transmit power (dBm)
    pub power: Option<i32>,
}

/// Decoder bound to one compiled layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisementDecoder {
    layout: Layout,
}

impl AdvertisementDecoder {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Decode raw advertisement bytes (concatenated AD structures).
    ///
    /// Every AD structure the layout can apply to is tried in order; the
    /// first one that decodes wins.
    pub fn parse_scan_data(&self, raw: &[u8]) -> Option<BeaconData> {
        ad_structures(raw)
            .filter(|s| self.is_candidate(s))
            .find_map(|s| self.decode_payload(s.data))
    }

    fn is_candidate(&self, structure: &AdStructure) -> bool {
        match self.layout.source() {
            BeaconSource::ManufacturerData => structure.ad_type == AD_TYPE_MANUFACTURER_DATA,
            BeaconSource::ServiceData { uuid, range } => {
                uuid.carried_by(structure.ad_type)
                    && range.slice(structure.data).is_some_and(|b| uuid.matches(b))
            }
        }
    }

    /// Apply the layout to one AD payload (offset 0 = first byte after type).
    fn decode_payload(&self, payload: &[u8]) -> Option<BeaconData> {
        let layout = &self.layout;

        let beacon_type = match layout.matcher() {
            Some(matcher) if matcher.matches(payload) => matcher.expected,
            Some(_) => return None,
            None => 0,
        };

        let mut identifiers = Vec::new();
        for range in layout.identifiers() {
            let id = read_identifier(range, payload)?;
            identifiers.push(id).ok()?;
        }

        let mut data_fields = Vec::new();
        for range in layout.data_fields() {
            let bytes = range.slice(payload)?;
            data_fields
                .push(read_unsigned(bytes, range.little_endian))
                .ok()?;
        }

        let power = match layout.power() {
            Some(p) => match p.fixed {
                Some(fixed) => Some(fixed),
                None => Some(read_signed(p.range.slice(payload)?)),
            },
            None => None,
        };

        Some(BeaconData {
            beacon_type,
            identifiers,
            data_fields,
            power,
        })
    }
}

fn read_identifier(range: &FieldRange, payload: &[u8]) -> Option<Identifier> {
    let bytes = range.slice(payload)?;
    if range.little_endian {
        let mut swapped = IdentifierBytes::from_slice(bytes).ok()?;
        swapped.reverse();
        Identifier::from_bytes(&swapped)
    } else {
        Identifier::from_bytes(bytes)
    }
}
