/// JSON output for decoded beacon sightings.
///
/// One newline-delimited JSON (NDJSON) object per sighting, consumed by the
/// mapping layer that pairs beacons with position fixes. The radio supplies
/// MAC, RSSI and timestamp; the catalog supplies the decoded fields.
/// Uses `heapless` types for no_std/no-alloc operation.
use heapless::{String, Vec};
use serde::Serialize;

use crate::catalog::{BeaconKind, CatalogMatch};
use crate::decoder::Identifier;

/// Maximum length for MAC address strings ("AA:BB:CC:DD:EE:FF")
pub type MacString = String<18>;

/// Maximum size of a serialized JSON message
pub const MAX_MSG_LEN: usize = 512;

/// Buffer type for serialized JSON messages
pub type MsgBuffer = Vec<u8, MAX_MSG_LEN>;

/// One decoded beacon sighting.
#[derive(Debug, Serialize)]
pub struct BeaconMessage<'a> {
    /// Beacon format: "altbeacon", "ibeacon", "eddystone_uid", "ruuvitag"
    #[serde(rename = "type")]
    pub kind: BeaconKind,
    pub mac: &'a MacString,
    pub rssi: i8,
    /// Matcher value of the layout
    pub beacon_type: u64,
    /// Identifiers in layout order, as text
    pub ids: &'a [Identifier],
    pub data: &'a [u64],
    /// Calibrated transmit power, if the layout has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx: Option<i32>,
    /// Uptime in milliseconds when captured
    pub ts: u32,
}

impl<'a> BeaconMessage<'a> {
    pub fn new(found: &'a CatalogMatch, mac: &'a MacString, rssi: i8, ts: u32) -> Self {
        Self {
            kind: found.kind,
            mac,
            rssi,
            beacon_type: found.data.beacon_type,
            ids: &found.data.identifiers,
            data: &found.data.data_fields,
            tx: found.data.power,
            ts,
        }
    }
}

/// Serialize a message to JSON bytes followed by a newline.
/// Returns the number of bytes written, or None if it does not fit.
pub fn serialize_message(msg: &BeaconMessage, buf: &mut [u8]) -> Option<usize> {
    let len = serde_json_core::to_slice(msg, buf).ok()?;
    // newline delimiter must fit too
    let newline = buf.get_mut(len)?;
    *newline = b'\n';
    Some(len + 1)
}

/// Serialize into an owned fixed-capacity buffer.
pub fn to_msg_buffer(msg: &BeaconMessage) -> Option<MsgBuffer> {
    let mut buf = [0u8; MAX_MSG_LEN];
    let len = serialize_message(msg, &mut buf)?;
    MsgBuffer::from_slice(&buf[..len]).ok()
}

/// Format a 6-byte MAC address into "AA:BB:CC:DD:EE:FF" string
pub fn format_mac(mac: &[u8; 6]) -> MacString {
    use core::fmt::Write;
    let mut buf = MacString::new();
    let _ = write!(
        buf,
        "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    );
    buf
}
