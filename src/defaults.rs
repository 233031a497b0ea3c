/// Compiled-in beacon layout catalog.
///
/// Layout strings for the publicly documented beacon formats, and the
/// manufacturer IDs used to build hardware scan filters for them. Matcher
/// values are disjoint, so at most one layout claims any advertisement.
///
/// Sources: AltBeacon, Apple iBeacon, Google Eddystone (UID frame) and Ruuvi
/// (data format 5) protocol documents.
use crate::catalog::BeaconKind;

/// AltBeacon: `beac` type code after the company ID, one reserved data byte.
pub const ALTBEACON_LAYOUT: &str = "m:2-3=beac,i:4-19,i:20-21,i:22-23,p:24-24,d:25-25";

/// Apple iBeacon: `0215` type code, proximity UUID, major, minor.
pub const IBEACON_LAYOUT: &str = "m:2-3=0215,i:4-19,i:20-21,i:22-23,p:24-24";

/// Eddystone-UID: service data `0xFEAA`, frame type `0x00`, namespace + instance.
/// Power is pinned to the -41 dBm calibration constant.
pub const EDDYSTONE_UID_LAYOUT: &str = "s:0-1=feaa,m:2-2=00,p:3-3:-41,i:4-13,i:14-19";

/// RuuviTag data format 5: Ruuvi company ID + format byte, MAC as identifier.
pub const RUUVITAG_LAYOUT: &str = "m:0-2=990405,i:20-25";

/// Radius Networks (AltBeacon reference manufacturer)
pub const MANUFACTURER_RADIUS: u16 = 0x0118;
/// Apple, Inc.
pub const MANUFACTURER_APPLE: u16 = 0x004C;
/// Ruuvi Innovations Ltd.
pub const MANUFACTURER_RUUVI: u16 = 0x0499;

/// One catalog entry.
#[derive(Debug, Clone, Copy)]
pub struct LayoutDef {
    pub kind: BeaconKind,
    pub layout: &'static str,
    /// Candidate manufacturer IDs for hardware filters. Empty for service
    /// data layouts.
    pub manufacturer_ids: &'static [u16],
}

/// All layouts compiled at startup, in the order decoders are tried.
pub static BEACON_LAYOUTS: &[LayoutDef] = &[
    LayoutDef {
        kind: BeaconKind::AltBeacon,
        layout: ALTBEACON_LAYOUT,
        manufacturer_ids: &[MANUFACTURER_RADIUS],
    },
    LayoutDef {
        kind: BeaconKind::IBeacon,
        layout: IBEACON_LAYOUT,
        manufacturer_ids: &[MANUFACTURER_APPLE],
    },
    LayoutDef {
        kind: BeaconKind::EddystoneUid,
        layout: EDDYSTONE_UID_LAYOUT,
        manufacturer_ids: &[],
    },
    LayoutDef {
        kind: BeaconKind::RuuviTag,
        layout: RUUVITAG_LAYOUT,
        manufacturer_ids: &[MANUFACTURER_RUUVI],
    },
];
