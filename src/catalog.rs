/// Beacon catalog: every known layout, compiled once at startup.
///
/// Each advertisement is tried against the decoders in catalog order and the
/// first match wins. Sequential on purpose: one advertisement is a few dozen
/// bytes and a decode is microseconds.
use core::fmt;

use heapless::Vec;
use serde::Serialize;
use thiserror::Error;

use crate::decoder::{AdvertisementDecoder, BeaconData};
use crate::defaults::{LayoutDef, BEACON_LAYOUTS};
use crate::layout::{Layout, LayoutParseError};
use crate::scan_filter::{create_scan_filters, ScanFilterError, ScanFilters};

/// Maximum number of layouts in one catalog.
pub const MAX_LAYOUTS: usize = 8;

/// Known beacon formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BeaconKind {
    #[serde(rename = "altbeacon")]
    AltBeacon,
    #[serde(rename = "ibeacon")]
    IBeacon,
    #[serde(rename = "eddystone_uid")]
    EddystoneUid,
    #[serde(rename = "ruuvitag")]
    RuuviTag,
}

impl BeaconKind {
    pub const ALL: [BeaconKind; 4] = [
        BeaconKind::AltBeacon,
        BeaconKind::IBeacon,
        BeaconKind::EddystoneUid,
        BeaconKind::RuuviTag,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BeaconKind::AltBeacon => "altbeacon",
            BeaconKind::IBeacon => "ibeacon",
            BeaconKind::EddystoneUid => "eddystone_uid",
            BeaconKind::RuuviTag => "ruuvitag",
        }
    }

    const fn bit(self) -> u8 {
        1 << self as u8
    }
}

impl fmt::Display for BeaconKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime catalog configuration. Lets the host narrow decoding and
/// filtering without rebuilding the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogConfig {
    /// Minimum RSSI threshold (dBm). Sightings weaker than this are ignored.
    pub min_rssi: i8,
    /// Bit per [`BeaconKind`]
    enabled: u8,
}

impl CatalogConfig {
    pub const fn new() -> Self {
        Self {
            min_rssi: -100,
            enabled: 0xFF,
        }
    }

    pub fn set_enabled(&mut self, kind: BeaconKind, enabled: bool) {
        if enabled {
            self.enabled |= kind.bit();
        } else {
            self.enabled &= !kind.bit();
        }
    }

    pub fn is_enabled(&self, kind: BeaconKind) -> bool {
        self.enabled & kind.bit() != 0
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Catalog construction failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("{kind} layout: {source}")]
    Layout {
        kind: BeaconKind,
        source: LayoutParseError,
    },
    #[error("catalog holds at most 8 layouts")]
    TooManyLayouts,
}

/// A compiled layout with its decoder and filter inputs.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub kind: BeaconKind,
    pub decoder: AdvertisementDecoder,
    pub manufacturer_ids: &'static [u16],
}

/// One advertisement claimed by a catalog layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogMatch {
    pub kind: BeaconKind,
    pub data: BeaconData,
}

/// Identifier bytes already seen for one beacon kind, used to narrow
/// hardware filters.
#[derive(Debug, Clone, Copy)]
pub struct KnownPrefix<'a> {
    pub kind: BeaconKind,
    pub bytes: &'a [u8],
}

/// Compiled beacon catalog.
#[derive(Debug, Clone)]
pub struct BeaconCatalog {
    entries: Vec<CatalogEntry, MAX_LAYOUTS>,
}

impl BeaconCatalog {
    /// Compile the built-in layouts.
    pub fn new() -> Result<Self, CatalogError> {
        Self::from_defs(BEACON_LAYOUTS)
    }

    /// Compile a custom set of layouts.
    pub fn from_defs(defs: &[LayoutDef]) -> Result<Self, CatalogError> {
        let mut entries = Vec::new();

        for def in defs {
            let layout = Layout::parse(def.layout).map_err(|source| {
                log::warn!("Layout for {} rejected: {}", def.kind, source);
                CatalogError::Layout {
                    kind: def.kind,
                    source,
                }
            })?;
            log::debug!("Compiled {} layout: {}", def.kind, layout);

            entries
                .push(CatalogEntry {
                    kind: def.kind,
                    decoder: AdvertisementDecoder::new(layout),
                    manufacturer_ids: def.manufacturer_ids,
                })
                .map_err(|_| CatalogError::TooManyLayouts)?;
        }

        log::info!("Beacon catalog ready: {} layouts", entries.len());
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Try every layout against `raw`; first match wins.
    pub fn decode(&self, raw: &[u8]) -> Option<CatalogMatch> {
        self.first_match(raw, |_| true)
    }

    /// Like [`decode`](Self::decode), honouring the RSSI threshold and the
    /// enabled kinds in `config`.
    pub fn decode_sighting(
        &self,
        raw: &[u8],
        rssi: i8,
        config: &CatalogConfig,
    ) -> Option<CatalogMatch> {
        if rssi < config.min_rssi {
            return None;
        }
        self.first_match(raw, |kind| config.is_enabled(kind))
    }

    fn first_match(
        &self,
        raw: &[u8],
        enabled: impl Fn(BeaconKind) -> bool,
    ) -> Option<CatalogMatch> {
        let found = self
            .entries
            .iter()
            .filter(|e| enabled(e.kind))
            .find_map(|e| {
                e.decoder
                    .parse_scan_data(raw)
                    .map(|data| CatalogMatch { kind: e.kind, data })
            })?;
        log::trace!("Advertisement matched {} layout", found.kind);
        Some(found)
    }

    /// Hardware scan filters for every enabled kind, for one scan session.
    pub fn scan_filters(
        &self,
        config: &CatalogConfig,
        known_prefixes: &[KnownPrefix],
    ) -> Result<ScanFilters, ScanFilterError> {
        let mut all = ScanFilters::new();

        for entry in self.entries.iter().filter(|e| config.is_enabled(e.kind)) {
            let mut prefixes: Vec<&[u8], MAX_PREFIXES> = Vec::new();
            for prefix in known_prefixes.iter().filter(|p| p.kind == entry.kind) {
                prefixes
                    .push(prefix.bytes)
                    .map_err(|_| ScanFilterError::TooManyPrefixes)?;
            }

            let filters =
                create_scan_filters(entry.decoder.layout(), entry.manufacturer_ids, &prefixes)?;
            for filter in filters {
                all.push(filter)
                    .map_err(|_| ScanFilterError::TooManyFilters)?;
            }
        }

        log::debug!("Scan session filters: {}", all.len());
        Ok(all)
    }
}

/// Known prefixes accepted per kind.
pub const MAX_PREFIXES: usize = 8;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::Identifier;
    use crate::scan_filter::MatchTarget;
    use hex_literal::hex;

    const ALTBEACON_SAMPLE: [u8; 29] =
        hex!("1bff1801beac2f234454cf6d4a0fadf2f4911ba9ffa600010002c50000");
    const IBEACON_SAMPLE: [u8; 31] =
        hex!("0201061AFF4C000215FB0B57A2822844CD913A94A122BA120600010002D100");
    const EDDYSTONE_SAMPLE: [u8; 29] =
        hex!("0201060303aafe1516aafe001000000123456789123456789123456789");
    const RUUVI_SAMPLE: [u8; 31] =
        hex!("0201041BFF99040512FC5394C37C0004FFFC040CAC364200CDCBB8334C884F");

    fn samples() -> [(BeaconKind, &'static [u8]); 4] {
        [
            (BeaconKind::AltBeacon, &ALTBEACON_SAMPLE),
            (BeaconKind::IBeacon, &IBEACON_SAMPLE),
            (BeaconKind::EddystoneUid, &EDDYSTONE_SAMPLE),
            (BeaconKind::RuuviTag, &RUUVI_SAMPLE),
        ]
    }

    // ── Decoding ────────────────────────────────────────────────────

    #[test]
    fn default_catalog_compiles() {
        let catalog = BeaconCatalog::new().unwrap();
        assert_eq!(catalog.len(), BEACON_LAYOUTS.len());
        assert!(!catalog.is_empty());
    }

    #[test]
    fn each_sample_claimed_by_its_kind() {
        let catalog = BeaconCatalog::new().unwrap();
        for (kind, raw) in samples() {
            let found = catalog.decode(raw).unwrap();
            assert_eq!(found.kind, kind);
        }
    }

    #[test]
    fn layouts_are_mutually_exclusive_on_samples() {
        let catalog = BeaconCatalog::new().unwrap();
        for (kind, raw) in samples() {
            let claimants: std::vec::Vec<BeaconKind> = catalog
                .entries()
                .iter()
                .filter(|e| e.decoder.parse_scan_data(raw).is_some())
                .map(|e| e.kind)
                .collect();
            assert_eq!(claimants, [kind]);
        }
    }

    #[test]
    fn unknown_traffic_is_no_match() {
        let catalog = BeaconCatalog::new().unwrap();
        assert_eq!(catalog.decode(&[0u8; 11]), None);
        // Flags plus a name only
        assert_eq!(catalog.decode(&hex!("020106 05094e616d65")), None);
    }

    #[test]
    fn ruuvi_identifier_is_mac() {
        let catalog = BeaconCatalog::new().unwrap();
        let found = catalog.decode(&RUUVI_SAMPLE).unwrap();
        assert_eq!(
            found.data.identifiers[0],
            Identifier::from_bytes(&hex!("cbb8334c884f")).unwrap()
        );
    }

    // ── Configuration ───────────────────────────────────────────────

    #[test]
    fn config_defaults_enable_everything() {
        let config = CatalogConfig::default();
        for kind in BeaconKind::ALL {
            assert!(config.is_enabled(kind));
        }
        assert_eq!(config.min_rssi, -100);
    }

    #[test]
    fn weak_sightings_ignored() {
        let catalog = BeaconCatalog::new().unwrap();
        let mut config = CatalogConfig::new();
        config.min_rssi = -80;
        assert!(catalog.decode_sighting(&IBEACON_SAMPLE, -81, &config).is_none());
        assert!(catalog.decode_sighting(&IBEACON_SAMPLE, -80, &config).is_some());
    }

    #[test]
    fn disabled_kinds_ignored() {
        let catalog = BeaconCatalog::new().unwrap();
        let mut config = CatalogConfig::new();
        config.set_enabled(BeaconKind::IBeacon, false);
        assert!(!config.is_enabled(BeaconKind::IBeacon));
        assert!(catalog.decode_sighting(&IBEACON_SAMPLE, -50, &config).is_none());
        assert!(catalog.decode_sighting(&RUUVI_SAMPLE, -50, &config).is_some());
        config.set_enabled(BeaconKind::IBeacon, true);
        assert!(catalog.decode_sighting(&IBEACON_SAMPLE, -50, &config).is_some());
    }

    // ── Construction errors ─────────────────────────────────────────

    #[test]
    fn bad_layout_names_kind() {
        let defs = [LayoutDef {
            kind: BeaconKind::RuuviTag,
            layout: "m:3-2=ab",
            manufacturer_ids: &[],
        }];
        match BeaconCatalog::from_defs(&defs) {
            Err(CatalogError::Layout { kind, source }) => {
                assert_eq!(kind, BeaconKind::RuuviTag);
                assert_eq!(source.reason, crate::layout::ParseReason::EndBeforeStart);
            }
            other => panic!("expected layout error, got {other:?}"),
        }
    }

    #[test]
    fn too_many_layouts_rejected() {
        let def = BEACON_LAYOUTS[0];
        let defs = [def; MAX_LAYOUTS + 1];
        assert_eq!(
            BeaconCatalog::from_defs(&defs).unwrap_err(),
            CatalogError::TooManyLayouts
        );
    }

    // ── Scan filters ────────────────────────────────────────────────

    #[test]
    fn session_filters_cover_enabled_kinds() {
        let catalog = BeaconCatalog::new().unwrap();
        let filters = catalog.scan_filters(&CatalogConfig::new(), &[]).unwrap();
        let targets: std::vec::Vec<MatchTarget> = filters.iter().map(|f| f.match_target).collect();
        assert_eq!(
            targets,
            [
                MatchTarget::ManufacturerId(0x0118),
                MatchTarget::ManufacturerId(0x004C),
                MatchTarget::ServiceUuid16(0xFEAA),
                MatchTarget::ManufacturerId(0x0499),
            ]
        );
        for (_, raw) in samples() {
            assert!(filters.iter().any(|f| f.matches_advertisement(raw)));
        }
    }

    #[test]
    fn session_filters_skip_disabled_kinds() {
        let catalog = BeaconCatalog::new().unwrap();
        let mut config = CatalogConfig::new();
        config.set_enabled(BeaconKind::AltBeacon, false);
        config.set_enabled(BeaconKind::RuuviTag, false);
        let filters = catalog.scan_filters(&config, &[]).unwrap();
        assert_eq!(filters.len(), 2);
    }

    #[test]
    fn known_prefixes_routed_by_kind() {
        let catalog = BeaconCatalog::new().unwrap();
        let prefixes = [
            KnownPrefix {
                kind: BeaconKind::IBeacon,
                bytes: &[0xFB, 0x0B],
            },
            KnownPrefix {
                kind: BeaconKind::IBeacon,
                bytes: &[0x01, 0x02],
            },
        ];
        let filters = catalog.scan_filters(&CatalogConfig::new(), &prefixes).unwrap();
        // AltBeacon, 2x iBeacon, Eddystone, Ruuvi
        assert_eq!(filters.len(), 5);
        assert_eq!(&filters[1].filter_bytes[4..], &[0xFB, 0x0B]);
        assert_eq!(&filters[2].filter_bytes[4..], &[0x01, 0x02]);
        assert_eq!(filters[3].filter_bytes.len(), 1);
    }

    #[test]
    fn excess_known_prefixes_rejected() {
        let catalog = BeaconCatalog::new().unwrap();
        let bytes: [[u8; 2]; MAX_PREFIXES + 1] = core::array::from_fn(|i| [0xA0, i as u8]);
        let prefixes: std::vec::Vec<KnownPrefix> = bytes
            .iter()
            .map(|b| KnownPrefix {
                kind: BeaconKind::IBeacon,
                bytes: b,
            })
            .collect();

        let err = catalog
            .scan_filters(&CatalogConfig::new(), &prefixes)
            .unwrap_err();
        assert_eq!(err, ScanFilterError::TooManyPrefixes);

        // at the limit every prefix still gets its own filter
        let filters = catalog
            .scan_filters(&CatalogConfig::new(), &prefixes[..MAX_PREFIXES])
            .unwrap();
        for b in &bytes[..MAX_PREFIXES] {
            assert!(filters.iter().any(|f| f.filter_bytes.ends_with(b)));
        }
    }

    #[test]
    fn kind_text() {
        assert_eq!(BeaconKind::EddystoneUid.as_str(), "eddystone_uid");
        assert_eq!(std::format!("{}", BeaconKind::IBeacon), "ibeacon");
    }
}
