/// Hardware scan filter synthesis.
///
/// Background BLE scanning is only allowed with chipset-level filters, so each
/// layout is turned into `(filter, mask)` byte pairs. A filter matches when
/// `(data[offset + i] & mask[i]) == filter[i]` for every `i`; zero mask bytes
/// are "don't care".
///
/// Manufacturer layouts yield one filter per candidate manufacturer ID; their
/// bytes start at payload offset 0 (the first company ID byte). Service layouts
/// yield service UUID filters whose bytes start right after the UUID.
use heapless::Vec;
use thiserror::Error;
use uuid::Uuid;

use crate::ad::{ad_structures, AdStructure};
use crate::layout::{BeaconSource, FieldRange, Layout, Matcher, ServiceUuid};

/// Longest filter/mask array (legacy advertisement payload bound).
pub const MAX_FILTER_LEN: usize = 31;
/// Most filters one synthesis call may produce.
pub const MAX_SCAN_FILTERS: usize = 16;
/// Matcher value of the iBeacon layout.
pub const IBEACON_TYPE_CODE: u64 = 0x0215;

/// Filter or mask bytes.
pub type FilterBytes = Vec<u8, MAX_FILTER_LEN>;

/// Filters produced for one layout or one scan session.
pub type ScanFilters = Vec<ScanFilterSpec, MAX_SCAN_FILTERS>;

/// What the radio keys the filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchTarget {
    ManufacturerId(u16),
    ServiceUuid16(u16),
    ServiceUuid128(Uuid),
}

impl From<ServiceUuid> for MatchTarget {
    fn from(uuid: ServiceUuid) -> Self {
        match uuid {
            ServiceUuid::Uuid16(u) => MatchTarget::ServiceUuid16(u),
            ServiceUuid::Uuid128(_) => MatchTarget::ServiceUuid128(uuid.to_uuid()),
        }
    }
}

/// One OS-level scan filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFilterSpec {
    pub filter_bytes: FilterBytes,
    pub mask_bytes: FilterBytes,
    pub match_target: MatchTarget,
    /// Payload offset that `filter_bytes[0]` applies to.
    pub offset: usize,
}

impl ScanFilterSpec {
    /// Check an AD payload the way the radio would.
    ///
    /// Only the bytes are compared; the caller has already selected a
    /// structure for `match_target`. A payload shorter than the filter never
    /// matches.
    pub fn matches_payload(&self, payload: &[u8]) -> bool {
        self.filter_bytes
            .iter()
            .zip(self.mask_bytes.iter())
            .enumerate()
            .all(|(i, (&filter, &mask))| {
                payload
                    .get(self.offset + i)
                    .is_some_and(|&b| b & mask == filter)
            })
    }

    /// Whether this AD structure is keyed by `match_target`.
    pub fn targets(&self, structure: &AdStructure) -> bool {
        let uuid = match self.match_target {
            MatchTarget::ManufacturerId(id) => return structure.company_id() == Some(id),
            MatchTarget::ServiceUuid16(uuid) => ServiceUuid::Uuid16(uuid),
            MatchTarget::ServiceUuid128(uuid) => {
                let mut air = *uuid.as_bytes();
                air.reverse();
                ServiceUuid::Uuid128(air)
            }
        };
        uuid.carried_by(structure.ad_type)
            && structure
                .data
                .get(..uuid.width())
                .is_some_and(|bytes| uuid.matches(bytes))
    }

    /// Software equivalent of the radio filter over a raw advertisement.
    pub fn matches_advertisement(&self, raw: &[u8]) -> bool {
        ad_structures(raw).any(|s| self.targets(&s) && self.matches_payload(s.data))
    }
}

/// Scan filter setup failed. Always a static configuration bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScanFilterError {
    #[error("manufacturer data layout needs at least one manufacturer ID")]
    NoManufacturerIds,
    #[error("filter exceeds 31 bytes")]
    FilterTooLong,
    #[error("more than 16 scan filters")]
    TooManyFilters,
    #[error("more than 8 known prefixes for one layout")]
    TooManyPrefixes,
}

/// Build the OS scan filters for `layout`.
///
/// `known_identifier_prefixes` narrows iBeacon and service layouts to
/// previously observed first-identifier bytes (one filter per prefix).
/// Other manufacturer layouts filter on the matcher only.
pub fn create_scan_filters(
    layout: &Layout,
    manufacturer_ids: &[u16],
    known_identifier_prefixes: &[&[u8]],
) -> Result<ScanFilters, ScanFilterError> {
    let filters = match layout.source() {
        BeaconSource::ManufacturerData => {
            if manufacturer_ids.is_empty() {
                return Err(ScanFilterError::NoManufacturerIds);
            }
            match layout.matcher() {
                Some(m) if is_ibeacon(m) => {
                    ibeacon_filters(m, manufacturer_ids, known_identifier_prefixes)?
                }
                matcher => manufacturer_filters(matcher, manufacturer_ids)?,
            }
        }
        BeaconSource::ServiceData { uuid, range } => {
            service_filters(layout, *uuid, range, known_identifier_prefixes)?
        }
    };

    log::debug!("Synthesized {} scan filter(s) for layout {}", filters.len(), layout);
    Ok(filters)
}

fn is_ibeacon(matcher: &Matcher) -> bool {
    matcher.expected == IBEACON_TYPE_CODE && matcher.range.width() == 2
}

/// Generic matcher-only filters, one per manufacturer ID.
fn manufacturer_filters(
    matcher: Option<&Matcher>,
    manufacturer_ids: &[u16],
) -> Result<ScanFilters, ScanFilterError> {
    let (filter, mask) = matcher_pattern(matcher, 0)?;
    let mut filters = ScanFilters::new();
    for &id in manufacturer_ids {
        push_filter(
            &mut filters,
            ScanFilterSpec {
                filter_bytes: filter.clone(),
                mask_bytes: mask.clone(),
                match_target: MatchTarget::ManufacturerId(id),
                offset: 0,
            },
        )?;
    }
    Ok(filters)
}

/// iBeacon: type code, then each known proximity UUID prefix right after it.
fn ibeacon_filters(
    matcher: &Matcher,
    manufacturer_ids: &[u16],
    known_identifier_prefixes: &[&[u8]],
) -> Result<ScanFilters, ScanFilterError> {
    let (filter, mask) = matcher_pattern(Some(matcher), 0)?;
    let mut filters = ScanFilters::new();

    for &id in manufacturer_ids {
        if known_identifier_prefixes.is_empty() {
            push_filter(
                &mut filters,
                ScanFilterSpec {
                    filter_bytes: filter.clone(),
                    mask_bytes: mask.clone(),
                    match_target: MatchTarget::ManufacturerId(id),
                    offset: 0,
                },
            )?;
            continue;
        }

        for prefix in known_identifier_prefixes {
            let mut filter_bytes = filter.clone();
            let mut mask_bytes = mask.clone();
            for (k, &b) in prefix.iter().enumerate() {
                set_byte(&mut filter_bytes, &mut mask_bytes, filter.len() + k, b)?;
            }
            push_filter(
                &mut filters,
                ScanFilterSpec {
                    filter_bytes,
                    mask_bytes,
                    match_target: MatchTarget::ManufacturerId(id),
                    offset: 0,
                },
            )?;
        }
    }
    Ok(filters)
}

/// Service UUID filter, narrowed by the matcher and optionally by known
/// first-identifier prefixes.
fn service_filters(
    layout: &Layout,
    uuid: ServiceUuid,
    uuid_range: &FieldRange,
    known_identifier_prefixes: &[&[u8]],
) -> Result<ScanFilters, ScanFilterError> {
    let from = uuid_range.end + 1;
    let (filter, mask) = matcher_pattern(layout.matcher(), from)?;
    let match_target = MatchTarget::from(uuid);
    let mut filters = ScanFilters::new();

    let first_id = layout.identifiers().first().filter(|id| id.start >= from);
    let first_id = match first_id {
        Some(id) if !known_identifier_prefixes.is_empty() => id,
        _ => {
            push_filter(
                &mut filters,
                ScanFilterSpec {
                    filter_bytes: filter,
                    mask_bytes: mask,
                    match_target,
                    offset: from,
                },
            )?;
            return Ok(filters);
        }
    };

    for prefix in known_identifier_prefixes {
        let mut filter_bytes = filter.clone();
        let mut mask_bytes = mask.clone();
        for (k, &b) in prefix.iter().take(first_id.width()).enumerate() {
            set_byte(&mut filter_bytes, &mut mask_bytes, first_id.start - from + k, b)?;
        }
        push_filter(
            &mut filters,
            ScanFilterSpec {
                filter_bytes,
                mask_bytes,
                match_target,
                offset: from,
            },
        )?;
    }
    Ok(filters)
}

/// Filter/mask covering payload offsets `from..=matcher.end`.
///
/// Matcher bytes are masked in; everything else is don't-care. Empty when
/// there is no matcher or it ends before `from`.
fn matcher_pattern(
    matcher: Option<&Matcher>,
    from: usize,
) -> Result<(FilterBytes, FilterBytes), ScanFilterError> {
    let mut filter = FilterBytes::new();
    let mut mask = FilterBytes::new();

    let Some(matcher) = matcher else {
        return Ok((filter, mask));
    };
    if matcher.range.end < from {
        return Ok((filter, mask));
    }

    let value = matcher.bytes();
    for pos in from.max(matcher.range.start)..=matcher.range.end {
        set_byte(&mut filter, &mut mask, pos - from, value[pos - matcher.range.start])?;
    }
    Ok((filter, mask))
}

/// Set `filter[index] = value` with a full mask, padding with don't-care bytes.
fn set_byte(
    filter: &mut FilterBytes,
    mask: &mut FilterBytes,
    index: usize,
    value: u8,
) -> Result<(), ScanFilterError> {
    if index >= MAX_FILTER_LEN {
        return Err(ScanFilterError::FilterTooLong);
    }
    while filter.len() <= index {
        filter.push(0).map_err(|_| ScanFilterError::FilterTooLong)?;
        mask.push(0).map_err(|_| ScanFilterError::FilterTooLong)?;
    }
    filter[index] = value;
    mask[index] = 0xFF;
    Ok(())
}

fn push_filter(filters: &mut ScanFilters, filter: ScanFilterSpec) -> Result<(), ScanFilterError> {
    filters.push(filter).map_err(|_| ScanFilterError::TooManyFilters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    const IBEACON_SAMPLE: [u8; 31] =
        hex!("0201061AFF4C000215FB0B57A2822844CD913A94A122BA120600010002D100");
    const EDDYSTONE_SAMPLE: [u8; 29] =
        hex!("0201060303aafe1516aafe001000000123456789123456789123456789");
    const RUUVI_SAMPLE: [u8; 31] =
        hex!("0201041BFF99040512FC5394C37C0004FFFC040CAC364200CDCBB8334C884F");

    fn layout(dsl: &str) -> Layout {
        Layout::parse(dsl).unwrap()
    }

    // ── Manufacturer layouts ────────────────────────────────────────

    #[test]
    fn altbeacon_matcher_filter() {
        let filters = create_scan_filters(
            &layout("m:2-3=beac,i:4-19,i:20-21,i:22-23,p:24-24,d:25-25"),
            &[0x0118],
            &[],
        )
        .unwrap();
        assert_eq!(filters.len(), 1);
        let f = &filters[0];
        assert_eq!(f.match_target, MatchTarget::ManufacturerId(0x0118));
        assert_eq!(&f.filter_bytes[..], &[0x00, 0x00, 0xBE, 0xAC]);
        assert_eq!(&f.mask_bytes[..], &[0x00, 0x00, 0xFF, 0xFF]);
        assert_eq!(f.offset, 0);
    }

    #[test]
    fn one_filter_per_manufacturer_id() {
        let filters =
            create_scan_filters(&layout("m:0-2=990405,i:20-25"), &[0x0499, 0x0118, 0x004C], &[])
                .unwrap();
        let targets: std::vec::Vec<MatchTarget> = filters.iter().map(|f| f.match_target).collect();
        assert_eq!(
            targets,
            [
                MatchTarget::ManufacturerId(0x0499),
                MatchTarget::ManufacturerId(0x0118),
                MatchTarget::ManufacturerId(0x004C),
            ]
        );
        assert!(filters.iter().all(|f| f.filter_bytes == filters[0].filter_bytes));
    }

    #[test]
    fn ruuvi_filter_accepts_sample() {
        let filters = create_scan_filters(&layout("m:0-2=990405,i:20-25"), &[0x0499], &[]).unwrap();
        assert_eq!(&filters[0].filter_bytes[..], &[0x99, 0x04, 0x05]);
        assert_eq!(&filters[0].mask_bytes[..], &[0xFF, 0xFF, 0xFF]);
        assert!(filters[0].matches_advertisement(&RUUVI_SAMPLE));
        assert!(!filters[0].matches_advertisement(&IBEACON_SAMPLE));
    }

    #[test]
    fn empty_manufacturer_list_fails_fast() {
        let err = create_scan_filters(&layout("m:2-3=beac,i:4-19"), &[], &[]).unwrap_err();
        assert_eq!(err, ScanFilterError::NoManufacturerIds);
    }

    #[test]
    fn manufacturer_layout_without_matcher_filters_on_id_only() {
        let filters = create_scan_filters(&layout("i:2-5"), &[0x0059], &[]).unwrap();
        assert_eq!(filters.len(), 1);
        assert!(filters[0].filter_bytes.is_empty());
        assert!(filters[0].matches_advertisement(&hex!("07FF5900AABBCCDD")));
        assert!(!filters[0].matches_advertisement(&IBEACON_SAMPLE));
    }

    #[test]
    fn generic_manufacturer_path_ignores_prefixes() {
        let prefix: &[u8] = &[0x2F, 0x23];
        let with = create_scan_filters(&layout("m:2-3=beac,i:4-19"), &[0x0118], &[prefix]).unwrap();
        let without = create_scan_filters(&layout("m:2-3=beac,i:4-19"), &[0x0118], &[]).unwrap();
        assert_eq!(with, without);
    }

    #[test]
    fn too_many_filters_rejected() {
        let ids: [u16; MAX_SCAN_FILTERS + 1] = core::array::from_fn(|i| i as u16);
        let err = create_scan_filters(&layout("m:2-3=beac"), &ids, &[]).unwrap_err();
        assert_eq!(err, ScanFilterError::TooManyFilters);
    }

    // ── iBeacon ─────────────────────────────────────────────────────

    const IBEACON: &str = "m:2-3=0215,i:4-19,i:20-21,i:22-23,p:24-24";

    #[test]
    fn ibeacon_without_prefixes() {
        let filters = create_scan_filters(&layout(IBEACON), &[0x004C], &[]).unwrap();
        assert_eq!(filters.len(), 1);
        assert_eq!(&filters[0].filter_bytes[..], &[0x00, 0x00, 0x02, 0x15]);
        assert_eq!(&filters[0].mask_bytes[..], &[0x00, 0x00, 0xFF, 0xFF]);
        assert!(filters[0].matches_advertisement(&IBEACON_SAMPLE));
    }

    #[test]
    fn ibeacon_prefix_follows_type_code() {
        let known: &[u8] = &[0xFB, 0x0B, 0x57];
        let other: &[u8] = &[0x11, 0x22];
        let filters =
            create_scan_filters(&layout(IBEACON), &[0x004C, 0x0118], &[known, other]).unwrap();
        assert_eq!(filters.len(), 4);

        let f = &filters[0];
        assert_eq!(f.match_target, MatchTarget::ManufacturerId(0x004C));
        assert_eq!(&f.filter_bytes[..], &[0x00, 0x00, 0x02, 0x15, 0xFB, 0x0B, 0x57]);
        assert_eq!(&f.mask_bytes[..], &[0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(f.matches_advertisement(&IBEACON_SAMPLE));
        assert!(!filters[1].matches_advertisement(&IBEACON_SAMPLE));
        assert_eq!(filters[2].match_target, MatchTarget::ManufacturerId(0x0118));
    }

    #[test]
    fn oversized_prefix_rejected() {
        let long = [0xAA; 28];
        let err = create_scan_filters(&layout(IBEACON), &[0x004C], &[&long[..]]).unwrap_err();
        assert_eq!(err, ScanFilterError::FilterTooLong);
    }

    // ── Service layouts ─────────────────────────────────────────────

    const EDDYSTONE_UID: &str = "s:0-1=feaa,m:2-2=00,p:3-3:-41,i:4-13,i:14-19";

    #[test]
    fn eddystone_service_filter() {
        // manufacturer IDs are irrelevant for service layouts
        let filters = create_scan_filters(&layout(EDDYSTONE_UID), &[], &[]).unwrap();
        assert_eq!(filters.len(), 1);
        let f = &filters[0];
        assert_eq!(f.match_target, MatchTarget::ServiceUuid16(0xFEAA));
        assert_eq!(f.offset, 2);
        assert_eq!(&f.filter_bytes[..], &[0x00]);
        assert_eq!(&f.mask_bytes[..], &[0xFF]);
        assert!(f.matches_advertisement(&EDDYSTONE_SAMPLE));
    }

    #[test]
    fn eddystone_prefix_lands_on_namespace() {
        let namespace: &[u8] = &[0x00, 0x00, 0x01];
        let stranger: &[u8] = &[0xFF];
        let filters =
            create_scan_filters(&layout(EDDYSTONE_UID), &[], &[namespace, stranger]).unwrap();
        assert_eq!(filters.len(), 2);
        assert_eq!(&filters[0].filter_bytes[..], &[0x00, 0x00, 0x00, 0x00, 0x01]);
        assert_eq!(&filters[0].mask_bytes[..], &[0xFF, 0x00, 0xFF, 0xFF, 0xFF]);
        assert!(filters[0].matches_advertisement(&EDDYSTONE_SAMPLE));
        assert!(!filters[1].matches_advertisement(&EDDYSTONE_SAMPLE));
    }

    #[test]
    fn matcher_inside_uuid_emits_uuid_filter_only() {
        let filters =
            create_scan_filters(&layout("s:0-1=feaa,m:0-1=aafe,i:2-5"), &[], &[]).unwrap();
        assert_eq!(filters.len(), 1);
        assert!(filters[0].filter_bytes.is_empty());
        assert!(filters[0].mask_bytes.is_empty());
        assert_eq!(filters[0].match_target, MatchTarget::ServiceUuid16(0xFEAA));
    }

    #[test]
    fn uuid128_service_target() {
        let text = "s:0-15=0000fd6f-0000-1000-8000-00805f9b34fb,i:16-17";
        let filters = create_scan_filters(&layout(text), &[], &[]).unwrap();
        let expected = Uuid::parse_str("0000fd6f-0000-1000-8000-00805f9b34fb").unwrap();
        assert_eq!(filters[0].match_target, MatchTarget::ServiceUuid128(expected));
        assert_eq!(filters[0].offset, 16);
        let raw = hex!("1321 fb349b5f80000080001000006ffd0000 0102");
        assert!(filters[0].matches_advertisement(&raw));
        assert!(!filters[0].matches_advertisement(&EDDYSTONE_SAMPLE));
    }

    #[test]
    fn uuid16_target_ignores_128_bit_service_data() {
        let filters = create_scan_filters(&layout(EDDYSTONE_UID), &[], &[]).unwrap();
        assert!(filters[0].matches_advertisement(&EDDYSTONE_SAMPLE));
        let mut raw = EDDYSTONE_SAMPLE;
        raw[8] = 0x21;
        assert!(!filters[0].matches_advertisement(&raw));
    }

    // ── Filter semantics ────────────────────────────────────────────

    #[test]
    fn short_payload_never_matches() {
        let filter = ScanFilterSpec {
            filter_bytes: FilterBytes::from_slice(&[0x00, 0x02]).unwrap(),
            mask_bytes: FilterBytes::from_slice(&[0x00, 0xFF]).unwrap(),
            match_target: MatchTarget::ManufacturerId(0x004C),
            offset: 2,
        };
        assert!(filter.matches_payload(&[0x4C, 0x00, 0x77, 0x02]));
        assert!(!filter.matches_payload(&[0x4C, 0x00, 0x77]));
        assert!(!filter.matches_payload(&[0x4C, 0x00, 0x77, 0x03]));
    }
}
