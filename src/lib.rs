//! Beacon layout library: BLE beacon recognition for wardriving scans.
//!
//! A small layout DSL describes where a beacon protocol (AltBeacon, iBeacon,
//! Eddystone-UID, RuuviTag, ...) keeps its identity inside a BLE
//! advertisement. This crate compiles those layouts, decodes raw advertisement
//! bytes with them, and derives the hardware scan filters used for low-power
//! background scanning. Platform code supplies the radio bytes and consumes
//! the results; nothing here touches a radio or does I/O.
//!
//! - `layout`: DSL compiler producing immutable [`layout::Layout`]s.
//! - `decoder`: hot-path decoder: raw bytes → [`decoder::BeaconData`].
//! - `scan_filter`: filter/mask synthesis for OS scan filters.
//! - `catalog`, `defaults`: the compiled-in layouts, first-match decoding.
//! - `ad`, `protocol`: AD structure walker and NDJSON output.
//!
//! `no_std`, no allocator.

#![cfg_attr(not(test), no_std)]

pub mod ad;
pub mod catalog;
pub mod decoder;
pub mod defaults;
pub mod layout;
pub mod protocol;
pub mod scan_filter;

pub use catalog::{BeaconCatalog, BeaconKind, CatalogConfig, CatalogMatch};
pub use decoder::{AdvertisementDecoder, BeaconData, Identifier};
pub use layout::{Layout, LayoutParseError};
pub use scan_filter::{create_scan_filters, MatchTarget, ScanFilterError, ScanFilterSpec};
