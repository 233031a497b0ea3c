/// Beacon layout DSL compiler.
///
/// A layout describes where one beacon protocol puts its identity inside a
/// BLE advertisement. It is written as comma-separated fields of the form
/// `<letter>:<start>-<end>[=<value>][:<extra>]`:
///
/// - `m`: matcher, the byte range must equal `value` (big-endian hex).
/// - `s`: service UUID, 4 hex digits or 36-char UUID text. Routes decoding
///   through Service Data instead of Manufacturer Specific Data.
/// - `i`: identifier (repeatable, order kept). `l` after `end` = little-endian.
/// - `d`: data field, unsigned integer (repeatable). `l` suffix as for `i`.
/// - `p`: transmit power, signed. `:<int>` pins it to a calibration constant.
///
/// Offsets are relative to the first payload byte of the selected AD
/// structure, so they include the company ID or the service UUID bytes.
///
/// Layouts are compiled once and never mutated afterwards.
use core::fmt::{self, Write};
use core::str::FromStr;

use heapless::{String, Vec};
use thiserror::Error;
use uuid::Uuid;

use crate::ad::{AD_TYPE_SERVICE_DATA_128, AD_TYPE_SERVICE_DATA_16};

/// Maximum number of `i` fields in one layout.
pub const MAX_IDENTIFIERS: usize = 8;
/// Maximum number of `d` fields in one layout.
pub const MAX_DATA_FIELDS: usize = 8;
/// Widest identifier, in bytes.
pub const MAX_IDENTIFIER_LEN: usize = 32;
/// Widest data field, in bytes (decoded as `u64`).
pub const MAX_DATA_FIELD_LEN: usize = 8;
/// Widest matcher, in bytes (decoded as `u64`).
pub const MAX_MATCHER_LEN: usize = 8;
/// Widest power field, in bytes (decoded as `i32`).
pub const MAX_POWER_LEN: usize = 4;
/// Highest byte offset a field may name. An AD structure's length byte
/// covers the type byte too, so no payload is longer than 254 bytes.
pub const MAX_OFFSET: usize = 253;

/// Offending DSL token carried by [`LayoutParseError`], truncated to fit.
pub type FieldToken = String<64>;

/// Why a layout field was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseReason {
    #[error("layout has no fields")]
    EmptyLayout,
    #[error("unknown field type")]
    UnknownFieldType,
    #[error("malformed range")]
    MalformedRange,
    #[error("end offset is before start offset")]
    EndBeforeStart,
    #[error("field may only appear once")]
    DuplicateField,
    #[error("value length does not match the field width")]
    HexLengthMismatch,
    #[error("invalid value")]
    InvalidValue,
    #[error("field requires a value")]
    MissingValue,
    #[error("field does not take a value")]
    UnexpectedValue,
    #[error("field is too wide")]
    FieldTooWide,
    #[error("too many fields of this type")]
    TooManyFields,
}

/// A layout string could not be compiled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid layout field `{token}`: {reason}")]
pub struct LayoutParseError {
    pub token: FieldToken,
    pub reason: ParseReason,
}

impl LayoutParseError {
    fn new(token: &str, reason: ParseReason) -> Self {
        let mut t = FieldToken::new();
        for c in token.chars() {
            if t.push(c).is_err() {
                break;
            }
        }
        Self { token: t, reason }
    }
}

/// An inclusive byte range `start..=end` within the selected AD payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRange {
    pub start: usize,
    pub end: usize,
    /// Bytes are little-endian on the air (`l` suffix)
    pub little_endian: bool,
}

impl FieldRange {
    /// Number of bytes covered. Always at least 1.
    pub const fn width(&self) -> usize {
        self.end - self.start + 1
    }

    /// The covered bytes, or `None` if `payload` is too short.
    #[inline]
    pub fn slice<'a>(&self, payload: &'a [u8]) -> Option<&'a [u8]> {
        payload.get(self.start..=self.end)
    }
}

/// Fixed byte value that identifies the beacon format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Matcher {
    pub range: FieldRange,
    /// Big-endian value; also reported as the beacon type.
    pub expected: u64,
}

impl Matcher {
    /// The expected value as `range.width()` big-endian bytes.
    pub fn bytes(&self) -> Vec<u8, MAX_MATCHER_LEN> {
        let all = self.expected.to_be_bytes();
        let mut out = Vec::new();
        // width <= MAX_MATCHER_LEN is enforced by the compiler
        let _ = out.extend_from_slice(&all[all.len() - self.range.width()..]);
        out
    }

    /// Whether `payload` carries the expected value. Short payloads never match.
    #[inline]
    pub fn matches(&self, payload: &[u8]) -> bool {
        match self.range.slice(payload) {
            Some(bytes) => read_unsigned(bytes, false) == self.expected,
            None => false,
        }
    }
}

/// Service UUID of a Service Data layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceUuid {
    /// Assigned 16-bit UUID, e.g. `0xFEAA` for Eddystone.
    Uuid16(u16),
    /// Full 128-bit UUID, stored in over-the-air (reversed) byte order.
    Uuid128([u8; 16]),
}

impl ServiceUuid {
    /// Bluetooth Base UUID, used to widen 16-bit UUIDs.
    pub const BASE_UUID: Uuid = Uuid::from_u128(0x0000_0000_0000_1000_8000_0080_5f9b_34fb);

    /// Number of bytes the UUID occupies on the air.
    pub const fn width(&self) -> usize {
        match self {
            ServiceUuid::Uuid16(_) => 2,
            ServiceUuid::Uuid128(_) => 16,
        }
    }

    /// Whether a Service Data structure of `ad_type` can carry this UUID.
    /// 16-bit UUIDs only travel in 0x16; 128-bit UUIDs in 0x21 or 0x16.
    pub const fn carried_by(&self, ad_type: u8) -> bool {
        match self {
            ServiceUuid::Uuid16(_) => ad_type == AD_TYPE_SERVICE_DATA_16,
            ServiceUuid::Uuid128(_) => {
                ad_type == AD_TYPE_SERVICE_DATA_128 || ad_type == AD_TYPE_SERVICE_DATA_16
            }
        }
    }

    /// Whether `bytes` is this UUID in over-the-air order.
    #[inline]
    pub fn matches(&self, bytes: &[u8]) -> bool {
        match self {
            ServiceUuid::Uuid16(uuid) => bytes == &uuid.to_le_bytes()[..],
            ServiceUuid::Uuid128(air) => bytes == &air[..],
        }
    }

    /// The UUID in canonical (big-endian) form.
    pub fn to_uuid(&self) -> Uuid {
        match self {
            ServiceUuid::Uuid16(uuid) => {
                Uuid::from_u128(Self::BASE_UUID.as_u128() | (u128::from(*uuid) << 96))
            }
            ServiceUuid::Uuid128(air) => {
                let mut bytes = *air;
                bytes.reverse();
                Uuid::from_bytes(bytes)
            }
        }
    }
}

/// Where the decoder finds the payload of interest. Fixed at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeaconSource {
    /// AD type 0xFF; offset 0 is the first company ID byte.
    ManufacturerData,
    /// Service Data whose bytes at `range` equal `uuid`; offset 0 is the
    /// first UUID byte.
    ServiceData { uuid: ServiceUuid, range: FieldRange },
}

/// Transmit power field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerField {
    pub range: FieldRange,
    /// Calibration constant used instead of reading the packet.
    pub fixed: Option<i32>,
}

/// A compiled, immutable beacon layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    matcher: Option<Matcher>,
    source: BeaconSource,
    identifiers: Vec<FieldRange, MAX_IDENTIFIERS>,
    data_fields: Vec<FieldRange, MAX_DATA_FIELDS>,
    power: Option<PowerField>,
}

impl Layout {
    /// Compile a layout string.
    pub fn parse(layout: &str) -> Result<Self, LayoutParseError> {
        let mut builder = LayoutBuilder::default();
        let mut fields = 0usize;

        for token in layout.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            builder
                .add(token)
                .map_err(|reason| LayoutParseError::new(token, reason))?;
            fields += 1;
        }

        if fields == 0 {
            return Err(LayoutParseError::new(layout, ParseReason::EmptyLayout));
        }

        Ok(builder.finish())
    }

    pub fn matcher(&self) -> Option<&Matcher> {
        self.matcher.as_ref()
    }

    pub fn source(&self) -> &BeaconSource {
        &self.source
    }

    pub fn service_uuid(&self) -> Option<ServiceUuid> {
        match self.source {
            BeaconSource::ServiceData { uuid, .. } => Some(uuid),
            BeaconSource::ManufacturerData => None,
        }
    }

    pub fn identifiers(&self) -> &[FieldRange] {
        &self.identifiers
    }

    pub fn data_fields(&self) -> &[FieldRange] {
        &self.data_fields
    }

    pub fn power(&self) -> Option<&PowerField> {
        self.power.as_ref()
    }
}

impl FromStr for Layout {
    type Err = LayoutParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Layout::parse(s)
    }
}

/// Canonical DSL text: m, s, i..., d..., p.
impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sep = "";

        if let Some(m) = &self.matcher {
            write!(f, "m:")?;
            write_range(f, &m.range)?;
            write!(f, "=")?;
            for b in m.bytes() {
                write!(f, "{:02x}", b)?;
            }
            sep = ",";
        }

        if let BeaconSource::ServiceData { uuid, range } = &self.source {
            write!(f, "{}s:", sep)?;
            write_range(f, range)?;
            match uuid {
                ServiceUuid::Uuid16(u) => write!(f, "={:04x}", u)?,
                ServiceUuid::Uuid128(_) => write!(f, "={}", uuid.to_uuid())?,
            }
            sep = ",";
        }

        for (letter, ranges) in [('i', &self.identifiers[..]), ('d', &self.data_fields[..])] {
            for range in ranges {
                write!(f, "{}{}:", sep, letter)?;
                write_range(f, range)?;
                sep = ",";
            }
        }

        if let Some(p) = &self.power {
            write!(f, "{}p:", sep)?;
            write_range(f, &p.range)?;
            if let Some(fixed) = p.fixed {
                write!(f, ":{}", fixed)?;
            }
        }

        Ok(())
    }
}

fn write_range(f: &mut fmt::Formatter<'_>, range: &FieldRange) -> fmt::Result {
    write!(f, "{}-{}", range.start, range.end)?;
    if range.little_endian {
        f.write_char('l')?;
    }
    Ok(())
}

/// Decode bytes as an unsigned integer. Callers bound the width to 8 bytes.
#[inline]
pub(crate) fn read_unsigned(bytes: &[u8], little_endian: bool) -> u64 {
    if little_endian {
        bytes.iter().rev().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
    } else {
        bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
    }
}

/// Decode big-endian bytes as a two's complement integer of their own width.
#[inline]
pub(crate) fn read_signed(bytes: &[u8]) -> i32 {
    let raw = read_unsigned(bytes, false);
    let shift = 64 - 8 * bytes.len() as u32;
    ((raw << shift) as i64 >> shift) as i32
}

// ── Compilation ────────────────────────────────────────────────────────

/// One field token split into its parts.
struct Token<'a> {
    letter: &'a str,
    range: &'a str,
    value: Option<&'a str>,
    extra: Option<&'a str>,
}

impl<'a> Token<'a> {
    /// The range is taken from before the first `=` because 128-bit UUID
    /// values contain dashes.
    fn split(token: &'a str) -> Result<Self, ParseReason> {
        let (letter, body) = token.split_once(':').ok_or(ParseReason::MalformedRange)?;

        let (range, value, extra) = match body.split_once('=') {
            Some((range, rest)) => match rest.split_once(':') {
                Some((value, extra)) => (range, Some(value), Some(extra)),
                None => (range, Some(rest), None),
            },
            None => match body.split_once(':') {
                Some((range, extra)) => (range, None, Some(extra)),
                None => (body, None, None),
            },
        };

        Ok(Token {
            letter,
            range,
            value,
            extra,
        })
    }
}

fn parse_range(text: &str) -> Result<FieldRange, ParseReason> {
    let (text, little_endian) = match text.strip_suffix('l') {
        Some(stripped) => (stripped, true),
        None => (text, false),
    };
    let (start, end) = text.split_once('-').ok_or(ParseReason::MalformedRange)?;
    let start = parse_offset(start)?;
    let end = parse_offset(end)?;
    if end < start {
        return Err(ParseReason::EndBeforeStart);
    }
    Ok(FieldRange {
        start,
        end,
        little_endian,
    })
}

fn parse_offset(text: &str) -> Result<usize, ParseReason> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseReason::MalformedRange);
    }
    let offset: usize = text.parse().map_err(|_| ParseReason::MalformedRange)?;
    if offset > MAX_OFFSET {
        return Err(ParseReason::MalformedRange);
    }
    Ok(offset)
}

fn is_hex(text: &str) -> bool {
    !text.is_empty() && text.bytes().all(|b| b.is_ascii_hexdigit())
}

#[derive(Default)]
struct LayoutBuilder {
    matcher: Option<Matcher>,
    service: Option<(ServiceUuid, FieldRange)>,
    identifiers: Vec<FieldRange, MAX_IDENTIFIERS>,
    data_fields: Vec<FieldRange, MAX_DATA_FIELDS>,
    power: Option<PowerField>,
}

impl LayoutBuilder {
    fn add(&mut self, token: &str) -> Result<(), ParseReason> {
        let token = Token::split(token)?;
        let range = parse_range(token.range)?;

        match token.letter {
            "m" => self.add_matcher(range, &token),
            "s" => self.add_service(range, &token),
            "i" => {
                no_value(&token)?;
                if range.width() > MAX_IDENTIFIER_LEN {
                    return Err(ParseReason::FieldTooWide);
                }
                self.identifiers
                    .push(range)
                    .map_err(|_| ParseReason::TooManyFields)
            }
            "d" => {
                no_value(&token)?;
                if range.width() > MAX_DATA_FIELD_LEN {
                    return Err(ParseReason::FieldTooWide);
                }
                self.data_fields
                    .push(range)
                    .map_err(|_| ParseReason::TooManyFields)
            }
            "p" => self.add_power(range, &token),
            _ => Err(ParseReason::UnknownFieldType),
        }
    }

    fn add_matcher(&mut self, range: FieldRange, token: &Token) -> Result<(), ParseReason> {
        if self.matcher.is_some() {
            return Err(ParseReason::DuplicateField);
        }
        big_endian_only(&range)?;
        if token.extra.is_some() {
            return Err(ParseReason::UnexpectedValue);
        }
        let value = token.value.ok_or(ParseReason::MissingValue)?;
        if !is_hex(value) {
            return Err(ParseReason::InvalidValue);
        }
        if value.len() != 2 * range.width() {
            return Err(ParseReason::HexLengthMismatch);
        }
        if range.width() > MAX_MATCHER_LEN {
            return Err(ParseReason::FieldTooWide);
        }
        let expected = u64::from_str_radix(value, 16).map_err(|_| ParseReason::InvalidValue)?;
        self.matcher = Some(Matcher { range, expected });
        Ok(())
    }

    fn add_service(&mut self, range: FieldRange, token: &Token) -> Result<(), ParseReason> {
        if self.service.is_some() {
            return Err(ParseReason::DuplicateField);
        }
        big_endian_only(&range)?;
        if token.extra.is_some() {
            return Err(ParseReason::UnexpectedValue);
        }
        let value = token.value.ok_or(ParseReason::MissingValue)?;

        let uuid = if value.len() == 4 && is_hex(value) {
            let uuid = u16::from_str_radix(value, 16).map_err(|_| ParseReason::InvalidValue)?;
            ServiceUuid::Uuid16(uuid)
        } else if value.len() == 36 {
            let uuid = Uuid::parse_str(value).map_err(|_| ParseReason::InvalidValue)?;
            let mut air = *uuid.as_bytes();
            air.reverse();
            ServiceUuid::Uuid128(air)
        } else if is_hex(value) {
            return Err(ParseReason::HexLengthMismatch);
        } else {
            return Err(ParseReason::InvalidValue);
        };

        if range.width() != uuid.width() {
            return Err(ParseReason::HexLengthMismatch);
        }
        self.service = Some((uuid, range));
        Ok(())
    }

    fn add_power(&mut self, range: FieldRange, token: &Token) -> Result<(), ParseReason> {
        if self.power.is_some() {
            return Err(ParseReason::DuplicateField);
        }
        big_endian_only(&range)?;
        if token.value.is_some() {
            return Err(ParseReason::UnexpectedValue);
        }
        if range.width() > MAX_POWER_LEN {
            return Err(ParseReason::FieldTooWide);
        }
        let fixed = match token.extra {
            Some(extra) => Some(extra.parse::<i32>().map_err(|_| ParseReason::InvalidValue)?),
            None => None,
        };
        self.power = Some(PowerField { range, fixed });
        Ok(())
    }

    fn finish(self) -> Layout {
        let source = match self.service {
            Some((uuid, range)) => BeaconSource::ServiceData { uuid, range },
            None => BeaconSource::ManufacturerData,
        };
        Layout {
            matcher: self.matcher,
            source,
            identifiers: self.identifiers,
            data_fields: self.data_fields,
            power: self.power,
        }
    }
}

fn no_value(token: &Token) -> Result<(), ParseReason> {
    if token.value.is_some() || token.extra.is_some() {
        return Err(ParseReason::UnexpectedValue);
    }
    Ok(())
}

fn big_endian_only(range: &FieldRange) -> Result<(), ParseReason> {
    if range.little_endian {
        return Err(ParseReason::MalformedRange);
    }
    Ok(())
}
