/// BLE advertisement data walker.
///
/// AD structure format: [length] [type] [data...]
/// `length` counts the type byte plus the data bytes. A zero length byte
/// terminates the advertisement (controllers zero-pad legacy payloads).
/// Types the decoder cares about:
///   0x16 = Service Data, 16-bit UUID (first 2 data bytes = UUID, little-endian)
///   0x21 = Service Data, 128-bit UUID (first 16 data bytes = UUID, little-endian)
///   0xFF = Manufacturer specific data (first 2 bytes = company ID, little-endian)

/// AD type: Service Data with a 16-bit UUID
pub const AD_TYPE_SERVICE_DATA_16: u8 = 0x16;
/// AD type: Service Data with a 128-bit UUID
pub const AD_TYPE_SERVICE_DATA_128: u8 = 0x21;
/// AD type: Manufacturer specific data
pub const AD_TYPE_MANUFACTURER_DATA: u8 = 0xFF;

/// One `{length, type, payload}` element of an advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdStructure<'a> {
    pub ad_type: u8,
    /// Everything after the length and type bytes.
    pub data: &'a [u8],
}

impl AdStructure<'_> {
    /// Company ID of a manufacturer data structure.
    pub fn company_id(&self) -> Option<u16> {
        if self.ad_type != AD_TYPE_MANUFACTURER_DATA || self.data.len() < 2 {
            return None;
        }
        Some(u16::from_le_bytes([self.data[0], self.data[1]]))
    }
}

/// Iterator over the AD structures of a raw advertisement.
///
/// Stops at the end of the buffer, at a zero length byte, or at a structure
/// whose declared length runs past the buffer. Never panics on foreign input.
#[derive(Debug, Clone)]
pub struct AdStructures<'a> {
    ad_data: &'a [u8],
    pos: usize,
}

impl<'a> AdStructures<'a> {
    pub const fn new(ad_data: &'a [u8]) -> Self {
        Self { ad_data, pos: 0 }
    }
}

impl<'a> Iterator for AdStructures<'a> {
    type Item = AdStructure<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let ad_data = self.ad_data;
        if self.pos >= ad_data.len() {
            return None;
        }

        let len = ad_data[self.pos] as usize;
        if len == 0 || self.pos + 1 + len > ad_data.len() {
            self.pos = ad_data.len();
            return None;
        }

        let ad_type = ad_data[self.pos + 1];
        let data = &ad_data[self.pos + 2..self.pos + 1 + len];
        self.pos += 1 + len;

        Some(AdStructure { ad_type, data })
    }
}

/// Walk the AD structures of `ad_data`.
pub fn ad_structures(ad_data: &[u8]) -> AdStructures<'_> {
    AdStructures::new(ad_data)
}
