//! Firmware image loading.
//!
//! An image is either decoded from an Intel-HEX text file or wrapped from a
//! raw binary blob (the embedded bootloader payloads). Decoding is strict:
//! a record whose checksum byte does not bring the record sum to zero mod
//! 256 aborts the whole load, as does any malformed line. Only data,
//! end-of-file, and extended segment/linear address records affect the
//! image; start-address records are ignored.

use std::fs;
use std::path::Path;

use ihex::Record;
use log::debug;

use crate::error::{Error, Result};

/// Fill byte for address gaps between records (erased NOR flash).
const GAP_FILL: u8 = 0xFF;

/// A contiguous firmware image with a known base address.
///
/// Built once per flashing operation and immutable thereafter. Gaps between
/// decoded records read as `0xFF` so chunked transfers can stream the image
/// without sparse bookkeeping.
#[derive(Debug, Clone)]
pub struct HexImage {
    start: u32,
    data: Vec<u8>,
}

impl HexImage {
    /// Decode an Intel-HEX file into an image.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let image = Self::parse(&text)?;
        debug!(
            "loaded {}: {} bytes at 0x{:08X}",
            path.as_ref().display(),
            image.total_length(),
            image.start_address()
        );
        Ok(image)
    }

    /// Decode Intel-HEX text into an image.
    pub fn parse(text: &str) -> Result<Self> {
        let mut base: u32 = 0;
        let mut writes: Vec<(u32, Vec<u8>)> = Vec::new();

        for record in ihex::Reader::new(text) {
            let record = record.map_err(|e| Error::Parse(e.to_string()))?;
            match record {
                Record::Data { offset, value } => {
                    writes.push((base + u32::from(offset), value));
                }
                Record::EndOfFile => break,
                Record::ExtendedSegmentAddress(segment) => {
                    base = u32::from(segment) * 16;
                }
                Record::ExtendedLinearAddress(upper) => {
                    base = u32::from(upper) << 16;
                }
                Record::StartSegmentAddress { .. } | Record::StartLinearAddress(_) => {}
            }
        }

        if writes.is_empty() {
            return Err(Error::Parse("no data records".into()));
        }

        Self::merge(writes)
    }

    /// Wrap an already-linked raw binary blob at the given base address.
    /// The caller guarantees contiguity; nothing is parsed.
    pub fn load_data(bytes: &[u8], base: u32) -> Self {
        HexImage {
            start: base,
            data: bytes.to_vec(),
        }
    }

    fn merge(mut writes: Vec<(u32, Vec<u8>)>) -> Result<Self> {
        writes.sort_by_key(|(addr, _)| *addr);

        let start = writes[0].0;
        let end = writes
            .iter()
            .map(|(addr, bytes)| addr + bytes.len() as u32)
            .max()
            .unwrap_or(start);

        let mut data = vec![GAP_FILL; (end - start) as usize];
        for (addr, bytes) in writes {
            let lo = (addr - start) as usize;
            data[lo..lo + bytes.len()].copy_from_slice(&bytes);
        }

        Ok(HexImage { start, data })
    }

    /// Lowest written absolute address.
    pub fn start_address(&self) -> u32 {
        self.start
    }

    /// Highest written offset minus lowest, inclusive.
    pub fn total_length(&self) -> u32 {
        self.data.len() as u32
    }

    /// Read up to `len` bytes of the assembled image starting at `offset`.
    /// Returns an empty slice past the end of the image.
    pub fn chunk(&self, offset: u32, len: usize) -> &[u8] {
        let lo = (offset as usize).min(self.data.len());
        let hi = (lo + len).min(self.data.len());
        &self.data[lo..hi]
    }
}
