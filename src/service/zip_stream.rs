//! Streaming single-entry ZIP encoder.
//!
//! The entry is written with general-purpose flag bit 3 set, so sizes and
//! CRC follow the compressed data in a data descriptor and nothing has to
//! be seeked back to. Output is produced incrementally: callers push
//! uncompressed chunks with [`ZipStream::write`] and drain whatever
//! compressed bytes are ready with [`ZipStream::take_output`].
//!
//! Entries larger than 4 GiB are rejected; ZIP64 records are not emitted.

use std::io::Write;

use chrono::{DateTime, Datelike, Timelike, Utc};
use flate2::Compression;
use flate2::write::DeflateEncoder;

use crate::error::GatewayError;

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const DATA_DESCRIPTOR_SIG: u32 = 0x0807_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const END_OF_CENTRAL_DIR_SIG: u32 = 0x0605_4b50;

const VERSION: u16 = 20;
const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
const METHOD_DEFLATE: u16 = 8;

/// Size of the fixed part of a local file header.
pub const LOCAL_HEADER_LEN: usize = 30;

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// MS-DOS `(time, date)` pair. Dates before 1980 clamp to 1980-01-01.
fn dos_datetime(at: DateTime<Utc>) -> (u16, u16) {
    if at.year() < 1980 {
        return (0, (1 << 5) | 1);
    }
    let time = (at.hour() << 11) | (at.minute() << 5) | (at.second() / 2);
    let year = u32::try_from(at.year() - 1980).unwrap_or(0).min(127);
    let date = (year << 9) | (at.month() << 5) | at.day();
    (
        u16::try_from(time).unwrap_or(0),
        u16::try_from(date).unwrap_or(0),
    )
}

fn too_large() -> GatewayError {
    GatewayError::Internal("archive entry exceeds 4 GiB".to_string())
}

fn io_error(e: &std::io::Error) -> GatewayError {
    GatewayError::Internal(format!("deflate failed: {e}"))
}

/// Encoder for a ZIP archive holding exactly one deflated entry.
pub struct ZipStream {
    name: Vec<u8>,
    time: u16,
    date: u16,
    encoder: DeflateEncoder<Vec<u8>>,
    crc: crc32fast::Hasher,
    uncompressed: u64,
    compressed: u64,
    pending: Vec<u8>,
}

impl std::fmt::Debug for ZipStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipStream")
            .field("name", &String::from_utf8_lossy(&self.name))
            .field("uncompressed", &self.uncompressed)
            .field("compressed", &self.compressed)
            .finish_non_exhaustive()
    }
}

impl ZipStream {
    /// Starts an archive with one entry called `entry_name`.
    ///
    /// The local file header is emitted immediately.
    #[must_use]
    pub fn new(entry_name: &str, modified: DateTime<Utc>) -> Self {
        let (time, date) = dos_datetime(modified);
        let name = entry_name.as_bytes().to_vec();
        let mut pending = Vec::with_capacity(LOCAL_HEADER_LEN + name.len());
        put_u32(&mut pending, LOCAL_HEADER_SIG);
        put_u16(&mut pending, VERSION);
        put_u16(&mut pending, FLAG_DATA_DESCRIPTOR);
        put_u16(&mut pending, METHOD_DEFLATE);
        put_u16(&mut pending, time);
        put_u16(&mut pending, date);
        put_u32(&mut pending, 0);
        put_u32(&mut pending, 0);
        put_u32(&mut pending, 0);
        put_u16(&mut pending, u16::try_from(name.len()).unwrap_or(u16::MAX));
        put_u16(&mut pending, 0);
        pending.extend_from_slice(&name);

        Self {
            name,
            time,
            date,
            encoder: DeflateEncoder::new(Vec::new(), Compression::default()),
            crc: crc32fast::Hasher::new(),
            uncompressed: 0,
            compressed: 0,
            pending,
        }
    }

    /// Compresses one chunk of entry data.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Internal`] if the entry grows past 4 GiB.
    pub fn write(&mut self, data: &[u8]) -> Result<(), GatewayError> {
        self.crc.update(data);
        self.uncompressed += data.len() as u64;
        if self.uncompressed > u64::from(u32::MAX) {
            return Err(too_large());
        }
        self.encoder.write_all(data).map_err(|e| io_error(&e))?;
        self.drain_encoder();
        Ok(())
    }

    /// Takes the archive bytes produced so far.
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pending)
    }

    /// Uncompressed bytes written so far.
    #[must_use]
    pub const fn uncompressed_len(&self) -> u64 {
        self.uncompressed
    }

    fn drain_encoder(&mut self) {
        let produced = std::mem::take(self.encoder.get_mut());
        self.compressed += produced.len() as u64;
        self.pending.extend_from_slice(&produced);
    }

    /// Flushes the compressor and appends the data descriptor, central
    /// directory and end record. Returns every byte not yet taken.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Internal`] if the compressor fails or the
    /// archive exceeds 4 GiB.
    pub fn finish(mut self) -> Result<Vec<u8>, GatewayError> {
        let tail = self.encoder.finish().map_err(|e| io_error(&e))?;
        self.compressed += tail.len() as u64;
        self.pending.extend_from_slice(&tail);

        let crc = self.crc.finalize();
        let compressed = u32::try_from(self.compressed).map_err(|_| too_large())?;
        let uncompressed = u32::try_from(self.uncompressed).map_err(|_| too_large())?;
        let name_len = u16::try_from(self.name.len()).unwrap_or(u16::MAX);

        let out = &mut self.pending;
        put_u32(out, DATA_DESCRIPTOR_SIG);
        put_u32(out, crc);
        put_u32(out, compressed);
        put_u32(out, uncompressed);

        let central_offset = (LOCAL_HEADER_LEN + self.name.len()) as u64
            + self.compressed
            + 16;
        let central_offset = u32::try_from(central_offset).map_err(|_| too_large())?;

        let central_start = out.len();
        put_u32(out, CENTRAL_HEADER_SIG);
        put_u16(out, VERSION);
        put_u16(out, VERSION);
        put_u16(out, FLAG_DATA_DESCRIPTOR);
        put_u16(out, METHOD_DEFLATE);
        put_u16(out, self.time);
        put_u16(out, self.date);
        put_u32(out, crc);
        put_u32(out, compressed);
        put_u32(out, uncompressed);
        put_u16(out, name_len);
        put_u16(out, 0);
        put_u16(out, 0);
        put_u16(out, 0);
        put_u16(out, 0);
        put_u32(out, 0);
        put_u32(out, 0);
        out.extend_from_slice(&self.name);
        let central_len = u32::try_from(out.len() - central_start).map_err(|_| too_large())?;

        put_u32(out, END_OF_CENTRAL_DIR_SIG);
        put_u16(out, 0);
        put_u16(out, 0);
        put_u16(out, 1);
        put_u16(out, 1);
        put_u32(out, central_len);
        put_u32(out, central_offset);
        put_u16(out, 0);

        Ok(self.pending)
    }
}
