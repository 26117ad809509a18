//! Binary stream: one framed message of the vbot RPC protocol.
//!
//! # Layout
//!
//! ```text
//! offset  0   version        u8   (always 1)
//! offset  2   kind           u8   (StreamKind)
//! offset  4   total length   u32  LE, header included
//! offset  8   checksum       [u8; 8] XOR fold of the whole frame
//! offset 50   callback id    u64  LE
//! offset 60   body           tagged values, back to back
//! ```
//!
//! The read and write cursors are independent. Writes append at the end of
//! the buffer; reads advance the read cursor and roll back on failure.
//! See [`write`] and [`read`] for the value encoding.

mod read;
mod write;

use crate::error::CodecError;
use crate::message::StreamKind;

pub const STREAM_VERSION: u8 = 1;

const POS_VERSION: usize = 0;
const POS_KIND: usize = 2;
const POS_LENGTH: usize = 4;
const POS_CHECKSUM: usize = 8;
const POS_CALLBACK_ID: usize = 50;

/// Offset of the first body byte.
pub const BODY_POS: usize = 60;

/// Maximum nesting of arrays and maps, on write and on read.
pub const MAX_DEPTH: usize = 64;

/// One encoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    /// Header and body. `data.len()` is the write position.
    data: Vec<u8>,
    read_pos: usize,
}

impl Default for Stream {
    fn default() -> Self {
        Self::new()
    }
}

impl Stream {
    /// An empty stream: zeroed header with the version set, empty body.
    pub fn new() -> Self {
        let mut data = Vec::with_capacity(1024);
        data.resize(BODY_POS, 0);
        data[POS_VERSION] = STREAM_VERSION;
        Self {
            data,
            read_pos: BODY_POS,
        }
    }

    /// An empty stream of the given kind.
    pub fn with_kind(kind: StreamKind) -> Self {
        let mut stream = Self::new();
        stream.set_kind(kind);
        stream
    }

    /// Wrap received bytes. The read cursor starts at the body.
    ///
    /// Fails if the bytes are too short to hold a header. Integrity is not
    /// checked here; call [`Stream::check`].
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self, CodecError> {
        let data = bytes.into();
        if data.len() < BODY_POS {
            return Err(CodecError::Malformed(data.len()));
        }
        Ok(Self {
            data,
            read_pos: BODY_POS,
        })
    }

    // ── Header ───────────────────────────────────────────────────

    pub fn version(&self) -> u8 {
        self.data[POS_VERSION]
    }

    /// The raw kind byte.
    pub fn raw_kind(&self) -> u8 {
        self.data[POS_KIND]
    }

    pub fn kind(&self) -> Result<StreamKind, CodecError> {
        StreamKind::try_from(self.raw_kind())
    }

    pub fn set_kind(&mut self, kind: StreamKind) {
        self.data[POS_KIND] = kind as u8;
    }

    pub fn callback_id(&self) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.data[POS_CALLBACK_ID..POS_CALLBACK_ID + 8]);
        u64::from_le_bytes(raw)
    }

    pub fn set_callback_id(&mut self, id: u64) {
        self.data[POS_CALLBACK_ID..POS_CALLBACK_ID + 8].copy_from_slice(&id.to_le_bytes());
    }

    fn length_field(&self) -> u32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.data[POS_LENGTH..POS_LENGTH + 4]);
        u32::from_le_bytes(raw)
    }

    // ── Integrity ────────────────────────────────────────────────

    /// XOR of every 8-byte block of the frame, zero padded.
    fn fold(&self) -> [u8; 8] {
        let mut ret = [0u8; 8];
        for (i, b) in self.data.iter().enumerate() {
            ret[i % 8] ^= b;
        }
        ret
    }

    /// Stamp the total length and checksum into the header.
    ///
    /// Must be called after the last write and before the bytes leave the
    /// process.
    pub fn build_check(&mut self) {
        let length = u32::try_from(self.data.len()).unwrap_or(u32::MAX);
        self.data[POS_LENGTH..POS_LENGTH + 4].copy_from_slice(&length.to_le_bytes());
        self.data[POS_CHECKSUM..POS_CHECKSUM + 8].fill(0);
        let sum = self.fold();
        self.data[POS_CHECKSUM..POS_CHECKSUM + 8].copy_from_slice(&sum);
    }

    /// Verify the length field and checksum stamped by [`Stream::build_check`].
    pub fn check(&self) -> bool {
        self.length_field() as usize == self.data.len() && self.fold() == [0u8; 8]
    }

    // ── Cursors ──────────────────────────────────────────────────

    pub fn read_pos(&self) -> usize {
        self.read_pos
    }

    /// Move the read cursor. Fails outside `[BODY_POS, write_pos]`.
    pub fn set_read_pos(&mut self, pos: usize) -> bool {
        if (BODY_POS..=self.data.len()).contains(&pos) {
            self.read_pos = pos;
            true
        } else {
            false
        }
    }

    /// Rewind the read cursor to the start of the body.
    pub fn rewind(&mut self) {
        self.read_pos = BODY_POS;
    }

    pub fn write_pos(&self) -> usize {
        self.data.len()
    }

    /// Move the write cursor, truncating or zero-extending the body.
    ///
    /// Fails below `BODY_POS`. The read cursor is clamped to the new end.
    pub fn set_write_pos(&mut self, pos: usize) -> bool {
        if pos < BODY_POS {
            return false;
        }
        self.data.resize(pos, 0);
        self.read_pos = self.read_pos.min(pos);
        true
    }

    pub fn can_read(&self) -> bool {
        self.read_pos < self.data.len()
    }

    pub fn is_read_finish(&self) -> bool {
        self.read_pos == self.data.len()
    }

    /// The whole frame, header included.
    pub fn buffer(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Append raw bytes at the write cursor.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }
}
