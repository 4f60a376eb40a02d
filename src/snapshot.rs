//! Snapshot serialization: a fixed 16-byte header followed by
//! dependency-ordered component blobs.
//!
//! The header carries a magic tag, a three-part version, a beta flag, and
//! the serialized payload's raw length, so a stream can be rejected before
//! any component tries to parse bytes that don't belong to it.

use crate::error::{CoreError, CoreResult, SnapshotMismatchReason};

const MAGIC: &[u8; 6] = b"VASNAP";
const VERSION: (u8, u8, u8) = (1, 0, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub major: u8,
    pub minor: u8,
    pub subminor: u8,
    pub beta: bool,
    pub raw_size: u32,
}

impl SnapshotHeader {
    #[must_use]
    pub fn current(raw_size: u32) -> Self {
        Self { major: VERSION.0, minor: VERSION.1, subminor: VERSION.2, beta: false, raw_size }
    }

    #[must_use]
    pub fn to_bytes(self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[0..6].copy_from_slice(MAGIC);
        buf[6] = self.major;
        buf[7] = self.minor;
        buf[8] = self.subminor;
        buf[9] = u8::from(self.beta);
        buf[12..16].copy_from_slice(&self.raw_size.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() < 16 {
            return Err(CoreError::SnapshotMismatch { reason: SnapshotMismatchReason::Corrupted });
        }
        if &bytes[0..6] != MAGIC {
            return Err(CoreError::SnapshotMismatch { reason: SnapshotMismatchReason::BadMagic });
        }
        let (major, minor, subminor) = (bytes[6], bytes[7], bytes[8]);
        let beta = bytes[9] != 0;
        if beta {
            return Err(CoreError::SnapshotMismatch { reason: SnapshotMismatchReason::Beta });
        }
        if major > VERSION.0 {
            return Err(CoreError::SnapshotMismatch { reason: SnapshotMismatchReason::TooNew });
        }
        if major < VERSION.0 {
            return Err(CoreError::SnapshotMismatch { reason: SnapshotMismatchReason::TooOld });
        }
        let raw_size = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
        Ok(Self { major, minor, subminor, beta, raw_size })
    }
}

/// A named, length-prefixed component blob within the payload, restored in
/// the same dependency order it was written (memory before register file
/// before the coprocessors that reference chip RAM addresses).
pub struct ComponentBlob<'a> {
    pub name: &'static str,
    pub bytes: &'a [u8],
}

/// Serialize a sequence of component blobs into one snapshot stream.
#[must_use]
pub fn write_snapshot(components: &[ComponentBlob<'_>]) -> Vec<u8> {
    let mut payload = Vec::new();
    for component in components {
        payload.extend_from_slice(&(component.name.len() as u32).to_le_bytes());
        payload.extend_from_slice(component.name.as_bytes());
        payload.extend_from_slice(&(component.bytes.len() as u32).to_le_bytes());
        payload.extend_from_slice(component.bytes);
    }
    let header = SnapshotHeader::current(payload.len() as u32);
    let mut out = header.to_bytes().to_vec();
    out.extend_from_slice(&payload);
    out
}

/// Validate the header and split the payload into its component blobs, in
/// the order they were written.
pub fn read_snapshot(stream: &[u8]) -> CoreResult<Vec<(String, Vec<u8>)>> {
    let header = SnapshotHeader::from_bytes(stream)?;
    let payload = &stream[16..];
    if payload.len() != header.raw_size as usize {
        return Err(CoreError::SnapshotMismatch { reason: SnapshotMismatchReason::Corrupted });
    }
    let mut components = Vec::new();
    let mut cursor = 0usize;
    while cursor < payload.len() {
        let name_len = read_u32(payload, cursor)? as usize;
        cursor += 4;
        let name = String::from_utf8(payload[cursor..cursor + name_len].to_vec())
            .map_err(|_| CoreError::SnapshotMismatch { reason: SnapshotMismatchReason::Corrupted })?;
        cursor += name_len;
        let blob_len = read_u32(payload, cursor)? as usize;
        cursor += 4;
        let bytes = payload[cursor..cursor + blob_len].to_vec();
        cursor += blob_len;
        components.push((name, bytes));
    }
    Ok(components)
}

fn read_u32(payload: &[u8], at: usize) -> CoreResult<u32> {
    payload
        .get(at..at + 4)
        .map(|b| u32::from_le_bytes(b.try_into().unwrap()))
        .ok_or(CoreError::SnapshotMismatch { reason: SnapshotMismatchReason::Corrupted })
}
