//! Minimal little-endian byte cursor for packing and unpacking snapshot
//! component blobs, without pulling in a serialization crate for what is
//! a handful of fixed-width fields per component.

pub struct ByteCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn take_u8(&mut self) -> Option<u8> {
        let b = *self.bytes.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    pub fn take_bool(&mut self) -> Option<bool> {
        Some(self.take_u8()? != 0)
    }

    pub fn take_u16(&mut self) -> Option<u16> {
        let slice = self.bytes.get(self.pos..self.pos + 2)?;
        self.pos += 2;
        Some(u16::from_le_bytes(slice.try_into().unwrap()))
    }

    pub fn take_u32(&mut self) -> Option<u32> {
        let slice = self.bytes.get(self.pos..self.pos + 4)?;
        self.pos += 4;
        Some(u32::from_le_bytes(slice.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_mixed_width_fields() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0xaau8.to_le_bytes());
        buf.extend_from_slice(&0xbeefu16.to_le_bytes());
        buf.extend_from_slice(&0xdead_beefu32.to_le_bytes());
        let mut cursor = ByteCursor::new(&buf);
        assert_eq!(cursor.take_u8(), Some(0xaa));
        assert_eq!(cursor.take_u16(), Some(0xbeef));
        assert_eq!(cursor.take_u32(), Some(0xdead_beef));
    }

    #[test]
    fn truncated_buffer_yields_none_rather_than_panicking() {
        let mut cursor = ByteCursor::new(&[1, 2]);
        assert_eq!(cursor.take_u32(), None);
    }
}
