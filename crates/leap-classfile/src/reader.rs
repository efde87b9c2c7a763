use crate::error::{Error, Result};

/// Big-endian cursor over class-file bytes.
pub(crate) struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub(crate) fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(Error::UnexpectedEof)?;
        let slice = self.bytes.get(self.pos..end).ok_or(Error::UnexpectedEof)?;
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn skip(&mut self, n: usize) -> Result<()> {
        self.read_bytes(n).map(|_| ())
    }

    pub(crate) fn read_u1(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub(crate) fn read_u2(&mut self) -> Result<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub(crate) fn read_u4(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn read_i2(&mut self) -> Result<i16> {
        Ok(self.read_u2()? as i16)
    }

    pub(crate) fn read_i4(&mut self) -> Result<i32> {
        Ok(self.read_u4()? as i32)
    }

    /// Skips padding until the position is a multiple of four.
    ///
    /// Switch instructions align their operands relative to the start of the
    /// method's code array, so the reader must be positioned over exactly that
    /// array.
    pub(crate) fn align4(&mut self) -> Result<()> {
        let pad = (4 - self.pos % 4) % 4;
        self.skip(pad)
    }

    pub(crate) fn ensure_empty(&self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Other("trailing bytes"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_big_endian_values() {
        let mut r = Reader::new(&[0x01, 0x02, 0xff, 0xfe, 0x00, 0x00, 0x00, 0x07]);
        assert_eq!(r.read_u2().unwrap(), 0x0102);
        assert_eq!(r.read_i2().unwrap(), -2);
        assert_eq!(r.read_i4().unwrap(), 7);
        assert!(r.is_empty());
        assert_eq!(r.read_u1(), Err(Error::UnexpectedEof));
    }

    #[test]
    fn align4_skips_to_next_word() {
        let mut r = Reader::new(&[0u8; 8]);
        r.skip(1).unwrap();
        r.align4().unwrap();
        assert_eq!(r.position(), 4);
        r.align4().unwrap();
        assert_eq!(r.position(), 4);
    }
}
