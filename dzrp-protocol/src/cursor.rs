//! Field-level readers and writers for DZRP payloads

use crate::ProtocolError;

/// Sequential reader over a request payload.
///
/// Every read is bounds checked; reading past the end is a protocol error
/// rather than a silent zero.
#[derive(Debug)]
pub struct PayloadReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        PayloadReader { data, pos: 0 }
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < n {
            return Err(ProtocolError::Underrun {
                wanted: n,
                remaining: self.remaining(),
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    /// Read a 16-bit address followed by its bank byte, giving `bank << 16 | addr`.
    ///
    /// The bank byte is already biased by one on the wire: 0 means "no bank".
    pub fn read_long_address(&mut self) -> Result<i32, ProtocolError> {
        let addr = self.read_u16()? as i32;
        let bank = self.read_u8()? as i32;
        Ok((bank << 16) | addr)
    }

    /// Read a NUL-terminated string. A missing terminator consumes the rest.
    pub fn read_string(&mut self) -> Result<String, ProtocolError> {
        let rest = &self.data[self.pos..];
        let (text, used) = match rest.iter().position(|&b| b == 0) {
            Some(nul) => (&rest[..nul], nul + 1),
            None => (rest, rest.len()),
        };
        self.pos += used;
        Ok(String::from_utf8_lossy(text).into_owned())
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        self.take(n)
    }

    /// Consume and return everything left
    pub fn read_remaining(&mut self) -> &'a [u8] {
        let out = &self.data[self.pos..];
        self.pos = self.data.len();
        out
    }
}

/// Builder for response and notification payloads.
///
/// Created with the exact payload size the handler computed up front.
#[derive(Debug)]
pub struct PayloadWriter {
    buf: Vec<u8>,
    expected: usize,
}

impl PayloadWriter {
    pub fn with_len(len: usize) -> Self {
        PayloadWriter {
            buf: Vec::with_capacity(len),
            expected: len,
        }
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Write a long address as `addrLo, addrHi, bank`
    pub fn write_long_address(&mut self, long_address: i32) -> &mut Self {
        self.write_u16((long_address & 0xFFFF) as u16);
        self.write_u8(((long_address >> 16) & 0xFF) as u8)
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(data);
        self
    }

    /// Write ASCII text followed by a NUL terminator
    pub fn write_string(&mut self, text: &str) -> &mut Self {
        self.buf
            .extend(text.bytes().map(|b| if b.is_ascii() && b != 0 { b } else { b'?' }));
        self.buf.push(0);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        debug_assert_eq!(self.buf.len(), self.expected, "payload size mismatch");
        self.buf
    }
}

/// Length of `text` once written with [`PayloadWriter::write_string`]
pub fn string_len(text: &str) -> usize {
    text.len() + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_fields() {
        let data = [0x07, 0x34, 0x12, 0x00, 0x80, 0x03, b'h', b'i', 0, 0xAA, 0xBB];
        let mut r = PayloadReader::new(&data);
        assert_eq!(r.read_u8().unwrap(), 7);
        assert_eq!(r.read_u16().unwrap(), 0x1234);
        assert_eq!(r.read_long_address().unwrap(), 0x03_8000);
        assert_eq!(r.read_string().unwrap(), "hi");
        assert_eq!(r.remaining(), 2);
        assert_eq!(r.read_remaining(), &[0xAA, 0xBB]);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_reader_underrun() {
        let data = [0x01];
        let mut r = PayloadReader::new(&data);
        assert!(matches!(
            r.read_u16(),
            Err(ProtocolError::Underrun {
                wanted: 2,
                remaining: 1
            })
        ));
    }

    #[test]
    fn test_reader_unterminated_string() {
        let data = [b'a', b'b'];
        let mut r = PayloadReader::new(&data);
        assert_eq!(r.read_string().unwrap(), "ab");
        assert_eq!(r.remaining(), 0);
        assert_eq!(r.read_string().unwrap(), "");
    }

    #[test]
    fn test_writer_exact_len() {
        let name = "next";
        let mut w = PayloadWriter::with_len(1 + 2 + 3 + string_len(name));
        w.write_u8(0)
            .write_u16(0xBEEF)
            .write_long_address(0x05_4000)
            .write_string(name);
        assert_eq!(
            w.finish(),
            vec![0, 0xEF, 0xBE, 0x00, 0x40, 0x05, b'n', b'e', b'x', b't', 0]
        );
    }
}
