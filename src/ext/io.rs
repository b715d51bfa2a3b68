use crate::utils::struct_pack::{StructPack, StructUnpack};
use std::io::*;

/// Largest text a flagged length byte can describe.
pub const MAX_PSTRING_LEN: usize = 0x7F;

pub trait Peek {
    fn peek_extract_at(&mut self, offset: usize, buf: &mut [u8]) -> Result<()>;
    fn peek_i32_at(&mut self, offset: usize) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.peek_extract_at(offset, &mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    fn read_struct<T: StructUnpack>(&mut self) -> Result<T>;
    fn read_struct_vec<T: StructUnpack>(&mut self, count: usize) -> Result<Vec<T>> {
        let mut vec = Vec::with_capacity(count);
        for _ in 0..count {
            vec.push(self.read_struct()?);
        }
        Ok(vec)
    }
}

impl<T: Read + Seek> Peek for T {
    fn peek_extract_at(&mut self, offset: usize, buf: &mut [u8]) -> Result<()> {
        let current_pos = self.stream_position()?;
        self.seek(SeekFrom::Start(offset as u64))?;
        let re = self.read_exact(buf);
        self.seek(SeekFrom::Start(current_pos))?;
        re
    }

    fn read_struct<S: StructUnpack>(&mut self) -> Result<S> {
        S::unpack(self).map_err(|e| match e.downcast::<std::io::Error>() {
            Ok(io) => io,
            Err(e) => std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })
    }
}

pub trait ReadExt {
    fn read_u8(&mut self) -> Result<u8>;
    fn read_u32(&mut self) -> Result<u32>;
    fn read_i32(&mut self) -> Result<i32>;
    fn read_u64(&mut self) -> Result<u64>;

    /// Read a four byte tag.
    fn read_magic(&mut self) -> Result<[u8; 4]>;
    /// Read a flagged one-byte-length ASCII string.
    fn read_pstring(&mut self) -> Result<String>;
    /// Read a bit6 packed integer.
    fn read_packed_i32(&mut self) -> Result<i32>;

    fn read_exact_vec(&mut self, len: usize) -> Result<Vec<u8>>;
}

impl<T: Read> ReadExt for T {
    fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }
    fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }
    fn read_i32(&mut self) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }
    fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn read_magic(&mut self) -> Result<[u8; 4]> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read_pstring(&mut self) -> Result<String> {
        let flag = self.read_u8()?;
        if flag & 0x80 == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("String length byte {:#04x} does not have the flag bit set", flag),
            ));
        }
        let len = (flag & 0x7F) as usize;
        let buf = self.read_exact_vec(len)?;
        if !buf.is_ascii() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "String contains non-ASCII bytes",
            ));
        }
        String::from_utf8(buf).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    fn read_packed_i32(&mut self) -> Result<i32> {
        let first = self.read_u8()?;
        let negative = first & 0x80 != 0;
        let mut value = (first & 0x3F) as u64;
        let mut more = first & 0x40 != 0;
        let mut shift = 6;
        while more {
            if shift > 27 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "Packed integer is longer than five bytes",
                ));
            }
            let b = self.read_u8()?;
            value |= ((b & 0x7F) as u64) << shift;
            shift += 7;
            more = b & 0x80 != 0;
        }
        if negative {
            if value > 1 << 31 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Packed integer -{} does not fit in 32 bits", value),
                ));
            }
            Ok((value as i64).wrapping_neg() as i32)
        } else {
            i32::try_from(value).map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Packed integer {} does not fit in 32 bits", value),
                )
            })
        }
    }

    fn read_exact_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }
}

pub trait WriteExt {
    fn write_u8(&mut self, value: u8) -> Result<()>;
    fn write_u32(&mut self, value: u32) -> Result<()>;
    fn write_i32(&mut self, value: i32) -> Result<()>;
    fn write_u64(&mut self, value: u64) -> Result<()>;

    /// Write a flagged one-byte-length ASCII string.
    ///
    /// Fails for text longer than [MAX_PSTRING_LEN] bytes or non-ASCII text.
    fn write_pstring(&mut self, value: &str) -> Result<()>;
    /// Write a bit6 packed integer.
    fn write_packed_i32(&mut self, value: i32) -> Result<()>;

    fn write_struct<T: StructPack>(&mut self, value: &T) -> Result<()>;
}

impl<T: Write> WriteExt for T {
    fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_all(&value.to_le_bytes())
    }
    fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_all(&value.to_le_bytes())
    }
    fn write_i32(&mut self, value: i32) -> Result<()> {
        self.write_all(&value.to_le_bytes())
    }
    fn write_u64(&mut self, value: u64) -> Result<()> {
        self.write_all(&value.to_le_bytes())
    }

    fn write_pstring(&mut self, value: &str) -> Result<()> {
        if !value.is_ascii() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("String {:?} is not ASCII", value),
            ));
        }
        let len = value.len();
        if len > MAX_PSTRING_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "String length {} exceeds the maximum of {}",
                    len, MAX_PSTRING_LEN
                ),
            ));
        }
        self.write_u8(len as u8 | 0x80)?;
        self.write_all(value.as_bytes())
    }

    fn write_packed_i32(&mut self, value: i32) -> Result<()> {
        let magnitude = value.unsigned_abs();
        let mut first = (magnitude & 0x3F) as u8;
        if value < 0 {
            first |= 0x80;
        }
        let mut rest = magnitude >> 6;
        if rest != 0 {
            first |= 0x40;
        }
        self.write_u8(first)?;
        while rest != 0 {
            let mut b = (rest & 0x7F) as u8;
            rest >>= 7;
            if rest != 0 {
                b |= 0x80;
            }
            self.write_u8(b)?;
        }
        Ok(())
    }

    fn write_struct<S: StructPack>(&mut self, value: &S) -> Result<()> {
        value.pack(self).map_err(|e| match e.downcast::<std::io::Error>() {
            Ok(io) => io,
            Err(e) => std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })
    }
}

pub struct MemReaderRef<'a> {
    pub data: &'a [u8],
    pub pos: usize,
}

impl std::fmt::Debug for MemReaderRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemReaderRef")
            .field("pos", &self.pos)
            .field("data_length", &self.data.len())
            .finish_non_exhaustive()
    }
}

impl<'a> MemReaderRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        MemReaderRef { data, pos: 0 }
    }

    /// Whether every byte has been consumed.
    pub fn is_eof(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Unread bytes after the current position.
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }
}

fn seek_in(len: usize, current: usize, pos: SeekFrom) -> Result<usize> {
    let new_pos = match pos {
        SeekFrom::Start(offset) => offset as i128,
        SeekFrom::End(offset) => len as i128 + offset as i128,
        SeekFrom::Current(offset) => current as i128 + offset as i128,
    };
    if new_pos < 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "Seek resulted in negative position",
        ));
    }
    if new_pos > len as i128 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "Seek position is beyond the end of the data",
        ));
    }
    Ok(new_pos as usize)
}

impl<'a> Read for MemReaderRef<'a> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.pos >= self.data.len() {
            return Ok(0);
        }
        let bytes_to_read = buf.len().min(self.data.len() - self.pos);
        buf[..bytes_to_read].copy_from_slice(&self.data[self.pos..self.pos + bytes_to_read]);
        self.pos += bytes_to_read;
        Ok(bytes_to_read)
    }
}

impl<'a> Seek for MemReaderRef<'a> {
    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.pos = seek_in(self.data.len(), self.pos, pos)?;
        Ok(self.pos as u64)
    }

    fn stream_position(&mut self) -> Result<u64> {
        Ok(self.pos as u64)
    }

    fn rewind(&mut self) -> Result<()> {
        self.pos = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    fn packed_bytes(value: i32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_packed_i32(value).unwrap();
        buf
    }

    #[test]
    fn test_pstring_layout() {
        let mut buf = Vec::new();
        buf.write_pstring("TPP").unwrap();
        assert_eq!(buf, vec![0x83, b'T', b'P', b'P']);
        let mut reader = MemReaderRef::new(&buf);
        assert_eq!(reader.read_pstring().unwrap(), "TPP");
        assert!(reader.is_eof());
    }

    #[test]
    fn test_pstring_rejects_missing_flag() {
        let data = [0x03, b'a', b'b', b'c'];
        let err = MemReaderRef::new(&data).read_pstring().unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_pstring_length_limit() {
        let mut buf = Vec::new();
        buf.write_pstring(&"a".repeat(127)).unwrap();
        assert_eq!(buf[0], 0xFF);
        let mut buf = Vec::new();
        let err = buf.write_pstring(&"a".repeat(128)).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_pstring_truncated() {
        let data = [0x85, b'a', b'b'];
        let err = MemReaderRef::new(&data).read_pstring().unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_packed_layout() {
        assert_eq!(packed_bytes(0), vec![0x00]);
        assert_eq!(packed_bytes(5), vec![0x05]);
        assert_eq!(packed_bytes(63), vec![0x3F]);
        assert_eq!(packed_bytes(64), vec![0x40, 0x01]);
        assert_eq!(packed_bytes(-1), vec![0x81]);
        assert_eq!(packed_bytes(300), vec![0x6C, 0x04]);
    }

    #[test]
    fn test_packed_rejects_overlong() {
        let data = [0x40, 0x80, 0x80, 0x80, 0x80, 0x01];
        let err = MemReaderRef::new(&data).read_packed_i32().unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_packed_extremes() {
        for v in [i32::MIN, i32::MAX, i32::MIN + 1] {
            let buf = packed_bytes(v);
            assert_eq!(MemReaderRef::new(&buf).read_packed_i32().unwrap(), v);
        }
    }

    #[quickcheck]
    fn packed_roundtrip(value: i32) -> bool {
        let buf = packed_bytes(value);
        let mut reader = MemReaderRef::new(&buf);
        reader.read_packed_i32().unwrap() == value && reader.is_eof()
    }

    #[quickcheck]
    fn pstring_roundtrip(value: String) -> bool {
        let value: String = value.chars().filter(|c| c.is_ascii()).take(127).collect();
        let mut buf = Vec::new();
        buf.write_pstring(&value).unwrap();
        MemReaderRef::new(&buf).read_pstring().unwrap() == value
    }

    #[test]
    fn test_peek_keeps_position() {
        let data = [1u8, 0, 0, 0, 2, 0, 0, 0];
        let mut reader = MemReaderRef::new(&data);
        assert_eq!(reader.peek_i32_at(4).unwrap(), 2);
        assert_eq!(reader.read_i32().unwrap(), 1);
        assert!(reader.peek_i32_at(6).is_err());
        assert_eq!(reader.pos, 4);
    }
}
