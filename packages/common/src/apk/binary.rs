//! Little-endian chunk primitives shared by the binary XML and resource table readers.

use super::error::ApkError;

pub const RES_STRING_POOL_TYPE: u16 = 0x0001;
pub const RES_TABLE_TYPE: u16 = 0x0002;
pub const RES_XML_TYPE: u16 = 0x0003;
pub const RES_XML_START_NAMESPACE_TYPE: u16 = 0x0100;
pub const RES_XML_END_NAMESPACE_TYPE: u16 = 0x0101;
pub const RES_XML_START_ELEMENT_TYPE: u16 = 0x0102;
pub const RES_XML_END_ELEMENT_TYPE: u16 = 0x0103;
pub const RES_XML_RESOURCE_MAP_TYPE: u16 = 0x0180;
pub const RES_TABLE_PACKAGE_TYPE: u16 = 0x0200;
pub const RES_TABLE_TYPE_TYPE: u16 = 0x0201;
pub const RES_TABLE_TYPE_SPEC_TYPE: u16 = 0x0202;

/// Sentinel for "no string" / "no entry".
pub const NO_INDEX: u32 = 0xFFFF_FFFF;

const UTF8_FLAG: u32 = 1 << 8;

pub fn read_u8(data: &[u8], off: usize) -> Result<u8, ApkError> {
    data.get(off).copied().ok_or(ApkError::Truncated(off))
}

pub fn read_u16(data: &[u8], off: usize) -> Result<u16, ApkError> {
    let bytes = data.get(off..off + 2).ok_or(ApkError::Truncated(off))?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

pub fn read_u32(data: &[u8], off: usize) -> Result<u32, ApkError> {
    let bytes = data.get(off..off + 4).ok_or(ApkError::Truncated(off))?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// `ResChunk_header`: every chunk starts with its type, header size and total size.
#[derive(Debug, Clone, Copy)]
pub struct ChunkHeader {
    pub offset: usize,
    pub chunk_type: u16,
    pub header_size: usize,
    pub size: usize,
}

impl ChunkHeader {
    pub fn read(data: &[u8], offset: usize) -> Result<Self, ApkError> {
        let chunk_type = read_u16(data, offset)?;
        let header_size = read_u16(data, offset + 2)? as usize;
        let size = read_u32(data, offset + 4)? as usize;

        if header_size < 8 || size < header_size || offset + size > data.len() {
            return Err(ApkError::malformed(
                "chunk",
                format!(
                    "type 0x{chunk_type:04x} at {offset}: header {header_size}, size {size}, \
                     buffer {}",
                    data.len()
                ),
            ));
        }

        Ok(Self {
            offset,
            chunk_type,
            header_size,
            size,
        })
    }

    /// Offset of the first byte after the chunk header.
    pub fn body(&self) -> usize {
        self.offset + self.header_size
    }

    /// Offset of the first byte after the chunk.
    pub fn end(&self) -> usize {
        self.offset + self.size
    }

    /// Iterate the child chunks laid out between `start` and the end of this chunk.
    pub fn children<'a>(&self, data: &'a [u8], start: usize) -> ChildChunks<'a> {
        ChildChunks {
            data,
            next: start,
            end: self.end(),
        }
    }
}

pub struct ChildChunks<'a> {
    data: &'a [u8],
    next: usize,
    end: usize,
}

impl Iterator for ChildChunks<'_> {
    type Item = Result<ChunkHeader, ApkError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next + 8 > self.end {
            return None;
        }
        let header = ChunkHeader::read(self.data, self.next);
        match &header {
            Ok(h) => self.next = h.end(),
            // Stop after the first broken chunk.
            Err(_) => self.next = self.end,
        }
        Some(header)
    }
}

/// Typed value (`Res_value`) as stored in attributes and resource entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResValue {
    Null,
    Reference(u32),
    String(String),
    Int(i64),
    Bool(bool),
    Other { data_type: u8, data: u32 },
}

impl ResValue {
    pub const TYPE_NULL: u8 = 0x00;
    pub const TYPE_REFERENCE: u8 = 0x01;
    pub const TYPE_STRING: u8 = 0x03;
    pub const TYPE_INT_DEC: u8 = 0x10;
    pub const TYPE_INT_HEX: u8 = 0x11;
    pub const TYPE_INT_BOOLEAN: u8 = 0x12;

    pub fn decode(data_type: u8, data: u32, strings: &StringPool) -> Result<Self, ApkError> {
        Ok(match data_type {
            Self::TYPE_NULL => Self::Null,
            Self::TYPE_REFERENCE => Self::Reference(data),
            Self::TYPE_STRING => Self::String(strings.get(data)?.to_string()),
            Self::TYPE_INT_DEC | Self::TYPE_INT_HEX => Self::Int(i64::from(data as i32)),
            Self::TYPE_INT_BOOLEAN => Self::Bool(data != 0),
            _ => Self::Other { data_type, data },
        })
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Decoded `ResStringPool`.
#[derive(Debug, Clone, Default)]
pub struct StringPool {
    strings: Vec<String>,
}

impl StringPool {
    pub fn parse(data: &[u8], header: &ChunkHeader) -> Result<Self, ApkError> {
        if header.chunk_type != RES_STRING_POOL_TYPE {
            return Err(ApkError::malformed(
                "string pool",
                format!("unexpected chunk type 0x{:04x}", header.chunk_type),
            ));
        }

        let base = header.offset;
        let count = read_u32(data, base + 8)? as usize;
        let flags = read_u32(data, base + 16)?;
        let strings_start = read_u32(data, base + 20)? as usize;
        let utf8 = flags & UTF8_FLAG != 0;

        let offsets_start = header.body();
        if offsets_start + count * 4 > header.end() {
            return Err(ApkError::malformed(
                "string pool",
                format!("{count} offsets overflow the chunk"),
            ));
        }

        let mut strings = Vec::with_capacity(count);
        for i in 0..count {
            let rel = read_u32(data, offsets_start + i * 4)? as usize;
            let at = base + strings_start + rel;
            if at >= header.end() {
                return Err(ApkError::Truncated(at));
            }
            let s = if utf8 {
                decode_utf8(data, at)?
            } else {
                decode_utf16(data, at)?
            };
            strings.push(s);
        }

        Ok(Self { strings })
    }

    pub fn get(&self, index: u32) -> Result<&str, ApkError> {
        self.strings
            .get(index as usize)
            .map(String::as_str)
            .ok_or_else(|| {
                ApkError::malformed(
                    "string pool",
                    format!("index {index} out of {}", self.strings.len()),
                )
            })
    }

    /// Like `get`, but maps the `NO_INDEX` sentinel to `None`.
    pub fn get_optional(&self, index: u32) -> Result<Option<&str>, ApkError> {
        if index == NO_INDEX {
            return Ok(None);
        }
        self.get(index).map(Some)
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

fn decode_utf16(data: &[u8], at: usize) -> Result<String, ApkError> {
    let mut len = read_u16(data, at)? as usize;
    let mut pos = at + 2;
    if len & 0x8000 != 0 {
        len = ((len & 0x7FFF) << 16) | read_u16(data, pos)? as usize;
        pos += 2;
    }

    let mut units = Vec::with_capacity(len);
    for i in 0..len {
        units.push(read_u16(data, pos + i * 2)?);
    }
    Ok(String::from_utf16_lossy(&units))
}

fn decode_utf8(data: &[u8], at: usize) -> Result<String, ApkError> {
    // UTF-16 length first, then the UTF-8 byte length; only the latter is used.
    let (_, pos) = decode_utf8_length(data, at)?;
    let (len, pos) = decode_utf8_length(data, pos)?;
    let bytes = data.get(pos..pos + len).ok_or(ApkError::Truncated(pos))?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

fn decode_utf8_length(data: &[u8], at: usize) -> Result<(usize, usize), ApkError> {
    let first = read_u8(data, at)? as usize;
    if first & 0x80 != 0 {
        let second = read_u8(data, at + 1)? as usize;
        Ok((((first & 0x7F) << 8) | second, at + 2))
    } else {
        Ok((first, at + 1))
    }
}
