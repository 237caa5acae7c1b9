//! Compiled resource table (`resources.arsc`).

use std::collections::HashMap;

use super::binary::{
    ChunkHeader, NO_INDEX, RES_STRING_POOL_TYPE, RES_TABLE_PACKAGE_TYPE, RES_TABLE_TYPE,
    RES_TABLE_TYPE_SPEC_TYPE, RES_TABLE_TYPE_TYPE, ResValue, StringPool, read_u8, read_u16,
    read_u32,
};
use super::error::ApkError;

const FLAG_SPARSE: u8 = 0x01;
const FLAG_OFFSET16: u8 = 0x02;
const ENTRY_FLAG_COMPLEX: u16 = 0x0001;
const ENTRY_FLAG_COMPACT: u16 = 0x0008;
const MAX_REFERENCE_DEPTH: usize = 8;

/// Simple (non-bag) resource values keyed by resource id.
///
/// A resource defined for several configurations (densities, locales) maps to
/// one value per configuration, in table order.
#[derive(Debug, Clone, Default)]
pub struct ResourceTable {
    entries: HashMap<u32, Vec<ResValue>>,
}

impl ResourceTable {
    pub fn parse(data: &[u8]) -> Result<Self, ApkError> {
        let root = ChunkHeader::read(data, 0)?;
        if root.chunk_type != RES_TABLE_TYPE {
            return Err(ApkError::malformed(
                "resource table",
                format!("unexpected root chunk type 0x{:04x}", root.chunk_type),
            ));
        }

        let mut strings = StringPool::default();
        let mut entries: HashMap<u32, Vec<ResValue>> = HashMap::new();

        for chunk in root.children(data, root.body()) {
            let chunk = chunk?;
            match chunk.chunk_type {
                RES_STRING_POOL_TYPE => strings = StringPool::parse(data, &chunk)?,
                RES_TABLE_PACKAGE_TYPE => parse_package(data, &chunk, &strings, &mut entries)?,
                _ => {}
            }
        }

        Ok(Self { entries })
    }

    /// All values recorded for `id`, one per configuration.
    pub fn values(&self, id: u32) -> &[ResValue] {
        self.entries.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Resolve `id` to the string values it ends up at, following references.
    pub fn resolve_strings(&self, id: u32) -> Result<Vec<String>, ApkError> {
        let mut out = Vec::new();
        self.collect_strings(id, 0, &mut out)?;
        Ok(out)
    }

    fn collect_strings(&self, id: u32, depth: usize, out: &mut Vec<String>) -> Result<(), ApkError> {
        if depth > MAX_REFERENCE_DEPTH {
            return Err(ApkError::malformed(
                "resource table",
                format!("reference chain too deep at 0x{id:08x}"),
            ));
        }

        let values = self
            .entries
            .get(&id)
            .ok_or(ApkError::UnresolvedResource(id))?;

        for value in values {
            match value {
                ResValue::String(s) => out.push(s.clone()),
                ResValue::Reference(next) if *next != id => {
                    self.collect_strings(*next, depth + 1, out)?
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_package(
    data: &[u8],
    chunk: &ChunkHeader,
    strings: &StringPool,
    entries: &mut HashMap<u32, Vec<ResValue>>,
) -> Result<(), ApkError> {
    let package_id = read_u32(data, chunk.offset + 8)?;
    if package_id > 0xFF {
        return Err(ApkError::malformed(
            "resource table",
            format!("package id {package_id}"),
        ));
    }

    for child in chunk.children(data, chunk.body()) {
        let child = child?;
        match child.chunk_type {
            RES_TABLE_TYPE_TYPE => parse_type(data, &child, package_id, strings, entries)?,
            // Type and key name pools, and per-type config masks.
            RES_STRING_POOL_TYPE | RES_TABLE_TYPE_SPEC_TYPE => {}
            _ => {}
        }
    }
    Ok(())
}

fn parse_type(
    data: &[u8],
    chunk: &ChunkHeader,
    package_id: u32,
    strings: &StringPool,
    entries: &mut HashMap<u32, Vec<ResValue>>,
) -> Result<(), ApkError> {
    let type_id = read_u8(data, chunk.offset + 8)? as u32;
    let flags = read_u8(data, chunk.offset + 9)?;
    let entry_count = read_u32(data, chunk.offset + 12)? as usize;
    let entries_start = chunk.offset + read_u32(data, chunk.offset + 16)? as usize;
    let offsets = chunk.body();

    let mut present: Vec<(u32, usize)> = Vec::new();
    if flags & FLAG_SPARSE != 0 {
        for i in 0..entry_count {
            let index = read_u16(data, offsets + i * 4)? as u32;
            let offset = read_u16(data, offsets + i * 4 + 2)? as usize * 4;
            present.push((index, offset));
        }
    } else if flags & FLAG_OFFSET16 != 0 {
        for i in 0..entry_count {
            let raw = read_u16(data, offsets + i * 2)?;
            if raw != 0xFFFF {
                present.push((i as u32, raw as usize * 4));
            }
        }
    } else {
        for i in 0..entry_count {
            let raw = read_u32(data, offsets + i * 4)?;
            if raw != NO_INDEX {
                present.push((i as u32, raw as usize));
            }
        }
    }

    for (index, offset) in present {
        let at = entries_start + offset;
        if at >= chunk.end() {
            return Err(ApkError::Truncated(at));
        }
        let Some(value) = parse_entry(data, at, strings)? else {
            continue;
        };
        let id = (package_id << 24) | (type_id << 16) | index;
        entries.entry(id).or_default().push(value);
    }
    Ok(())
}

/// Decode a `ResTable_entry`. Bags (styles, arrays) are skipped.
fn parse_entry(data: &[u8], at: usize, strings: &StringPool) -> Result<Option<ResValue>, ApkError> {
    let size = read_u16(data, at)? as usize;
    let flags = read_u16(data, at + 2)?;

    if flags & ENTRY_FLAG_COMPACT != 0 {
        let data_type = (flags >> 8) as u8;
        let value = read_u32(data, at + 4)?;
        return ResValue::decode(data_type, value, strings).map(Some);
    }

    if flags & ENTRY_FLAG_COMPLEX != 0 {
        return Ok(None);
    }

    let value_at = at + size;
    let data_type = read_u8(data, value_at + 3)?;
    let value = read_u32(data, value_at + 4)?;
    ResValue::decode(data_type, value, strings).map(Some)
}
