//! Android binary XML, as used for the compiled `AndroidManifest.xml`.

use super::binary::{
    ChunkHeader, NO_INDEX, RES_STRING_POOL_TYPE, RES_XML_END_ELEMENT_TYPE,
    RES_XML_END_NAMESPACE_TYPE, RES_XML_RESOURCE_MAP_TYPE, RES_XML_START_ELEMENT_TYPE,
    RES_XML_START_NAMESPACE_TYPE, RES_XML_TYPE, ResValue, StringPool, read_u8, read_u16,
    read_u32,
};
use super::error::ApkError;

/// One attribute of a start element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlAttribute {
    pub name: String,
    /// Framework attribute id from the resource map, when present.
    pub resource_id: Option<u32>,
    pub value: ResValue,
}

/// A start element, flattened with its nesting depth (root is 0).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub depth: usize,
    pub attributes: Vec<XmlAttribute>,
}

impl XmlElement {
    /// Find an attribute by local name, falling back to its framework resource id.
    ///
    /// Obfuscated manifests often blank attribute names and keep only the id.
    pub fn attribute(&self, name: &str, resource_id: u32) -> Option<&ResValue> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .or_else(|| {
                self.attributes
                    .iter()
                    .find(|a| a.resource_id == Some(resource_id))
            })
            .map(|a| &a.value)
    }
}

/// Start elements of a binary XML document, in document order.
#[derive(Debug, Clone, Default)]
pub struct XmlDocument {
    pub elements: Vec<XmlElement>,
}

impl XmlDocument {
    pub fn parse(data: &[u8]) -> Result<Self, ApkError> {
        let root = ChunkHeader::read(data, 0)?;
        if root.chunk_type != RES_XML_TYPE {
            return Err(ApkError::malformed(
                "binary XML",
                format!("unexpected root chunk type 0x{:04x}", root.chunk_type),
            ));
        }

        let mut strings = StringPool::default();
        let mut resource_map: Vec<u32> = Vec::new();
        let mut elements = Vec::new();
        let mut depth = 0usize;

        for chunk in root.children(data, root.body()) {
            let chunk = chunk?;
            match chunk.chunk_type {
                RES_STRING_POOL_TYPE => strings = StringPool::parse(data, &chunk)?,
                RES_XML_RESOURCE_MAP_TYPE => {
                    resource_map = (chunk.body()..chunk.end())
                        .step_by(4)
                        .map(|off| read_u32(data, off))
                        .collect::<Result<_, _>>()?;
                }
                RES_XML_START_ELEMENT_TYPE => {
                    elements.push(parse_start_element(
                        data,
                        &chunk,
                        &strings,
                        &resource_map,
                        depth,
                    )?);
                    depth += 1;
                }
                RES_XML_END_ELEMENT_TYPE => depth = depth.saturating_sub(1),
                RES_XML_START_NAMESPACE_TYPE | RES_XML_END_NAMESPACE_TYPE => {}
                // CDATA and unknown chunks.
                _ => {}
            }
        }

        Ok(Self { elements })
    }

    /// First element with the given name at the given depth.
    pub fn find(&self, name: &str, depth: usize) -> Option<&XmlElement> {
        self.elements
            .iter()
            .find(|e| e.depth == depth && e.name == name)
    }
}

fn parse_start_element(
    data: &[u8],
    chunk: &ChunkHeader,
    strings: &StringPool,
    resource_map: &[u32],
    depth: usize,
) -> Result<XmlElement, ApkError> {
    let ext = chunk.body();
    let name = strings.get(read_u32(data, ext + 4)?)?.to_string();
    let attribute_start = read_u16(data, ext + 8)? as usize;
    let attribute_size = read_u16(data, ext + 10)? as usize;
    let attribute_count = read_u16(data, ext + 12)? as usize;

    if attribute_count > 0 && attribute_size < 20 {
        return Err(ApkError::malformed(
            "binary XML",
            format!("attribute size {attribute_size} on <{name}>"),
        ));
    }

    let mut attributes = Vec::with_capacity(attribute_count);
    for i in 0..attribute_count {
        let at = ext + attribute_start + i * attribute_size;
        if at + 20 > chunk.end() {
            return Err(ApkError::Truncated(at));
        }

        let name_index = read_u32(data, at + 4)?;
        let raw_value = read_u32(data, at + 8)?;
        let data_type = read_u8(data, at + 15)?;
        let value_data = read_u32(data, at + 16)?;

        let attr_name = strings.get_optional(name_index)?.unwrap_or("").to_string();
        let resource_id = resource_map.get(name_index as usize).copied();

        let value = if raw_value != NO_INDEX && data_type == ResValue::TYPE_STRING {
            ResValue::String(strings.get(raw_value)?.to_string())
        } else {
            ResValue::decode(data_type, value_data, strings)?
        };

        attributes.push(XmlAttribute {
            name: attr_name,
            resource_id,
            value,
        });
    }

    Ok(XmlElement {
        name,
        depth,
        attributes,
    })
}
