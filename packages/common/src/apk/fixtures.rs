//! In-memory APK and UPK builders for tests.
//!
//! The generated archives carry a real binary manifest and resource table,
//! laid out the way `aapt2` emits them, so the parser sees the same chunks it
//! would in a store-downloaded package.

use std::io::{Cursor, Write};

use super::binary::{
    NO_INDEX, RES_STRING_POOL_TYPE, RES_TABLE_PACKAGE_TYPE, RES_TABLE_TYPE, RES_TABLE_TYPE_SPEC_TYPE,
    RES_TABLE_TYPE_TYPE, RES_XML_END_ELEMENT_TYPE, RES_XML_END_NAMESPACE_TYPE,
    RES_XML_RESOURCE_MAP_TYPE, RES_XML_START_ELEMENT_TYPE, RES_XML_START_NAMESPACE_TYPE,
    RES_XML_TYPE, ResValue,
};
use super::manifest::attr;

const ANDROID_NS: &str = "http://schemas.android.com/apk/res/android";
const PACKAGE_ID: u32 = 0x7f;
const DRAWABLE_TYPE: u8 = 2;
const STRING_TYPE: u8 = 3;
const CONFIG_SIZE: usize = 64;

/// A minimal PNG signature plus IHDR, enough to look like an icon.
pub const ICON_PNG: &[u8] = &[
    0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, b'I', b'H', b'D',
    b'R', 0x00, 0x00, 0x00, 0x30, 0x00, 0x00, 0x00, 0x30, 0x08, 0x06, 0x00, 0x00, 0x00,
];

fn push_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn push_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn pad4(buf: &mut Vec<u8>) {
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
}

/// Wrap `body` in a chunk whose header is `chunk_type`, `header_size`, size
/// followed by `header_rest`.
fn chunk(chunk_type: u16, header_rest: &[u8], body: &[u8]) -> Vec<u8> {
    let header_size = 8 + header_rest.len();
    let mut out = Vec::with_capacity(header_size + body.len());
    push_u16(&mut out, chunk_type);
    push_u16(&mut out, header_size as u16);
    push_u32(&mut out, (header_size + body.len()) as u32);
    out.extend_from_slice(header_rest);
    out.extend_from_slice(body);
    out
}

fn string_pool(strings: &[&str], utf8: bool) -> Vec<u8> {
    let mut offsets = Vec::new();
    let mut data = Vec::new();
    for s in strings {
        push_u32(&mut offsets, data.len() as u32);
        if utf8 {
            let units = s.encode_utf16().count();
            push_utf8_length(&mut data, units);
            push_utf8_length(&mut data, s.len());
            data.extend_from_slice(s.as_bytes());
            data.push(0);
        } else {
            let units: Vec<u16> = s.encode_utf16().collect();
            push_u16(&mut data, units.len() as u16);
            for unit in units {
                push_u16(&mut data, unit);
            }
            push_u16(&mut data, 0);
        }
    }
    pad4(&mut data);

    let header_size = 28u32;
    let mut rest = Vec::new();
    push_u32(&mut rest, strings.len() as u32);
    push_u32(&mut rest, 0);
    push_u32(&mut rest, if utf8 { 1 << 8 } else { 0 });
    push_u32(&mut rest, header_size + offsets.len() as u32);
    push_u32(&mut rest, 0);

    let mut body = offsets;
    body.extend_from_slice(&data);
    chunk(RES_STRING_POOL_TYPE, &rest, &body)
}

fn push_utf8_length(buf: &mut Vec<u8>, len: usize) {
    if len > 0x7F {
        buf.push(0x80 | ((len >> 8) as u8 & 0x7F));
        buf.push(len as u8);
    } else {
        buf.push(len as u8);
    }
}

/// A UTF-16 `ResStringPool` chunk.
pub fn string_pool_utf16(strings: &[&str]) -> Vec<u8> {
    string_pool(strings, false)
}

/// A UTF-8 `ResStringPool` chunk.
pub fn string_pool_utf8(strings: &[&str]) -> Vec<u8> {
    string_pool(strings, true)
}

/// A zip archive holding the given entries, deflated.
pub fn zip_entries(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    for (name, content) in files {
        writer.start_file(*name, options).expect("zip start_file");
        writer.write_all(content).expect("zip write_all");
    }
    writer.finish().expect("zip finish").into_inner()
}

/// Wrap an APK in a UPK container under `entry_name`, next to some metadata.
pub fn build_upk(apk: &[u8], entry_name: &str) -> Vec<u8> {
    zip_entries(&[
        ("meta/info.json", br#"{"format":"upk","version":1}"#.as_slice()),
        (entry_name, apk),
    ])
}

/// Describes the APK to synthesize.
#[derive(Debug, Clone)]
pub struct ApkFixture {
    pub package_name: String,
    pub version_name: String,
    pub version_code: u32,
    /// Application label, stored as a string resource. `None` omits the attribute.
    pub label: Option<String>,
    pub icon_png: Vec<u8>,
    /// One icon entry per density, in resource table order.
    pub icon_paths: Vec<String>,
}

impl Default for ApkFixture {
    fn default() -> Self {
        Self {
            package_name: "com.example.fixture".into(),
            version_name: "1.0.3".into(),
            version_code: 103,
            label: Some("Fixture App".into()),
            icon_png: ICON_PNG.to_vec(),
            icon_paths: vec![
                "res/mipmap-mdpi/ic_launcher.png".into(),
                "res/mipmap-hdpi/ic_launcher.png".into(),
            ],
        }
    }
}

impl ApkFixture {
    pub const ICON_ID: u32 = (PACKAGE_ID << 24) | ((DRAWABLE_TYPE as u32) << 16);
    pub const LABEL_ID: u32 = (PACKAGE_ID << 24) | ((STRING_TYPE as u32) << 16);

    /// The complete APK archive.
    pub fn build(&self) -> Vec<u8> {
        let manifest = self.manifest_bytes();
        let resources = self.resources_bytes();

        let mut files: Vec<(&str, &[u8])> = vec![
            ("AndroidManifest.xml", manifest.as_slice()),
            ("resources.arsc", resources.as_slice()),
            ("classes.dex", b"dex\n035\0".as_slice()),
        ];
        for path in &self.icon_paths {
            files.push((path.as_str(), self.icon_png.as_slice()));
        }
        zip_entries(&files)
    }

    /// Compiled `AndroidManifest.xml`.
    pub fn manifest_bytes(&self) -> Vec<u8> {
        // Indices 0..4 line up with the resource map below.
        let strings = [
            "versionCode",
            "versionName",
            "icon",
            "label",
            "android",
            ANDROID_NS,
            "package",
            "manifest",
            "application",
            self.package_name.as_str(),
            self.version_name.as_str(),
        ];
        const PREFIX: u32 = 4;
        const URI: u32 = 5;

        let mut body = string_pool_utf16(&strings);

        let mut ids = Vec::new();
        for id in [attr::VERSION_CODE, attr::VERSION_NAME, attr::ICON, attr::LABEL] {
            push_u32(&mut ids, id);
        }
        body.extend(chunk(RES_XML_RESOURCE_MAP_TYPE, &[], &ids));

        body.extend(namespace(RES_XML_START_NAMESPACE_TYPE, PREFIX, URI));

        let manifest_attrs = vec![
            attribute(NO_INDEX, 6, 9, ResValue::TYPE_STRING, 9),
            attribute(URI, 0, NO_INDEX, ResValue::TYPE_INT_DEC, self.version_code),
            attribute(URI, 1, 10, ResValue::TYPE_STRING, 10),
        ];
        body.extend(start_element(7, &manifest_attrs));

        let mut app_attrs = vec![attribute(
            URI,
            2,
            NO_INDEX,
            ResValue::TYPE_REFERENCE,
            Self::ICON_ID,
        )];
        if self.label.is_some() {
            app_attrs.push(attribute(
                URI,
                3,
                NO_INDEX,
                ResValue::TYPE_REFERENCE,
                Self::LABEL_ID,
            ));
        }
        body.extend(start_element(8, &app_attrs));
        body.extend(end_element(8));
        body.extend(end_element(7));

        body.extend(namespace(RES_XML_END_NAMESPACE_TYPE, PREFIX, URI));

        chunk(RES_XML_TYPE, &[], &body)
    }

    /// Compiled `resources.arsc` with the icon and label entries.
    pub fn resources_bytes(&self) -> Vec<u8> {
        let mut values: Vec<&str> = self.icon_paths.iter().map(String::as_str).collect();
        if let Some(label) = &self.label {
            values.push(label);
        }

        let mut package_body = string_pool_utf16(&["attr", "drawable", "string"]);
        let key_strings_at = 288 + package_body.len();
        package_body.extend(string_pool_utf16(&["ic_launcher", "app_name"]));

        package_body.extend(type_spec(DRAWABLE_TYPE));
        for (i, _) in self.icon_paths.iter().enumerate() {
            package_body.extend(type_entry(DRAWABLE_TYPE, 0, i as u32));
        }
        if self.label.is_some() {
            package_body.extend(type_spec(STRING_TYPE));
            package_body.extend(type_entry(STRING_TYPE, 1, self.icon_paths.len() as u32));
        }

        let mut package_header = Vec::new();
        push_u32(&mut package_header, PACKAGE_ID);
        let mut name = [0u16; 128];
        for (slot, unit) in name.iter_mut().zip(self.package_name.encode_utf16()) {
            *slot = unit;
        }
        for unit in name {
            push_u16(&mut package_header, unit);
        }
        push_u32(&mut package_header, 288);
        push_u32(&mut package_header, 3);
        push_u32(&mut package_header, key_strings_at as u32);
        push_u32(&mut package_header, 2);
        push_u32(&mut package_header, 0);

        let mut table_body = string_pool_utf8(&values);
        table_body.extend(chunk(RES_TABLE_PACKAGE_TYPE, &package_header, &package_body));

        let mut table_header = Vec::new();
        push_u32(&mut table_header, 1);
        chunk(RES_TABLE_TYPE, &table_header, &table_body)
    }
}

fn namespace(chunk_type: u16, prefix: u32, uri: u32) -> Vec<u8> {
    let mut header = Vec::new();
    push_u32(&mut header, 1);
    push_u32(&mut header, NO_INDEX);
    let mut body = Vec::new();
    push_u32(&mut body, prefix);
    push_u32(&mut body, uri);
    chunk(chunk_type, &header, &body)
}

fn attribute(ns: u32, name: u32, raw: u32, data_type: u8, data: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(20);
    push_u32(&mut out, ns);
    push_u32(&mut out, name);
    push_u32(&mut out, raw);
    push_u16(&mut out, 8);
    out.push(0);
    out.push(data_type);
    push_u32(&mut out, data);
    out
}

fn start_element(name: u32, attributes: &[Vec<u8>]) -> Vec<u8> {
    let mut header = Vec::new();
    push_u32(&mut header, 1);
    push_u32(&mut header, NO_INDEX);

    let mut body = Vec::new();
    push_u32(&mut body, NO_INDEX);
    push_u32(&mut body, name);
    push_u16(&mut body, 20);
    push_u16(&mut body, 20);
    push_u16(&mut body, attributes.len() as u16);
    push_u16(&mut body, 0);
    push_u16(&mut body, 0);
    push_u16(&mut body, 0);
    for a in attributes {
        body.extend_from_slice(a);
    }
    chunk(RES_XML_START_ELEMENT_TYPE, &header, &body)
}

fn end_element(name: u32) -> Vec<u8> {
    let mut header = Vec::new();
    push_u32(&mut header, 1);
    push_u32(&mut header, NO_INDEX);
    let mut body = Vec::new();
    push_u32(&mut body, NO_INDEX);
    push_u32(&mut body, name);
    chunk(RES_XML_END_ELEMENT_TYPE, &header, &body)
}

fn type_spec(type_id: u8) -> Vec<u8> {
    let mut header = vec![type_id, 0];
    push_u16(&mut header, 0);
    push_u32(&mut header, 1);
    let mut body = Vec::new();
    push_u32(&mut body, 0);
    chunk(RES_TABLE_TYPE_SPEC_TYPE, &header, &body)
}

/// A `ResTable_type` holding a single simple entry that points at global string `value`.
fn type_entry(type_id: u8, key: u32, value: u32) -> Vec<u8> {
    let header_size = 20 + CONFIG_SIZE;
    let mut header = vec![type_id, 0];
    push_u16(&mut header, 0);
    push_u32(&mut header, 1);
    push_u32(&mut header, (header_size + 4) as u32);
    let mut config = vec![0u8; CONFIG_SIZE];
    config[..4].copy_from_slice(&(CONFIG_SIZE as u32).to_le_bytes());
    header.extend_from_slice(&config);

    let mut body = Vec::new();
    push_u32(&mut body, 0);
    // ResTable_entry
    push_u16(&mut body, 8);
    push_u16(&mut body, 0);
    push_u32(&mut body, key);
    // Res_value
    push_u16(&mut body, 8);
    body.push(0);
    body.push(ResValue::TYPE_STRING);
    push_u32(&mut body, value);
    chunk(RES_TABLE_TYPE_TYPE, &header, &body)
}
