use super::axml::XmlDocument;
use super::binary::ResValue;
use super::error::ApkError;

/// Framework attribute ids (`android.R.attr`).
pub mod attr {
    pub const LABEL: u32 = 0x0101_0001;
    pub const ICON: u32 = 0x0101_0002;
    pub const VERSION_CODE: u32 = 0x0101_021b;
    pub const VERSION_NAME: u32 = 0x0101_021c;
}

/// The `<application>` element: icon and label as raw references or inline values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Application {
    pub icon: Option<ResValue>,
    pub label: Option<ResValue>,
}

/// Fields of `AndroidManifest.xml` the scanner cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub package_name: String,
    pub version_name: Option<ResValue>,
    pub version_code: Option<ResValue>,
    pub application: Application,
}

impl Manifest {
    pub fn from_document(doc: &XmlDocument) -> Result<Self, ApkError> {
        let root = doc
            .find("manifest", 0)
            .ok_or_else(|| ApkError::malformed("manifest", "no <manifest> root element"))?;

        let package_name = root
            .attribute("package", 0)
            .and_then(ResValue::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ApkError::malformed("manifest", "missing package attribute"))?
            .to_string();

        let application = doc
            .find("application", 1)
            .map(|app| Application {
                icon: app.attribute("icon", attr::ICON).cloned(),
                label: app.attribute("label", attr::LABEL).cloned(),
            })
            .unwrap_or_default();

        Ok(Self {
            package_name,
            version_name: root
                .attribute("versionName", attr::VERSION_NAME)
                .cloned(),
            version_code: root
                .attribute("versionCode", attr::VERSION_CODE)
                .cloned(),
            application,
        })
    }

    pub fn parse(data: &[u8]) -> Result<Self, ApkError> {
        Self::from_document(&XmlDocument::parse(data)?)
    }
}
