use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use quick_xml::events::BytesStart;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("catalog parse error: {0}")]
    Parse(String),

    #[error("unknown device: {0}")]
    UnknownDevice(String),
}

/// Where a device's repository manifest lives.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    pub project: String,
    pub manifest_file: String,
}

/// Device → manifest bindings loaded from the config directory.
///
/// `manifests.json` maps device names to manifest descriptors;
/// `devices.json` groups device names and is flattened into one list.
#[derive(Debug, Clone, Default)]
pub struct DeviceCatalog {
    manifests: HashMap<String, ManifestEntry>,
    devices: Vec<String>,
}

impl DeviceCatalog {
    pub fn load(config_dir: &Path) -> Result<Self, CatalogError> {
        let manifests_raw = fs::read_to_string(config_dir.join("manifests.json"))?;
        let manifests: HashMap<String, ManifestEntry> = serde_json::from_str(&manifests_raw)
            .map_err(|e| CatalogError::Parse(format!("manifests.json: {e}")))?;

        let devices_raw = fs::read_to_string(config_dir.join("devices.json"))?;
        let groups: HashMap<String, Vec<String>> = serde_json::from_str(&devices_raw)
            .map_err(|e| CatalogError::Parse(format!("devices.json: {e}")))?;
        let mut devices: Vec<String> = groups.into_values().flatten().collect();
        devices.sort();
        devices.dedup();

        Ok(Self { manifests, devices })
    }

    pub fn from_parts(manifests: HashMap<String, ManifestEntry>, devices: Vec<String>) -> Self {
        Self { manifests, devices }
    }

    pub fn devices(&self) -> &[String] {
        &self.devices
    }

    pub fn entry(&self, device: &str) -> Result<&ManifestEntry, CatalogError> {
        self.manifests
            .get(device)
            .ok_or_else(|| CatalogError::UnknownDevice(device.to_string()))
    }
}

/// Build-system generation declared by a manifest. Each one implies a
/// follow-on scan of the matching variant-suffixed branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    Morty,
    Dunfell,
}

impl Variant {
    pub fn suffix(self) -> &'static str {
        match self {
            Variant::Morty => "_morty",
            Variant::Dunfell => "_dunfell",
        }
    }

    pub fn qualify(self, branch: &str) -> String {
        format!("{branch}{}", self.suffix())
    }

    fn from_version(version: &str) -> Option<Self> {
        match version {
            "morty" => Some(Variant::Morty),
            "dunfell" => Some(Variant::Dunfell),
            _ => None,
        }
    }
}

/// Everything a manifest tells us: the repository list and any declared
/// build-system variants.
#[derive(Debug, Clone, Default)]
pub struct ManifestScan {
    pub projects: Vec<String>,
    pub variants: Vec<Variant>,
}

/// Parse either manifest form into the same repository-name list: a
/// repo-manifest XML project list, or a deps descriptor keyed by ssh
/// repository URLs.
pub fn parse_manifest(file_name: &str, content: &str) -> Result<ManifestScan, CatalogError> {
    let is_xml = file_name
        .rsplit('.')
        .next()
        .map(|ext| ext.eq_ignore_ascii_case("xml"))
        .unwrap_or(false);
    let scan = if is_xml {
        parse_xml_manifest(content)?
    } else {
        parse_deps_manifest(content)
    };
    if scan.projects.is_empty() {
        return Err(CatalogError::Parse(format!(
            "manifest '{file_name}' lists no repositories"
        )));
    }
    Ok(scan)
}

fn parse_xml_manifest(content: &str) -> Result<ManifestScan, CatalogError> {
    let mut reader = Reader::from_str(content);
    let mut scan = ManifestScan::default();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"project" => {
                    if let Some(name) = attr_value(&e, b"name")? {
                        if !scan.projects.contains(&name) {
                            scan.projects.push(name);
                        }
                    }
                }
                b"yocto" => {
                    if let Some(version) = attr_value(&e, b"version")? {
                        if let Some(variant) = Variant::from_version(&version) {
                            if !scan.variants.contains(&variant) {
                                scan.variants.push(variant);
                            }
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(CatalogError::Parse(format!("manifest xml: {e}"))),
            Ok(_) => {}
        }
    }
    Ok(scan)
}

fn attr_value(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, CatalogError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| CatalogError::Parse(format!("manifest xml: {e}")))?;
        if attr.key.as_ref() == key {
            return Ok(Some(String::from_utf8_lossy(&attr.value).into_owned()));
        }
    }
    Ok(None)
}

fn deps_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"ssh://[^/\s"']+/([^@\s"']+)@"#).expect("deps url pattern"))
}

/// Chromium-style deps descriptor: repository names are the path segment of
/// pinned `ssh://host:port/project@revision` URLs.
fn parse_deps_manifest(content: &str) -> ManifestScan {
    let mut scan = ManifestScan::default();
    for captures in deps_url_re().captures_iter(content) {
        let project = captures[1].to_string();
        if !scan.projects.contains(&project) {
            scan.projects.push(project);
        }
    }
    scan
}
