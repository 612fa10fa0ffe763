use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::license::PackageType;

/// Icon URLs advertised to update clients, keyed by resolution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageIcons {
    #[serde(rename = "1x", skip_serializing_if = "Option::is_none")]
    pub one_x: Option<String>,
    #[serde(rename = "2x", skip_serializing_if = "Option::is_none")]
    pub two_x: Option<String>,
}

impl PackageIcons {
    pub fn is_empty(&self) -> bool {
        self.one_x.is_none() && self.two_x.is_none()
    }
}

/// Banner image URLs advertised to update clients.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageBanners {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high: Option<String>,
}

impl PackageBanners {
    pub fn is_empty(&self) -> bool {
        self.low.is_none() && self.high.is_none()
    }
}

/// Metadata extracted from a package archive.
///
/// This is the shape cached on disk and returned by the Update API's
/// `get_metadata` action, minus the `download_url` and license fields the
/// request handler grafts on per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub name: String,
    pub version: String,
    pub slug: String,
    #[serde(rename = "type")]
    pub package_type: PackageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_homepage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depends: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provides: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tested: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_php: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sections: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade_notice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icons: Option<PackageIcons>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banners: Option<PackageBanners>,
    #[serde(default)]
    pub require_license: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub licensed_with: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

impl PackageMetadata {
    pub fn new(slug: impl Into<String>, package_type: PackageType) -> Self {
        Self {
            name: String::new(),
            version: String::new(),
            slug: slug.into(),
            package_type,
            homepage: None,
            author: None,
            author_homepage: None,
            description: None,
            details_url: None,
            depends: None,
            provides: None,
            requires: None,
            tested: None,
            requires_php: None,
            sections: None,
            upgrade_notice: None,
            icons: None,
            banners: None,
            require_license: false,
            licensed_with: None,
            last_updated: None,
        }
    }
}

/// A package archive present on disk, paired with its parsed metadata.
#[derive(Debug, Clone)]
pub struct Package {
    pub slug: String,
    pub archive_path: PathBuf,
    pub metadata: PackageMetadata,
    pub file_size: u64,
    pub last_modified: i64,
}

impl Package {
    /// Serializes the metadata into a mutable JSON object so request
    /// handlers can graft response-only fields onto it.
    pub fn metadata_object(&self) -> Map<String, Value> {
        match serde_json::to_value(&self.metadata) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}
