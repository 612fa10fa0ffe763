//! Canonical package metadata, derived from archives and cached by content
//! fingerprint.
//!
//! Metadata is never authoritative: it is recomputed from the archive
//! whenever the fingerprint of `(path, size, mtime)` changes, so replacing
//! the file invalidates every cached view of it automatically.

pub mod parser;

use std::fs;
use std::path::Path;

use chrono::DateTime;
use md5::{Digest, Md5};
use serde_json::{Map, Value, json};

use crate::cache::FileCache;
use crate::error::Result;
use crate::models::{Package, PackageMetadata, PackageType};

pub use parser::ArchiveError;

/// Cached metadata lives a week; fingerprint changes invalidate earlier.
const METADATA_CACHE_TTL: i64 = 7 * 24 * 3600;

/// `metadata-{slug}-b64-{md5(path|size|mtime)}`.
pub fn metadata_cache_key(slug: &str, path: &Path) -> String {
    let mut key = format!("metadata-{slug}-b64-");

    if let Ok(meta) = fs::metadata(path) {
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let fingerprint = format!("{}|{}|{}", path.display(), meta.len(), mtime);
        key.push_str(&hex::encode(Md5::digest(fingerprint)));
    }

    key
}

/// Loads a [`Package`] for an archive on disk, going through the
/// fingerprint cache. [`ArchiveError::Invalid`] means the file exists but
/// is not a valid package; it must not be displayed or served.
pub fn load_package(
    cache: &FileCache,
    slug: &str,
    archive_path: &Path,
) -> Result<std::result::Result<Package, ArchiveError>> {
    let meta = fs::metadata(archive_path)?;
    let cache_key = metadata_cache_key(slug, archive_path);

    let metadata = match cache.get::<PackageMetadata>(&cache_key)? {
        Some(metadata) => metadata,
        None => {
            let metadata = match extract_metadata(slug, archive_path) {
                Ok(metadata) => metadata,
                Err(e) => return Ok(Err(e)),
            };
            cache.set(&cache_key, &metadata, METADATA_CACHE_TTL)?;
            metadata
        }
    };

    let last_modified = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    Ok(Ok(Package {
        slug: slug.to_string(),
        archive_path: archive_path.to_path_buf(),
        metadata,
        file_size: meta.len(),
        last_modified,
    }))
}

/// Drops the cached metadata for an archive, if any.
pub fn clear_metadata_cache(cache: &FileCache, slug: &str, archive_path: &Path) -> Result<()> {
    cache.clear(&metadata_cache_key(slug, archive_path))
}

fn extract_metadata(
    slug: &str,
    archive_path: &Path,
) -> std::result::Result<PackageMetadata, ArchiveError> {
    let parsed = parser::parse_archive(archive_path)?;
    Ok(compose_metadata(slug, archive_path, parsed))
}

/// Folds parsed headers, extra headers and readme fields into the
/// canonical metadata map served by the Update API.
fn compose_metadata(
    archive_slug: &str,
    archive_path: &Path,
    parsed: parser::ParsedArchive,
) -> PackageMetadata {
    let header = |key: &str| -> Option<String> {
        parsed.headers.get(key).filter(|v| !v.is_empty()).cloned()
    };

    // The slug is the directory name of the main file; top-level main
    // files fall back to the archive's own name.
    let main_file = parsed.main_file.to_lowercase();
    let derived_slug = main_file
        .rsplit_once('/')
        .map(|(dir, _)| dir.rsplit('/').next().unwrap_or(dir).to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| archive_slug.to_string());

    let mut metadata = PackageMetadata::new(derived_slug, parsed.package_type);

    metadata.name = header("Name").unwrap_or_default();
    metadata.version = header("Version").unwrap_or_default();
    metadata.homepage = header("PluginURI")
        .or_else(|| header("ThemeURI"))
        .or_else(|| header("Homepage"));
    metadata.author = header("Author");
    metadata.author_homepage = header("AuthorURI");
    metadata.description = header("Description");
    metadata.details_url = header("DetailsURI");
    metadata.depends = header("Depends");
    metadata.provides = header("Provides");
    metadata.requires_php = header("RequiresPHP");

    // Themes default their details page to the homepage.
    if metadata.details_url.is_none() && parsed.package_type == PackageType::Theme {
        metadata.details_url = metadata.homepage.clone();
    }

    if let Some(readme) = &parsed.readme {
        metadata.requires = readme.requires.clone();
        metadata.tested = readme.tested.clone();
        if metadata.requires_php.is_none() {
            metadata.requires_php = readme.requires_php.clone();
        }

        if !readme.sections.is_empty() {
            let mut sections = Map::new();
            for (name, body) in &readme.sections {
                sections.insert(name.clone(), json!(body));
            }
            metadata.sections = Some(sections);
        }

        metadata.upgrade_notice = upgrade_notice(readme, &metadata.version);
    }

    if !parsed.extra.icons.is_empty() {
        metadata.icons = Some(parsed.extra.icons.clone());
    }
    if !parsed.extra.banners.is_empty() {
        metadata.banners = Some(parsed.extra.banners.clone());
    }
    metadata.require_license = parsed.extra.require_license;
    metadata.licensed_with = parsed.extra.licensed_with.clone();

    metadata.last_updated = fs::metadata(archive_path)
        .ok()
        .and_then(|m| m.modified().ok())
        .map(|t| {
            let stamp: DateTime<chrono::Utc> = t.into();
            stamp.format("%Y-%m-%d %H:%M:%S").to_string()
        });

    metadata
}

/// The upgrade notice for the current version is the paragraph under the
/// `= {version} =` heading of the readme's upgrade notice section.
fn upgrade_notice(readme: &parser::Readme, version: &str) -> Option<String> {
    if version.is_empty() {
        return None;
    }

    let section = readme.sections.get("upgrade_notice")?;
    let mut found = false;

    for line in section.lines() {
        let trimmed = line.trim();
        if found && !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
        if trimmed.trim_matches('=').trim() == version && trimmed.starts_with('=') {
            found = true;
        }
    }

    None
}

// Scalar values are serialized as strings in the outward metadata map, so
// clients never see a number where an older release sent a string.
pub fn stringify_scalars(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for v in map.values_mut() {
                stringify_scalars(v);
            }
        }
        Value::Array(items) => {
            for v in items.iter_mut() {
                stringify_scalars(v);
            }
        }
        Value::Number(n) => *value = Value::String(n.to_string()),
        Value::Bool(_) | Value::Null | Value::String(_) => {}
    }
}
