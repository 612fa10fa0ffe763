//! Archive scanning and header-comment extraction.
//!
//! A package archive is a ZIP whose entries are at most one directory deep.
//! The parser looks for, in priority order: a theme stylesheet
//! (`style.css`), a top-level script with plugin-style headers (`*.php`),
//! or a generic JSON manifest (`depot.json`). A `readme.txt` is parsed
//! opportunistically when present. Header scanning is line-oriented
//! `Key: value` matching over the first 8 KiB of the relevant entry.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde_json::Value;
use thiserror::Error;
use zip::ZipArchive;

use crate::models::{PackageBanners, PackageIcons, PackageType};

/// Bytes of an entry considered when scanning for headers.
const HEADER_SCAN_LIMIT: u64 = 8 * 1024;

#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The file is readable but carries no recognizable package headers.
    /// Distinct from "not found"; such archives must never be served.
    #[error("no valid package headers found: {0}")]
    Invalid(String),
    #[error("unreadable archive: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Icon/banner URIs and licensing flags read from dedicated headers.
#[derive(Debug, Clone, Default)]
pub struct ExtraHeaders {
    pub icons: PackageIcons,
    pub banners: PackageBanners,
    pub require_license: bool,
    pub licensed_with: Option<String>,
}

/// Relevant fields of a parsed `readme.txt`.
#[derive(Debug, Clone, Default)]
pub struct Readme {
    pub requires: Option<String>,
    pub tested: Option<String>,
    pub requires_php: Option<String>,
    /// Section name (lowercased, spaces replaced by underscores) -> body.
    pub sections: BTreeMap<String, String>,
}

/// Everything extracted from one archive, before composition into the
/// canonical metadata map.
#[derive(Debug, Clone)]
pub struct ParsedArchive {
    pub package_type: PackageType,
    /// Entry path of the main file (stylesheet, plugin script or manifest).
    pub main_file: String,
    /// Internal header name -> value.
    pub headers: BTreeMap<String, String>,
    pub extra: ExtraHeaders,
    pub readme: Option<Readme>,
}

const THEME_HEADERS: &[(&str, &str)] = &[
    ("Name", "Theme Name"),
    ("ThemeURI", "Theme URI"),
    ("Description", "Description"),
    ("Author", "Author"),
    ("AuthorURI", "Author URI"),
    ("Version", "Version"),
    ("DetailsURI", "Details URI"),
];

const PLUGIN_HEADERS: &[(&str, &str)] = &[
    ("Name", "Plugin Name"),
    ("PluginURI", "Plugin URI"),
    ("Version", "Version"),
    ("Description", "Description"),
    ("Author", "Author"),
    ("AuthorURI", "Author URI"),
    ("RequiresPHP", "Requires PHP"),
    ("Depends", "Depends"),
    ("Provides", "Provides"),
];

/// Scans the archive at `path` for a recognizable package.
pub fn parse_archive(path: &Path) -> Result<ParsedArchive, ArchiveError> {
    let file = File::open(path)?;
    let mut zip = ZipArchive::new(file)?;

    // (rank, candidate): stylesheet beats plugin script beats manifest,
    // whatever order the entries appear in.
    let mut parsed: Option<(u8, ParsedArchive)> = None;
    let mut readme: Option<Readme> = None;

    for index in 0..zip.len() {
        if matches!(parsed, Some((0, _))) && readme.is_some() {
            break;
        }

        let mut entry = zip.by_index(index)?;
        let raw_name = entry.name().replace('\\', "/");
        let name = raw_name.trim_matches('/').to_string();

        if name.contains("../") {
            tracing::warn!(entry = %name, "path traversal attempt in archive, entry skipped");
            continue;
        }

        let depth = name.matches('/').count();
        if depth > 1 || entry.is_dir() {
            continue;
        }

        let base = basename(&name).to_lowercase();

        if readme.is_none() && base == "readme.txt" {
            let mut contents = String::new();
            entry.read_to_string(&mut contents).ok();
            readme = parse_readme(&contents);
            continue;
        }

        let current_rank = parsed.as_ref().map(|(rank, _)| *rank).unwrap_or(u8::MAX);

        if base == "style.css" && current_rank > 0 {
            let contents = read_prefix(&mut entry)?;
            let headers = file_headers(&contents, THEME_HEADERS);
            if !headers.get("Name").unwrap_or(&String::new()).is_empty() {
                parsed = Some((
                    0,
                    ParsedArchive {
                        package_type: PackageType::Theme,
                        main_file: name,
                        extra: extra_headers(&contents),
                        headers,
                        readme: None,
                    },
                ));
            }
        } else if name.ends_with(".php") && current_rank > 1 {
            let contents = read_prefix(&mut entry)?;
            let headers = file_headers(&contents, PLUGIN_HEADERS);
            if !headers.get("Name").unwrap_or(&String::new()).is_empty() {
                parsed = Some((
                    1,
                    ParsedArchive {
                        package_type: PackageType::Plugin,
                        main_file: name,
                        extra: extra_headers(&contents),
                        headers,
                        readme: None,
                    },
                ));
            }
        } else if base == "depot.json" && current_rank > 2 {
            let contents = read_prefix(&mut entry)?;
            if let Some((headers, extra)) = generic_headers(&contents) {
                parsed = Some((
                    2,
                    ParsedArchive {
                        package_type: PackageType::Generic,
                        main_file: name,
                        headers,
                        extra,
                        readme: None,
                    },
                ));
            }
        }
    }

    match parsed {
        Some((_, mut parsed)) => {
            parsed.readme = readme;
            Ok(parsed)
        }
        None => Err(ArchiveError::Invalid(
            "no theme stylesheet, plugin headers or manifest found".to_string(),
        )),
    }
}

fn basename(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

fn read_prefix(entry: &mut impl Read) -> Result<String, ArchiveError> {
    let mut buf = Vec::new();
    entry.take(HEADER_SCAN_LIMIT).read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Line-oriented `Key: value` extraction. Each header is matched at line
/// start after stripping comment-marker junk, case-insensitively.
fn file_headers(contents: &str, map: &[(&str, &str)]) -> BTreeMap<String, String> {
    let normalized = contents.replace("\r\n", "\n").replace('\r', "\n");
    let mut headers = BTreeMap::new();

    for (internal, pretty) in map {
        headers.insert(
            (*internal).to_string(),
            header_value(&normalized, pretty).unwrap_or_default(),
        );
    }

    headers
}

fn header_value(contents: &str, pretty: &str) -> Option<String> {
    for line in contents.lines() {
        let trimmed =
            line.trim_start_matches(|c| matches!(c, ' ' | '\t' | '/' | '*' | '#' | '@'));

        let Some(prefix) = trimmed.get(..pretty.len()) else {
            continue;
        };

        if !prefix.eq_ignore_ascii_case(pretty) || !trimmed[pretty.len()..].starts_with(':') {
            continue;
        }

        let raw = &trimmed[pretty.len() + 1..];
        // Strip trailing comment terminators and PHP closing tags.
        let raw = raw.split("*/").next().unwrap_or(raw);
        let raw = raw.split("?>").next().unwrap_or(raw);
        let value = raw.trim();

        if !value.is_empty() {
            return Some(value.to_string());
        }
    }

    None
}

fn extra_headers(contents: &str) -> ExtraHeaders {
    let map: &[(&str, &str)] = &[
        ("Icon1x", "Icon1x"),
        ("Icon2x", "Icon2x"),
        ("BannerLow", "BannerLow"),
        ("BannerHigh", "BannerHigh"),
        ("RequireLicense", "Require License"),
        ("LicensedWith", "Licensed With"),
    ];
    let headers = file_headers(contents, map);

    build_extra(|key| headers.get(key).filter(|v| !v.is_empty()).cloned())
}

fn build_extra(get: impl Fn(&str) -> Option<String>) -> ExtraHeaders {
    let require_license = get("RequireLicense")
        .map(|v| !matches!(v.to_lowercase().as_str(), "false" | "no" | "0" | "off"))
        .unwrap_or(false);

    ExtraHeaders {
        icons: PackageIcons {
            one_x: get("Icon1x"),
            two_x: get("Icon2x"),
        },
        banners: PackageBanners {
            low: get("BannerLow"),
            high: get("BannerHigh"),
        },
        require_license,
        licensed_with: get("LicensedWith"),
    }
}

/// Generic packages carry their metadata in a JSON manifest under a
/// `packageData` object.
fn generic_headers(contents: &str) -> Option<(BTreeMap<String, String>, ExtraHeaders)> {
    let manifest: Value = serde_json::from_str(contents).ok()?;
    let data = manifest.get("packageData")?.as_object()?;

    let get = |key: &str| -> Option<String> {
        match data.get(key) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Bool(b)) => Some(b.to_string()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    };

    let mut headers = BTreeMap::new();
    for key in ["Name", "Version", "Homepage", "Author", "AuthorURI", "Description"] {
        headers.insert(key.to_string(), get(key).unwrap_or_default());
    }

    if headers.get("Name").unwrap_or(&String::new()).is_empty() {
        return None;
    }

    Some((headers, build_extra(get)))
}

/// Parses a readme file: `=== Name ===` title, `Key: value` headers, then
/// `== Section ==` blocks. Returns `None` when the title line is missing.
fn parse_readme(contents: &str) -> Option<Readme> {
    let normalized = contents.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines = normalized.trim().lines();

    let title = lines.next()?.trim();
    if !(title.starts_with("===") && title.ends_with("===") && title.len() > 6) {
        return None;
    }

    let mut readme = Readme::default();

    // Header block ends at the first blank line.
    let mut rest: Vec<&str> = Vec::new();
    for line in lines.by_ref() {
        if line.trim().is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            let value = value.trim().to_string();
            match key.trim() {
                "Requires at least" => readme.requires = Some(value),
                "Tested up to" => readme.tested = Some(value),
                "Requires PHP" => readme.requires_php = Some(value),
                _ => {}
            }
        } else {
            rest.push(line);
            break;
        }
    }

    let mut current: Option<String> = None;
    let mut buffer: Vec<&str> = Vec::new();

    let mut flush = |section: &Option<String>, buffer: &mut Vec<&str>, readme: &mut Readme| {
        if let Some(name) = section {
            readme
                .sections
                .insert(name.clone(), buffer.join("\n").trim().to_string());
        }
        buffer.clear();
    };

    for line in rest.into_iter().chain(lines) {
        let trimmed = line.trim();
        if trimmed.starts_with("==")
            && trimmed.ends_with("==")
            && !trimmed.starts_with("===")
            && trimmed.len() > 4
        {
            flush(&current, &mut buffer, &mut readme);
            let name = trimmed.trim_matches('=').trim();
            current = Some(name.to_lowercase().replace(' ', "_"));
        } else {
            buffer.push(line);
        }
    }
    flush(&current, &mut buffer, &mut readme);

    Some(readme)
}
