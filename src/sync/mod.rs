//! Package lookup and on-demand synchronization from a VCS host.
//!
//! A package is looked up on disk first. When it is absent and VCS sync is
//! enabled, one worker downloads the remote archive while concurrent
//! requests for the same slug skip the download instead of piling up: the
//! per-slug lock is a conditional upsert with a short deadline, tried once
//! and never waited on.

use std::io::Write;

use chrono::Utc;
use futures::StreamExt;
use md5::{Digest, Md5};
use tracing::{info, warn};

use crate::config::Config;
use crate::db::AppState;
use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::Package;
use crate::package;
use crate::util::sanitize_file_name;
use crate::vcs::{self, VcsApi, VcsReference};

/// A sync lock holder gets this long before another worker may steal the
/// slug. Downloads that outlive it risk a duplicate download, nothing
/// worse: the archive replace is atomic either way.
const LOCK_TTL: i64 = 10;

/// Timeout for the archive download itself, distinct from the short
/// metadata-call timeout used by the VCS API client.
const DOWNLOAD_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(300);

/// Deployment veto over which packages may be synced from the remote
/// host, evaluated after reference resolution so a policy can inspect
/// what would be downloaded. Rejected slugs lose any local archive too,
/// so a package removed from the policy disappears rather than serving a
/// stale copy.
pub trait SyncPolicy: Send + Sync {
    fn allow(&self, slug: &str, reference: &VcsReference) -> bool;
}

/// Stock policy: the configured slug whitelist, where an empty list
/// allows everything.
pub struct PackageWhitelist {
    slugs: Vec<String>,
}

impl PackageWhitelist {
    pub fn from_config(config: &Config) -> Self {
        Self {
            slugs: config.package_whitelist.clone(),
        }
    }
}

impl SyncPolicy for PackageWhitelist {
    fn allow(&self, slug: &str, _reference: &VcsReference) -> bool {
        self.slugs.is_empty() || self.slugs.iter().any(|s| s == slug)
    }
}

/// Outcome of comparing a local package against its remote counterpart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteUpdateStatus {
    /// Nothing on disk to compare against.
    NoLocalPackage,
    UpToDate,
    UpdateAvailable { remote_version: String },
}

/// Finds a package by slug, syncing it from the VCS host only when it is
/// missing locally. A present local archive is served as-is; keeping it
/// current against the remote is the sync subcommand's job, so request
/// handling never depends on the remote host being reachable.
///
/// Returns `None` both for packages that do not exist and for archives
/// that exist but fail to parse; an unparseable archive is logged and
/// treated as absent so it is never advertised or served.
pub async fn find_package(
    state: &AppState,
    slug: &str,
    check_remote: bool,
) -> Result<Option<Package>> {
    let slug = sanitize_file_name(slug);
    if slug.is_empty() {
        return Ok(None);
    }

    let archive_path = state.config.archive_path(&slug);

    if !archive_path.exists() {
        if !(check_remote && state.config.vcs_enabled) {
            return Ok(None);
        }
        if !sync_from_remote(state, &slug, false).await? {
            return Ok(None);
        }
        if !archive_path.exists() {
            return Ok(None);
        }
    }

    match package::load_package(&state.cache, &slug, &archive_path)? {
        Ok(pkg) => Ok(Some(pkg)),
        Err(e) => {
            warn!(slug = %slug, error = %e, "archive on disk is not a valid package");
            Ok(None)
        }
    }
}

/// Downloads the current remote archive for a slug and atomically replaces
/// the local copy. Returns `false` when another worker holds the sync lock
/// or the policy rejects the resolved reference. `force` clears any
/// existing lock first, so a stale holder cannot starve a deliberate
/// re-sync.
pub async fn sync_from_remote(state: &AppState, slug: &str, force: bool) -> Result<bool> {
    {
        let conn = state.db.get()?;
        if force {
            queries::release_lock(&conn, slug)?;
        }
        let now = Utc::now().timestamp();
        if !queries::try_acquire_lock(&conn, slug, now, LOCK_TTL)? {
            // Another worker is already syncing this slug.
            return Ok(false);
        }
    }

    let result = do_sync(state, slug).await;

    // The lock must come off on every path, including failures; otherwise
    // the slug stays un-syncable until the deadline passes.
    {
        let conn = state.db.get()?;
        queries::release_lock(&conn, slug)?;
    }

    result
}

async fn do_sync(state: &AppState, slug: &str) -> Result<bool> {
    let api = VcsApi::for_package(&state.config, slug)?;

    let Some(reference) = api.choose_reference(&state.config.vcs_branch).await? else {
        info!(slug = %slug, "no matching remote reference");
        return Ok(false);
    };

    let archive_path = state.config.archive_path(slug);

    if !state.sync_policy.allow(slug, &reference) {
        if archive_path.exists() {
            package::clear_metadata_cache(&state.cache, slug, &archive_path)?;
            std::fs::remove_file(&archive_path)?;
            info!(slug = %slug, "removed local archive for package rejected by sync policy");
        }
        return Ok(false);
    }

    std::fs::create_dir_all(&state.config.packages_dir)?;

    let temp = download_archive(&api, &reference.download_url, &state.config.packages_dir).await?;

    package::clear_metadata_cache(&state.cache, slug, &archive_path)?;
    temp.persist(&archive_path)
        .map_err(|e| AppError::Internal(format!("Failed to store archive: {}", e)))?;

    info!(slug = %slug, reference = %reference.name, "saved remote package archive");
    Ok(true)
}

/// Streams the archive into a temporary file in the destination directory
/// so the final persist is a same-filesystem rename. When the host sends a
/// Content-MD5 header the downloaded bytes are checked against it.
async fn download_archive(
    api: &VcsApi,
    url: &str,
    dir: &std::path::Path,
) -> Result<tempfile::NamedTempFile> {
    let client = reqwest::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .map_err(|e| AppError::Internal(format!("HTTP client init failed: {}", e)))?;

    let response = client
        .get(url)
        .headers(api.auth_headers())
        .send()
        .await?
        .error_for_status()?;

    let expected_md5 = response
        .headers()
        .get("content-md5")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    let mut hasher = Md5::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        hasher.update(&chunk);
        temp.write_all(&chunk)?;
    }
    temp.flush()?;

    if let Some(expected) = expected_md5 {
        use base64::Engine;
        let actual = base64::engine::general_purpose::STANDARD.encode(hasher.finalize());
        if actual != expected {
            return Err(AppError::Internal(
                "Downloaded archive failed its Content-MD5 check".to_string(),
            ));
        }
    }

    Ok(temp)
}

/// Compares the local package version against the version advertised by
/// the remote main file at the current reference.
pub async fn check_remote_update(
    state: &AppState,
    local: Option<&Package>,
) -> Result<RemoteUpdateStatus> {
    let Some(local) = local else {
        return Ok(RemoteUpdateStatus::NoLocalPackage);
    };

    let api = VcsApi::for_package(&state.config, &local.slug)?;

    let Some(reference) = api.choose_reference(&state.config.vcs_branch).await? else {
        return Ok(RemoteUpdateStatus::UpToDate);
    };

    let main_file = vcs::main_file_name(&local.slug, local.metadata.package_type);

    // The remote main file may sit either at the repository root or under
    // a directory named after the slug, mirroring the archive layouts the
    // parser accepts.
    let contents = match api.remote_file(&main_file, &reference.name).await? {
        Some(contents) => Some(contents),
        None => {
            let nested = format!("{}/{}", local.slug, main_file);
            api.remote_file(&nested, &reference.name).await?
        }
    };

    let Some(remote_version) =
        contents.and_then(|c| remote_version(&c, local.metadata.package_type))
    else {
        return Ok(RemoteUpdateStatus::UpToDate);
    };

    if vcs::compare_versions(&remote_version, &local.metadata.version)
        == std::cmp::Ordering::Greater
    {
        Ok(RemoteUpdateStatus::UpdateAvailable { remote_version })
    } else {
        Ok(RemoteUpdateStatus::UpToDate)
    }
}

/// Pulls the version out of a main file fetched from the remote host.
fn remote_version(contents: &str, package_type: crate::models::PackageType) -> Option<String> {
    use crate::models::PackageType;

    if package_type == PackageType::Generic {
        let manifest: serde_json::Value = serde_json::from_str(contents).ok()?;
        return manifest
            .get("packageData")
            .and_then(|d| d.get("Version"))
            .and_then(|v| v.as_str())
            .map(String::from);
    }

    for line in contents.lines().take(60) {
        let trimmed = line.trim_start_matches([' ', '\t', '/', '*', '#', '@']);
        if let Some(rest) = strip_prefix_ignore_case(trimmed, "version") {
            let rest = rest.trim_start();
            if let Some(value) = rest.strip_prefix(':') {
                let value = value.trim().trim_end_matches("*/").trim();
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }

    None
}

fn strip_prefix_ignore_case<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    if line.len() < prefix.len() || !line.is_char_boundary(prefix.len()) {
        return None;
    }
    let (head, rest) = line.split_at(prefix.len());
    head.eq_ignore_ascii_case(prefix).then_some(rest)
}
