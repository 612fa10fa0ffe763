//! Minimal VCS-hosting API client: "latest reference" resolution and raw
//! file fetches against GitHub or GitLab-compatible hosts.
//!
//! This is not a VCS client. The update resolver only ever needs two
//! answers from a host: which reference currently represents the package
//! (release, tag or branch head), and the contents of one file at that
//! reference so the remote version can be read without downloading the
//! whole archive.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use semver::Version;
use serde_json::Value;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::PackageType;

/// Timeout for metadata calls. Archive downloads use their own, longer
/// timeout in the sync module.
const API_TIMEOUT: Duration = Duration::from_secs(20);

/// A resolved remote reference and where to download its archive.
#[derive(Debug, Clone)]
pub struct VcsReference {
    pub name: String,
    pub download_url: String,
}

#[derive(Debug, Clone)]
enum Host {
    GitHub { owner: String, repo: String },
    GitLab { base: String, project: String },
}

/// One provider, bound to a single repository.
#[derive(Debug, Clone)]
pub struct VcsApi {
    host: Host,
    credentials: Option<String>,
    client: reqwest::Client,
}

impl VcsApi {
    /// Builds a client for `{vcs_url}{slug}`. Self-hosted URLs are treated
    /// as GitLab-compatible; github.com gets the GitHub API.
    pub fn for_package(config: &Config, slug: &str) -> Result<Self> {
        let base = config.vcs_url.trim_end_matches('/');
        let repo_url = format!("{}/{}", base, slug);

        let host = parse_repo_url(&repo_url, config.vcs_self_hosted).ok_or_else(|| {
            AppError::Internal(format!("Unsupported VCS URL: {}", repo_url))
        })?;

        let client = reqwest::Client::builder()
            .timeout(API_TIMEOUT)
            .build()
            .map_err(|e| AppError::Internal(format!("HTTP client init failed: {}", e)))?;

        Ok(Self {
            host,
            credentials: config.vcs_credentials.clone(),
            client,
        })
    }

    /// Headers required to download from this host, for reuse by the
    /// archive download step.
    pub fn auth_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("depot-server"));

        if let Some(token) = &self.credentials {
            let value = match self.host {
                Host::GitHub { .. } => format!("Bearer {}", token),
                Host::GitLab { .. } => format!("Bearer {}", token),
            };
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(AUTHORIZATION, value);
            }
        }

        headers
    }

    /// Resolves the newest matching reference: latest release, then the
    /// tag with the highest version, then the configured branch. Release
    /// and tag strategies only apply when tracking the default branch.
    pub async fn choose_reference(&self, branch: &str) -> Result<Option<VcsReference>> {
        if branch == "main" || branch == "master" {
            if let Some(reference) = self.latest_release().await? {
                return Ok(Some(reference));
            }
            if let Some(reference) = self.latest_tag().await? {
                return Ok(Some(reference));
            }
        }

        self.branch(branch).await
    }

    async fn latest_release(&self) -> Result<Option<VcsReference>> {
        match &self.host {
            Host::GitHub { owner, repo } => {
                let url = format!(
                    "https://api.github.com/repos/{}/{}/releases/latest",
                    owner, repo
                );
                let Some(release) = self.get_json(&url).await? else {
                    return Ok(None);
                };

                let Some(tag) = release.get("tag_name").and_then(Value::as_str) else {
                    return Ok(None);
                };

                Ok(Some(VcsReference {
                    name: tag.to_string(),
                    download_url: format!(
                        "https://api.github.com/repos/{}/{}/zipball/{}",
                        owner, repo, tag
                    ),
                }))
            }
            Host::GitLab { base, project } => {
                let url = format!(
                    "{}/api/v4/projects/{}/releases/permalink/latest",
                    base, project
                );
                let Some(release) = self.get_json(&url).await? else {
                    return Ok(None);
                };

                let Some(tag) = release.get("tag_name").and_then(Value::as_str) else {
                    return Ok(None);
                };

                Ok(Some(self.gitlab_archive_reference(base, project, tag)))
            }
        }
    }

    async fn latest_tag(&self) -> Result<Option<VcsReference>> {
        match &self.host {
            Host::GitHub { owner, repo } => {
                let url = format!("https://api.github.com/repos/{}/{}/tags", owner, repo);
                let Some(tags) = self.get_json(&url).await? else {
                    return Ok(None);
                };

                let best = highest_version_tag(&tags, |tag| {
                    tag.get("name").and_then(Value::as_str)
                });

                Ok(best.map(|name| VcsReference {
                    download_url: format!(
                        "https://api.github.com/repos/{}/{}/zipball/{}",
                        owner, repo, name
                    ),
                    name,
                }))
            }
            Host::GitLab { base, project } => {
                let url = format!("{}/api/v4/projects/{}/repository/tags", base, project);
                let Some(tags) = self.get_json(&url).await? else {
                    return Ok(None);
                };

                let best = highest_version_tag(&tags, |tag| {
                    tag.get("name").and_then(Value::as_str)
                });

                Ok(best.map(|name| self.gitlab_archive_reference(base, project, &name)))
            }
        }
    }

    async fn branch(&self, branch: &str) -> Result<Option<VcsReference>> {
        match &self.host {
            Host::GitHub { owner, repo } => {
                let url = format!(
                    "https://api.github.com/repos/{}/{}/branches/{}",
                    owner, repo, branch
                );
                if self.get_json(&url).await?.is_none() {
                    return Ok(None);
                }

                Ok(Some(VcsReference {
                    name: branch.to_string(),
                    download_url: format!(
                        "https://api.github.com/repos/{}/{}/zipball/{}",
                        owner, repo, branch
                    ),
                }))
            }
            Host::GitLab { base, project } => {
                let url = format!(
                    "{}/api/v4/projects/{}/repository/branches/{}",
                    base, project, branch
                );
                if self.get_json(&url).await?.is_none() {
                    return Ok(None);
                }

                Ok(Some(self.gitlab_archive_reference(base, project, branch)))
            }
        }
    }

    /// Contents of a single file at a reference, `None` when absent.
    pub async fn remote_file(&self, name: &str, reference: &str) -> Result<Option<String>> {
        let url = match &self.host {
            Host::GitHub { owner, repo } => format!(
                "https://raw.githubusercontent.com/{}/{}/{}/{}",
                owner, repo, reference, name
            ),
            Host::GitLab { base, project } => format!(
                "{}/api/v4/projects/{}/repository/files/{}/raw?ref={}",
                base,
                project,
                urlencoding::encode(name),
                reference
            ),
        };

        let response = self
            .client
            .get(&url)
            .headers(self.auth_headers())
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = response.error_for_status()?;
        Ok(Some(response.text().await?))
    }

    fn gitlab_archive_reference(&self, base: &str, project: &str, name: &str) -> VcsReference {
        VcsReference {
            name: name.to_string(),
            download_url: format!(
                "{}/api/v4/projects/{}/repository/archive.zip?sha={}",
                base, project, name
            ),
        }
    }

    // 404s read as "no such reference"; anything else non-2xx is an
    // infrastructure failure.
    async fn get_json(&self, url: &str) -> Result<Option<Value>> {
        let response = self
            .client
            .get(url)
            .headers(self.auth_headers())
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = response.error_for_status()?;
        Ok(Some(response.json().await?))
    }
}

fn parse_repo_url(repo_url: &str, self_hosted: bool) -> Option<Host> {
    let without_scheme = repo_url.split("://").nth(1)?;
    let mut parts = without_scheme.splitn(2, '/');
    let domain = parts.next()?;
    let path = parts.next()?.trim_matches('/');

    let scheme = repo_url.split("://").next()?;

    if domain == "github.com" && !self_hosted {
        let (owner, repo) = path.split_once('/')?;
        return Some(Host::GitHub {
            owner: owner.to_string(),
            repo: repo.to_string(),
        });
    }

    // Everything else, including self-hosted instances, speaks the GitLab
    // API; the project id is the URL-encoded namespace path.
    Some(Host::GitLab {
        base: format!("{}://{}", scheme, domain),
        project: urlencoding::encode(path).into_owned(),
    })
}

/// Name of the file whose headers carry the package version, per type.
pub fn main_file_name(slug: &str, package_type: PackageType) -> String {
    match package_type {
        PackageType::Plugin => format!("{}.php", slug),
        PackageType::Theme => "style.css".to_string(),
        PackageType::Generic => "depot.json".to_string(),
    }
}

/// Dotted-version comparison with a lenient pre-parse: missing components
/// are padded with zeros, a leading `v` is dropped.
pub fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    match (lenient_version(a), lenient_version(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => std::cmp::Ordering::Greater,
        (None, Some(_)) => std::cmp::Ordering::Less,
        (None, None) => a.cmp(b),
    }
}

pub fn lenient_version(raw: &str) -> Option<Version> {
    let trimmed = raw.trim().trim_start_matches(['v', 'V']);

    if let Ok(version) = Version::parse(trimmed) {
        return Some(version);
    }

    // Pad "1" and "1.2" out to three components.
    let core: Vec<&str> = trimmed.split('.').collect();
    let padded = match core.len() {
        1 => format!("{}.0.0", core[0]),
        2 => format!("{}.{}.0", core[0], core[1]),
        _ => return None,
    };

    Version::parse(&padded).ok()
}

fn highest_version_tag<'a>(
    tags: &'a Value,
    name: impl Fn(&'a Value) -> Option<&'a str>,
) -> Option<String> {
    tags.as_array()?
        .iter()
        .filter_map(|tag| {
            let name = name(tag)?;
            Some((lenient_version(name)?, name))
        })
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, name)| name.to_string())
}
