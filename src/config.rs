use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub base_url: String,
    /// Directory holding `{slug}.zip` package archives.
    pub packages_dir: PathBuf,
    /// Directory for the filesystem metadata cache.
    pub cache_dir: PathBuf,
    pub dev_mode: bool,
    /// Server secret mixed into nonce generation.
    pub nonce_salt: String,
    /// Enable/disable license handling entirely
    pub use_licenses: bool,
    /// Enable syncing missing packages from a VCS host
    pub vcs_enabled: bool,
    /// Base URL of the VCS project, e.g. https://github.com/acme/
    pub vcs_url: String,
    pub vcs_branch: String,
    /// Token used in authorization headers for private repositories
    pub vcs_credentials: Option<String>,
    /// Self-hosted VCS (treated as GitLab-compatible)
    pub vcs_self_hosted: bool,
    /// Slugs allowed to sync from the VCS host; empty = allow all
    pub package_whitelist: Vec<String>,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("DEPOT_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let base_url =
            env::var("BASE_URL").unwrap_or_else(|_| format!("http://{}:{}", host, port));

        let nonce_salt = env::var("DEPOT_SALT").unwrap_or_else(|_| {
            use rand::RngCore;
            let mut bytes = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut bytes);
            hex::encode(bytes)
        });

        let use_licenses = env::var("DEPOT_USE_LICENSES")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let vcs_enabled = env::var("DEPOT_VCS_ENABLED")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let package_whitelist = env::var("DEPOT_PACKAGE_WHITELIST")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "depot.db".to_string()),
            base_url,
            packages_dir: env::var("DEPOT_PACKAGES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("packages")),
            cache_dir: env::var("DEPOT_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("cache")),
            dev_mode,
            nonce_salt,
            use_licenses,
            vcs_enabled,
            vcs_url: env::var("DEPOT_VCS_URL").unwrap_or_default(),
            vcs_branch: env::var("DEPOT_VCS_BRANCH").unwrap_or_else(|_| "main".to_string()),
            vcs_credentials: env::var("DEPOT_VCS_CREDENTIALS").ok(),
            vcs_self_hosted: env::var("DEPOT_VCS_SELF_HOSTED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            package_whitelist,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Path of the local archive for a package slug.
    pub fn archive_path(&self, slug: &str) -> PathBuf {
        self.packages_dir.join(format!("{}.zip", slug))
    }
}
