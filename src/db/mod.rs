pub mod from_row;
pub mod queries;

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::cache::FileCache;
use crate::config::Config;
use crate::error::Result;
use crate::license::signature::{NoSignatureBypass, SignatureBypass};
use crate::nonce::{ClearOnExpiry, ExpiryHook};
use crate::sync::{PackageWhitelist, SyncPolicy};

pub type DbPool = Pool<SqliteConnectionManager>;

/// Shared application state handed to every handler.
///
/// The three strategy fields are seams for deployments that need to veto
/// package syncs, skip signature checks, or substitute expired nonce
/// values. The defaults wired by [`AppState::with_pool`] keep stock
/// behavior: whitelist from config, no bypass, expired values cleared.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Arc<Config>,
    pub cache: FileCache,
    pub sync_policy: Arc<dyn SyncPolicy>,
    pub signature_bypass: Arc<dyn SignatureBypass>,
    pub expiry_hook: Arc<dyn ExpiryHook>,
}

impl AppState {
    /// Opens the SQLite database at the configured path and initializes
    /// the schema.
    pub fn new(config: Config) -> Result<Self> {
        let manager = SqliteConnectionManager::file(&config.database_path).with_init(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
            )
        });
        let pool = Pool::builder().build(manager)?;
        {
            let conn = pool.get()?;
            init_db(&conn)?;
        }
        Self::with_pool(config, pool)
    }

    /// Builds the state around an existing pool. The caller is expected
    /// to have run [`init_db`] already.
    pub fn with_pool(config: Config, db: DbPool) -> Result<Self> {
        let cache = FileCache::new(&config.cache_dir)?;
        let sync_policy = Arc::new(PackageWhitelist::from_config(&config));
        Ok(Self {
            db,
            cache,
            sync_policy,
            signature_bypass: Arc::new(NoSignatureBypass),
            expiry_hook: Arc::new(ClearOnExpiry),
            config: Arc::new(config),
        })
    }
}

/// Creates all tables and indexes. Idempotent.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS licenses (
            id TEXT PRIMARY KEY,
            license_key TEXT NOT NULL UNIQUE,
            max_allowed_domains INTEGER NOT NULL DEFAULT 1,
            allowed_domains TEXT NOT NULL DEFAULT '[]',
            status TEXT NOT NULL DEFAULT 'pending',
            owner_name TEXT NOT NULL DEFAULT '',
            email TEXT NOT NULL,
            company_name TEXT NOT NULL DEFAULT '',
            txn_id TEXT NOT NULL DEFAULT '',
            date_created TEXT NOT NULL,
            date_renewed TEXT NOT NULL DEFAULT '0000-00-00',
            date_expiry TEXT NOT NULL DEFAULT '0000-00-00',
            package_slug TEXT NOT NULL,
            package_type TEXT NOT NULL,
            hmac_key TEXT NOT NULL,
            crypto_key TEXT NOT NULL,
            data TEXT NOT NULL DEFAULT '{}'
        );

        CREATE INDEX IF NOT EXISTS idx_licenses_package_slug
            ON licenses(package_slug);
        CREATE INDEX IF NOT EXISTS idx_licenses_status_expiry
            ON licenses(status, date_expiry);

        CREATE TABLE IF NOT EXISTS nonces (
            nonce TEXT PRIMARY KEY,
            true_nonce INTEGER NOT NULL DEFAULT 1,
            expiry INTEGER NOT NULL,
            data TEXT NOT NULL DEFAULT '{}'
        );

        CREATE INDEX IF NOT EXISTS idx_nonces_expiry ON nonces(expiry);

        CREATE TABLE IF NOT EXISTS api_credentials (
            key_id TEXT PRIMARY KEY,
            secret TEXT NOT NULL,
            access TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sync_locks (
            slug TEXT PRIMARY KEY,
            expires_at INTEGER NOT NULL
        );",
    )?;
    Ok(())
}
