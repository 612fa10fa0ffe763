use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, EnumString};

/// Sentinel for "no date set" in `date_renewed` / `date_expiry`.
pub const UNSET_DATE: &str = "0000-00-00";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum LicenseStatus {
    Pending,
    Activated,
    Deactivated,
    OnHold,
    Blocked,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PackageType {
    Generic,
    Plugin,
    Theme,
}

/// A license record. `hmac_key` and `crypto_key` are generated once at
/// creation and never change; they bind every signature to this exact
/// record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    pub id: String,
    pub license_key: String,
    pub max_allowed_domains: i64,
    pub allowed_domains: Vec<String>,
    pub status: LicenseStatus,
    pub owner_name: String,
    pub email: String,
    pub company_name: String,
    pub txn_id: String,
    /// YYYY-MM-DD
    pub date_created: String,
    pub date_renewed: String,
    pub date_expiry: String,
    pub package_slug: String,
    pub package_type: PackageType,
    pub hmac_key: String,
    pub crypto_key: String,
    pub data: Map<String, Value>,
}

impl License {
    pub fn has_domain(&self, domain: &str) -> bool {
        self.allowed_domains.iter().any(|d| d == domain)
    }

    /// Unix timestamp before which the next deactivation is refused,
    /// if one was recorded.
    pub fn next_deactivate(&self) -> Option<i64> {
        self.data.get("next_deactivate").and_then(Value::as_i64)
    }

    /// Credential key id that created this record through the API, if any.
    pub fn api_owner(&self) -> Option<&str> {
        self.data.get("api_owner").and_then(Value::as_str)
    }
}

/// License fields exposed by the public activate/deactivate actions.
/// Owner identity, the signing keys, and the data map stay private.
#[derive(Debug, Clone, Serialize)]
pub struct LicensePublicInfo {
    pub id: String,
    pub license_key: String,
    pub max_allowed_domains: i64,
    pub allowed_domains: Vec<String>,
    pub status: LicenseStatus,
    pub txn_id: String,
    pub date_created: String,
    pub date_renewed: String,
    pub date_expiry: String,
    pub package_slug: String,
    pub package_type: PackageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_deactivate: Option<i64>,
}

impl From<License> for LicensePublicInfo {
    fn from(license: License) -> Self {
        Self {
            id: license.id,
            license_key: license.license_key,
            max_allowed_domains: license.max_allowed_domains,
            allowed_domains: license.allowed_domains,
            status: license.status,
            txn_id: license.txn_id,
            date_created: license.date_created,
            date_renewed: license.date_renewed,
            date_expiry: license.date_expiry,
            package_slug: license.package_slug,
            package_type: license.package_type,
            license_signature: None,
            next_deactivate: None,
        }
    }
}

/// License fields exposed by the public check action: no domain list
/// (only its size) and no transaction reference.
#[derive(Debug, Clone, Serialize)]
pub struct LicenseCheckInfo {
    pub id: String,
    pub license_key: String,
    pub max_allowed_domains: i64,
    pub num_allowed_domains: usize,
    pub status: LicenseStatus,
    pub date_created: String,
    pub date_renewed: String,
    pub date_expiry: String,
    pub package_slug: String,
    pub package_type: PackageType,
}

impl From<License> for LicenseCheckInfo {
    fn from(license: License) -> Self {
        Self {
            id: license.id,
            license_key: license.license_key,
            max_allowed_domains: license.max_allowed_domains,
            num_allowed_domains: license.allowed_domains.len(),
            status: license.status,
            date_created: license.date_created,
            date_renewed: license.date_renewed,
            date_expiry: license.date_expiry,
            package_slug: license.package_slug,
            package_type: license.package_type,
        }
    }
}

/// Validated field changes for a partial license update. Built by the
/// license engine after payload validation; `None` leaves the column
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct LicenseUpdate {
    pub license_key: Option<String>,
    pub max_allowed_domains: Option<i64>,
    pub allowed_domains: Option<Vec<String>>,
    pub status: Option<LicenseStatus>,
    pub owner_name: Option<String>,
    pub email: Option<String>,
    pub company_name: Option<String>,
    pub txn_id: Option<String>,
    pub date_created: Option<String>,
    pub date_renewed: Option<String>,
    pub date_expiry: Option<String>,
    pub package_slug: Option<String>,
    pub package_type: Option<PackageType>,
    pub data: Option<Map<String, Value>>,
}

/// Write payload for add/edit/delete/read. Everything is optional; the
/// engine validates in full mode (add) or partial mode (edit) and reports
/// failures as a field -> message map rather than an error.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LicensePayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub license_key: Option<String>,
    #[serde(default)]
    pub max_allowed_domains: Option<i64>,
    #[serde(default)]
    pub allowed_domains: Option<Vec<Value>>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub owner_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub txn_id: Option<String>,
    #[serde(default)]
    pub date_created: Option<String>,
    #[serde(default)]
    pub date_renewed: Option<String>,
    #[serde(default)]
    pub date_expiry: Option<String>,
    #[serde(default)]
    pub package_slug: Option<String>,
    #[serde(default)]
    pub package_type: Option<String>,
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
}
