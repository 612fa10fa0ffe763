use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

/// Action families a private API credential may be granted.
///
/// `All` covers every action; `Other` additionally lets the holder operate
/// on records owned by a different credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ApiAccess {
    All,
    Browse,
    Read,
    Edit,
    Add,
    Delete,
    Other,
}

/// An out-of-band `(key_id, secret)` pair used by the request-signature
/// protocol, plus the access list granted to it for the private License
/// API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCredential {
    pub key_id: String,
    /// Shared secret; the server needs the raw value to recompute HMACs,
    /// so it is stored as-is and never serialized outward.
    #[serde(skip_serializing)]
    pub secret: String,
    pub access: Vec<ApiAccess>,
    pub created_at: i64,
}

impl ApiCredential {
    pub fn grants(&self, action: &str) -> bool {
        self.access
            .iter()
            .any(|a| *a == ApiAccess::All || a.as_ref() == action)
    }

    pub fn grants_other(&self) -> bool {
        self.access.contains(&ApiAccess::Other)
    }
}
