//! Caller identity types shared by the gateway and downstream services

use serde::{Deserialize, Serialize};

/// Identity asserted by the external identity provider's token.
///
/// Not persisted; lives only for the request that carried the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    /// Opaque subject id (`sub` claim)
    pub subject: String,
    /// Email address, when the provider includes it
    pub email: Option<String>,
    /// Display name, when the provider includes it
    pub name: Option<String>,
}

/// The resolved internal identity of the authenticated caller.
///
/// Built once per request at the gateway, serialized into the internal
/// token, and reconstructed by downstream trust middleware. Never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    /// Internal user record id
    pub user_id: String,
    /// Subject id at the external identity provider
    pub external_id: String,
    /// Email address
    pub email: String,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Principal {
    /// Minimal principal for the user-sync bootstrap path, where the user
    /// record may not exist yet. The external subject id stands in for the
    /// internal id until the sync endpoint creates the record.
    #[must_use]
    pub fn bootstrap(identity: &ExternalIdentity, fallback_email: Option<&str>) -> Self {
        let email = identity
            .email
            .clone()
            .or_else(|| fallback_email.map(str::to_string))
            .unwrap_or_else(|| "unknown@identity.invalid".to_string());
        Self {
            user_id: identity.subject.clone(),
            external_id: identity.subject.clone(),
            email,
            name: identity.name.clone(),
        }
    }
}
