//! Typed helpers for the calls services actually make to each other.
//!
//! Cache keys and TTLs follow the platform conventions: user records 5
//! minutes, team lookups 2 minutes, member lists 1 minute, notification
//! lists 30 seconds. Keys are explicit so writers can invalidate precisely.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use super::{ServiceClient, unwrap_envelope};
use crate::Result;
use crate::config::ServicesConfig;

const USER_TTL: Duration = Duration::from_secs(300);
const TEAM_TTL: Duration = Duration::from_secs(120);
const MEMBERS_TTL: Duration = Duration::from_secs(60);
const NOTIFICATIONS_TTL: Duration = Duration::from_secs(30);

/// Typed facade over the mesh endpoints other services expose under
/// `/internal`.
#[derive(Clone)]
pub struct MeshApi {
    client: Arc<ServiceClient>,
    services: ServicesConfig,
}

impl MeshApi {
    /// Create a facade over `client` using the configured service URLs.
    #[must_use]
    pub fn new(client: Arc<ServiceClient>, services: ServicesConfig) -> Self {
        Self { client, services }
    }

    /// Shared access to the underlying client.
    #[must_use]
    pub fn client(&self) -> &Arc<ServiceClient> {
        &self.client
    }

    /// Look up a user record by its external identity-provider subject id.
    pub async fn user_by_external_id(&self, external_id: &str) -> Result<Value> {
        let url = format!(
            "{}/internal/users/external/{external_id}",
            self.services.user_url
        );
        let body = self
            .client
            .get_cached(
                "user-service",
                &url,
                &format!("user:external:{external_id}"),
                USER_TTL,
            )
            .await?;
        Ok(unwrap_envelope(body))
    }

    /// Fetch a user record by internal id.
    pub async fn user(&self, user_id: &str) -> Result<Value> {
        let url = format!("{}/internal/users/{user_id}", self.services.user_url);
        let body = self
            .client
            .get_cached("user-service", &url, &format!("user:{user_id}"), USER_TTL)
            .await?;
        Ok(unwrap_envelope(body))
    }

    /// Fetch a team.
    pub async fn team(&self, team_id: &str) -> Result<Value> {
        let url = format!("{}/internal/teams/{team_id}", self.services.team_url);
        let body = self
            .client
            .get_cached("team-service", &url, &format!("team:{team_id}"), TEAM_TTL)
            .await?;
        Ok(unwrap_envelope(body))
    }

    /// Whether `user_id` is a member of `team_id`.
    ///
    /// Used by the project and chat services for edit-authorization checks.
    pub async fn is_team_member(&self, team_id: &str, user_id: &str) -> Result<bool> {
        let url = format!(
            "{}/internal/teams/{team_id}/members/{user_id}/check",
            self.services.team_url
        );
        let body = self
            .client
            .get_cached(
                "team-service",
                &url,
                &format!("team:{team_id}:member:{user_id}"),
                TEAM_TTL,
            )
            .await?;
        Ok(unwrap_envelope(body).as_bool().unwrap_or(false))
    }

    /// Member list of a team.
    pub async fn team_members(&self, team_id: &str) -> Result<Value> {
        let url = format!(
            "{}/internal/teams/{team_id}/members",
            self.services.team_url
        );
        let body = self
            .client
            .get_cached(
                "team-service",
                &url,
                &format!("team:{team_id}:members"),
                MEMBERS_TTL,
            )
            .await?;
        Ok(unwrap_envelope(body))
    }

    /// Create an in-app notification, then invalidate the recipient's
    /// cached notification lists.
    pub async fn create_notification(
        &self,
        user_id: &str,
        kind: &str,
        title: &str,
        message: &str,
    ) -> Result<Value> {
        let url = format!(
            "{}/internal/notifications",
            self.services.notification_url
        );
        let body = json!({
            "userId": user_id,
            "type": kind,
            "title": title,
            "message": message,
        });
        let created = self
            .client
            .post("notification-service", &url, &body)
            .await?;
        self.client
            .invalidate(&format!("notifications:user:{user_id}:all"))
            .await;
        self.client
            .invalidate(&format!("notifications:user:{user_id}:unread"))
            .await;
        Ok(unwrap_envelope(created))
    }

    /// A user's notifications, optionally unread-only.
    pub async fn user_notifications(&self, user_id: &str, unread_only: bool) -> Result<Value> {
        let suffix = if unread_only { "?unread=true" } else { "" };
        let url = format!(
            "{}/internal/notifications/user/{user_id}{suffix}",
            self.services.notification_url
        );
        let scope = if unread_only { "unread" } else { "all" };
        let body = self
            .client
            .get_cached(
                "notification-service",
                &url,
                &format!("notifications:user:{user_id}:{scope}"),
                NOTIFICATIONS_TTL,
            )
            .await?;
        Ok(unwrap_envelope(body))
    }
}
