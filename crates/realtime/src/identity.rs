//! Identities: users, tenants, the authenticated actor and collaboration channels.

use serde::{Deserialize, Serialize};
use std::fmt;

/// User identifier
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Create a new user ID.
    pub fn new(id: impl Into<String>) -> Self {
        UserId(id.into())
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        UserId(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        UserId(s)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tenant (organization) identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub String);

impl TenantId {
    /// Create a new tenant ID.
    pub fn new(id: impl Into<String>) -> Self {
        TenantId(id.into())
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        TenantId(s.to_string())
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        TenantId(s)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who a user is, as supplied by the auth provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: UserId,
    pub name: String,
    pub email: String,
}

impl UserIdentity {
    pub fn new(id: impl Into<UserId>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.into(),
        }
    }
}

/// The authenticated actor a session acts on behalf of.
///
/// Every connect and send requires one; it is injected by the caller rather
/// than read from ambient state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorContext {
    pub user: UserIdentity,
    pub tenant_id: TenantId,
}

impl ActorContext {
    /// Create a new actor context.
    pub fn new(user: UserIdentity, tenant_id: impl Into<TenantId>) -> Self {
        Self {
            user,
            tenant_id: tenant_id.into(),
        }
    }

    /// The actor's user ID.
    pub fn user_id(&self) -> &UserId {
        &self.user.id
    }
}

/// A shared resource that a session collaborates on.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    pub resource_type: String,
    pub resource_id: String,
}

impl ResourceRef {
    pub fn new(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
        }
    }
}

/// Name of a collaboration channel.
///
/// Channels are always scoped to a tenant; a resource narrows the channel to
/// the peers looking at that resource.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub String);

impl ChannelId {
    /// Build the channel for a tenant, optionally scoped to a resource.
    pub fn for_scope(tenant_id: &TenantId, resource: Option<&ResourceRef>) -> Self {
        match resource {
            Some(r) => ChannelId(format!(
                "tenant/{}/{}/{}",
                tenant_id, r.resource_type, r.resource_id
            )),
            None => ChannelId(format!("tenant/{}", tenant_id)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Palette used for presence colors.
pub const PRESENCE_COLORS: [&str; 8] = [
    "#E91E63", // Pink
    "#9C27B0", // Purple
    "#3F51B5", // Indigo
    "#2196F3", // Blue
    "#00BCD4", // Cyan
    "#4CAF50", // Green
    "#FF9800", // Orange
    "#795548", // Brown
];

/// Derive a display color from a user ID (deterministic).
pub fn color_for(user_id: &UserId) -> String {
    let hash: usize = user_id.0.bytes().map(|b| b as usize).sum();
    PRESENCE_COLORS[hash % PRESENCE_COLORS.len()].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_assignment_deterministic() {
        let color1 = color_for(&UserId::new("user-123"));
        let color2 = color_for(&UserId::new("user-123"));
        assert_eq!(color1, color2);
        assert!(PRESENCE_COLORS.contains(&color1.as_str()));
    }

    #[test]
    fn test_channel_for_tenant() {
        let channel = ChannelId::for_scope(&TenantId::new("acme"), None);
        assert_eq!(channel.as_str(), "tenant/acme");
    }

    #[test]
    fn test_channel_for_resource() {
        let resource = ResourceRef::new("invoice", "inv-42");
        let channel = ChannelId::for_scope(&TenantId::new("acme"), Some(&resource));
        assert_eq!(channel.as_str(), "tenant/acme/invoice/inv-42");
    }

    #[test]
    fn test_actor_context_serialization() {
        let ctx = ActorContext::new(
            UserIdentity::new("user-1", "Alice", "alice@example.com"),
            "acme",
        );
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["tenantId"], "acme");
        assert_eq!(json["user"]["id"], "user-1");

        let back: ActorContext = serde_json::from_value(json).unwrap();
        assert_eq!(back, ctx);
    }
}
