//! Account model shared by the credential store, the auth layer, and the
//! HTTP surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of an authenticated principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Agent,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Agent => "agent",
            Role::Admin => "admin",
        }
    }
}

/// A support-console account as persisted in the credential store.
///
/// `identifier` is globally unique (enforced by the store, stored lowercased).
/// `active` is the live revocation flag: tokens stay structurally valid for
/// their full TTL, so every authorization path re-checks this field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub identifier: String,
    pub secret_hash: String,
    pub role: Role,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    pub active: bool,
    #[serde(default)]
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Public view of an account with the secret hash stripped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountView {
    pub id: String,
    pub identifier: String,
    pub role: Role,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    pub active: bool,
    #[serde(default)]
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&Account> for AccountView {
    fn from(account: &Account) -> Self {
        AccountView {
            id: account.id.clone(),
            identifier: account.identifier.clone(),
            role: account.role,
            display_name: account.display_name.clone(),
            department: account.department.clone(),
            active: account.active,
            last_login_at: account.last_login_at,
            created_at: account.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
        assert_eq!(
            serde_json::from_str::<Role>("\"agent\"").unwrap(),
            Role::Agent
        );
    }

    #[test]
    fn test_account_view_strips_secret_hash() {
        let account = Account {
            id: "a1".to_string(),
            identifier: "agent@example.com".to_string(),
            secret_hash: "pbkdf2-sha256$1$00$00".to_string(),
            role: Role::Agent,
            display_name: "Agent One".to_string(),
            department: Some("Billing".to_string()),
            active: true,
            last_login_at: None,
            created_at: Utc::now(),
        };
        let view = AccountView::from(&account);
        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("secret_hash").is_none());
        assert_eq!(json["identifier"], "agent@example.com");
    }
}
