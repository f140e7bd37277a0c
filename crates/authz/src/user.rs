//! User records.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use tourdesk_core::{AccessError, AccessResult, UserId};
use tourdesk_store::{Record, RecordId, RecordStore, TypedStore};

use crate::role::RoleName;

/// A back-office user. Users are a sensitive class: single-record reads are
/// audited. The credential fields below are always scrubbed from audit
/// payloads by the denylist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub role: RoleName,
    pub organization: Option<String>,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_data: Option<JsonValue>,
}

impl User {
    pub fn new(id: UserId, username: impl Into<String>, role: impl Into<RoleName>) -> Self {
        Self {
            id,
            username: username.into(),
            role: role.into(),
            organization: None,
            active: true,
            password_hash: None,
            session_token: None,
            auth_data: None,
        }
    }

    pub fn in_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

impl Record for User {
    const CLASS: &'static str = "User";

    fn record_id(&self) -> RecordId {
        RecordId::from(self.id)
    }
}

/// Load a user, mapping absence to `NotFound`.
pub(crate) fn load_user(store: &dyn RecordStore, user_id: UserId) -> AccessResult<User> {
    store
        .get_typed::<User>(&RecordId::from(user_id))?
        .ok_or_else(|| AccessError::not_found(format!("user {user_id}")))
}
