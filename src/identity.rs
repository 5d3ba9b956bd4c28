use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ServiceError;

/// Caller as resolved by the upstream gateway. Guests have no user id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    user_id: Option<Uuid>,
}

impl Identity {
    pub fn guest() -> Self {
        Self { user_id: None }
    }

    pub fn user(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.user_id
    }

    /// The user id, or `Unauthorized` for guests.
    pub fn require_user(&self) -> Result<Uuid, ServiceError> {
        self.user_id
            .ok_or_else(|| ServiceError::Unauthorized("sign in required".to_string()))
    }
}

impl From<Option<Uuid>> for Identity {
    fn from(user_id: Option<Uuid>) -> Self {
        Self { user_id }
    }
}
