use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Profile row for an identity issued by the auth provider.
///
/// The `id` is the auth provider's user id; the row is written right after signup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub display_name: Option<String>,
}

impl User {
    pub fn new(id: Uuid, email: String, username: Option<String>, display_name: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            email,
            username,
            display_name,
            created_at: now,
            updated_at: now,
        }
    }

    /// Name shown in chat; falls back to the local part of the email.
    pub fn preferred_name(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.username.as_deref())
            .unwrap_or_else(|| self.email.split('@').next().unwrap_or(&self.email))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preferred_name_falls_back_to_email_local_part() {
        let mut user = User::new(Uuid::new_v4(), "sam@example.com".to_string(), None, None);
        assert_eq!(user.preferred_name(), "sam");

        user.username = Some("sammy".to_string());
        assert_eq!(user.preferred_name(), "sammy");

        user.display_name = Some("Sam".to_string());
        assert_eq!(user.preferred_name(), "Sam");
    }
}
