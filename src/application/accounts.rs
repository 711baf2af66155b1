use crate::domain::{ProfileUpdate, User};
use crate::infrastructure::{
    AuthProvider, AuthProviderError, AuthSession, AuthUser, ConversationRepository, RepositoryError,
    UserRepository,
};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AccountError {
    #[error("Authentication required")]
    Unauthenticated,
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Rejected: {0}")]
    Rejected(String),
    #[error("Auth provider error: {0}")]
    Provider(AuthProviderError),
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl From<AuthProviderError> for AccountError {
    fn from(err: AuthProviderError) -> Self {
        match err {
            AuthProviderError::Unauthorized => AccountError::InvalidCredentials,
            AuthProviderError::Rejected(message) => AccountError::Rejected(message),
            other => AccountError::Provider(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignUpResult {
    pub user: User,
    /// Absent while the provider waits for email confirmation.
    pub session: Option<AuthSession>,
}

#[derive(Debug, Clone)]
pub struct ProfileView {
    pub user: User,
    pub tokens: Option<i32>,
}

pub struct AccountService<U, C, A>
where
    U: UserRepository,
    C: ConversationRepository,
    A: AuthProvider,
{
    user_repo: Arc<U>,
    conversation_repo: Arc<C>,
    auth: Arc<A>,
}

impl<U, C, A> AccountService<U, C, A>
where
    U: UserRepository,
    C: ConversationRepository,
    A: AuthProvider,
{
    pub fn new(user_repo: Arc<U>, conversation_repo: Arc<C>, auth: Arc<A>) -> Self {
        Self {
            user_repo,
            conversation_repo,
            auth,
        }
    }

    /// Resolve a bearer token to the caller's identity.
    pub async fn authenticate(&self, token: Option<&str>) -> Result<AuthUser, AccountError> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or(AccountError::Unauthenticated)?;
        match self.auth.get_user(token).await {
            Ok(user) => Ok(user),
            Err(AuthProviderError::Unauthorized) => Err(AccountError::Unauthenticated),
            Err(e) => Err(AccountError::Provider(e)),
        }
    }

    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        username: Option<String>,
        display_name: Option<String>,
    ) -> Result<SignUpResult, AccountError> {
        let metadata = json!({ "username": username, "display_name": display_name });
        let outcome = self.auth.sign_up(email, password, metadata).await?;

        let user = User::new(
            outcome.user.id,
            outcome.user.email.clone().unwrap_or_else(|| email.to_string()),
            username,
            display_name,
        );
        self.user_repo.ensure(&user).await?;
        info!(user_id = %user.id, confirmed = outcome.session.is_some(), "User signed up");

        Ok(SignUpResult {
            user,
            session: outcome.session,
        })
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, AccountError> {
        let session = self.auth.sign_in_with_password(email, password).await?;

        let profile = User::new(
            session.user.id,
            session.user.email.clone().unwrap_or_else(|| email.to_string()),
            None,
            None,
        );
        if let Err(e) = self.user_repo.ensure(&profile).await {
            warn!(user_id = %profile.id, error = %e, "Failed to ensure profile on login");
        }

        Ok(session)
    }

    pub async fn sign_out(&self, token: &str) -> Result<(), AccountError> {
        match self.auth.sign_out(token).await {
            Ok(()) | Err(AuthProviderError::Unauthorized) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn profile(&self, user: &AuthUser, influencer_id: Uuid) -> Result<ProfileView, AccountError> {
        let profile = match self.user_repo.get_by_id(user.id).await {
            Ok(profile) => profile,
            Err(RepositoryError::NotFound(_)) => {
                let profile = User::new(user.id, user.email.clone().unwrap_or_default(), None, None);
                self.user_repo.ensure(&profile).await?;
                profile
            }
            Err(e) => return Err(e.into()),
        };
        let tokens = self
            .conversation_repo
            .find(user.id, influencer_id)
            .await?
            .map(|c| c.tokens);

        Ok(ProfileView {
            user: profile,
            tokens,
        })
    }

    pub async fn update_profile(&self, user: &AuthUser, update: ProfileUpdate) -> Result<User, AccountError> {
        let update = ProfileUpdate {
            username: update.username.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            display_name: update.display_name.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
        };
        Ok(self.user_repo.update_profile(user.id, &update).await?)
    }
}
