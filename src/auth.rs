//! Authentication collaborator contract.
//!
//! The provider itself is external; this module only holds the current
//! session, keeps it fresh, and turns provider errors into specific,
//! localized messages with an optional corrective action.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::poem::Language;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: String,
    pub email: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn expires_within(&self, margin: ChronoDuration, now: DateTime<Utc>) -> bool {
        self.expires_at - margin <= now
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("email already registered")]
    AlreadyRegistered,
    #[error("email not confirmed")]
    EmailNotConfirmed,
    #[error("password too weak")]
    WeakPassword,
    #[error("too many attempts")]
    RateLimited,
    #[error("session expired")]
    SessionExpired,
    #[error("network error: {0}")]
    Network(String),
    #[error("{0}")]
    Other(String),
}

/// What the form should offer next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestedAction {
    SwitchToSignIn,
    SwitchToSignUp,
    ResetPassword,
    RetryLater,
    SignInAgain,
}

impl AuthFailure {
    /// Maps a provider's raw error text onto a specific failure.
    pub fn classify(raw: &str) -> Self {
        let lower = raw.to_lowercase();
        if lower.contains("invalid login") || lower.contains("invalid credentials") {
            AuthFailure::InvalidCredentials
        } else if lower.contains("already registered") || lower.contains("already exists") {
            AuthFailure::AlreadyRegistered
        } else if lower.contains("not confirmed") {
            AuthFailure::EmailNotConfirmed
        } else if lower.contains("password should be") || lower.contains("weak password") {
            AuthFailure::WeakPassword
        } else if lower.contains("rate limit") || lower.contains("too many") {
            AuthFailure::RateLimited
        } else if lower.contains("refresh token") || lower.contains("jwt expired") {
            AuthFailure::SessionExpired
        } else if lower.contains("network") || lower.contains("fetch") {
            AuthFailure::Network(raw.to_string())
        } else {
            AuthFailure::Other(raw.to_string())
        }
    }

    pub fn message(&self, language: Language) -> String {
        let (fa, en) = match self {
            AuthFailure::InvalidCredentials => {
                ("ایمیل یا رمز عبور نادرست است", "Incorrect email or password")
            }
            AuthFailure::AlreadyRegistered => (
                "این ایمیل قبلاً ثبت شده است. وارد شوید",
                "This email is already registered. Please sign in",
            ),
            AuthFailure::EmailNotConfirmed => (
                "لطفاً ابتدا ایمیل خود را تأیید کنید",
                "Please confirm your email first",
            ),
            AuthFailure::WeakPassword => (
                "رمز عبور باید حداقل ۶ کاراکتر باشد",
                "Password must be at least 6 characters",
            ),
            AuthFailure::RateLimited => (
                "تلاش‌های زیادی انجام شد. کمی بعد دوباره امتحان کنید",
                "Too many attempts. Please try again shortly",
            ),
            AuthFailure::SessionExpired => (
                "نشست شما منقضی شده است. دوباره وارد شوید",
                "Your session has expired. Please sign in again",
            ),
            AuthFailure::Network(_) => (
                "خطا در اتصال به شبکه",
                "Network error. Check your connection",
            ),
            AuthFailure::Other(raw) => return raw.clone(),
        };
        match language {
            Language::Persian => fa.to_string(),
            Language::English => en.to_string(),
        }
    }

    pub fn suggested_action(&self) -> Option<SuggestedAction> {
        match self {
            AuthFailure::AlreadyRegistered => Some(SuggestedAction::SwitchToSignIn),
            AuthFailure::InvalidCredentials => Some(SuggestedAction::ResetPassword),
            AuthFailure::RateLimited | AuthFailure::Network(_) => Some(SuggestedAction::RetryLater),
            AuthFailure::SessionExpired => Some(SuggestedAction::SignInAgain),
            AuthFailure::EmailNotConfirmed | AuthFailure::WeakPassword | AuthFailure::Other(_) => {
                None
            }
        }
    }
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthFailure>;
    async fn sign_up(&self, email: &str, password: &str) -> Result<Session, AuthFailure>;
    async fn reset_password(&self, email: &str) -> Result<(), AuthFailure>;
    async fn update_password(&self, session: &Session, new_password: &str) -> Result<(), AuthFailure>;
    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, AuthFailure>;
}

/// Holds the signed-in session; its `user_id` namespaces favorites and profile.
pub struct SessionManager {
    provider: Arc<dyn AuthProvider>,
    current: RwLock<Option<Session>>,
    refresh_margin: ChronoDuration,
}

impl SessionManager {
    pub fn new(provider: Arc<dyn AuthProvider>) -> Self {
        Self {
            provider,
            current: RwLock::new(None),
            refresh_margin: ChronoDuration::seconds(60),
        }
    }

    pub fn current(&self) -> Option<Session> {
        self.current.read().clone()
    }

    pub fn user_id(&self) -> Option<String> {
        self.current.read().as_ref().map(|s| s.user_id.clone())
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthFailure> {
        let session = self.provider.sign_in(email, password).await?;
        info!(user_id = %session.user_id, "signed in");
        *self.current.write() = Some(session.clone());
        Ok(session)
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Session, AuthFailure> {
        let session = self.provider.sign_up(email, password).await?;
        info!(user_id = %session.user_id, "signed up");
        *self.current.write() = Some(session.clone());
        Ok(session)
    }

    pub async fn reset_password(&self, email: &str) -> Result<(), AuthFailure> {
        self.provider.reset_password(email).await
    }

    pub async fn update_password(&self, new_password: &str) -> Result<(), AuthFailure> {
        let session = self.current().ok_or(AuthFailure::SessionExpired)?;
        self.provider.update_password(&session, new_password).await
    }

    pub fn sign_out(&self) {
        if let Some(session) = self.current.write().take() {
            info!(user_id = %session.user_id, "signed out");
        }
    }

    /// Refreshes the session when it is about to expire. A failed refresh signs out.
    pub async fn ensure_fresh(&self, now: DateTime<Utc>) -> Result<Option<Session>, AuthFailure> {
        let Some(session) = self.current() else {
            return Ok(None);
        };
        if !session.expires_within(self.refresh_margin, now) {
            return Ok(Some(session));
        }
        debug!(user_id = %session.user_id, "refreshing session");
        match self.provider.refresh_session(&session.refresh_token).await {
            Ok(fresh) => {
                *self.current.write() = Some(fresh.clone());
                Ok(Some(fresh))
            }
            Err(e) => {
                warn!(user_id = %session.user_id, error = %e, "session refresh failed");
                self.current.write().take();
                Err(e)
            }
        }
    }
}
