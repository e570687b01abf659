//! The portal's session cache.
//!
//! The only writers are [`login`] (stores the whole record) and [`logout`]
//! (purges it). Readers get an explicit [`SessionState`]; a cached value that
//! no longer decodes is purged and reads as logged out.

use actix_session::Session;
use chrono::Utc;

use crate::api::ApiClient;
use crate::errors::{ApiError, AppError};
use crate::structs::SessionUser;

const USER_KEY: &str = "user";
const API_COOKIE_KEY: &str = "api_cookie";
const VALIDATED_AT_KEY: &str = "validated_at";

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    LoggedOut,
    Active(SessionUser),
}

impl SessionState {
    pub fn user(&self) -> Option<&SessionUser> {
        match self {
            SessionState::Active(user) => Some(user),
            SessionState::LoggedOut => None,
        }
    }
}

#[derive(Clone)]
pub struct SessionCache {
    session: Session,
}

impl SessionCache {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub fn load(&self) -> SessionState {
        match self.session.get::<SessionUser>(USER_KEY) {
            Ok(Some(user)) => SessionState::Active(user),
            Ok(None) => SessionState::LoggedOut,
            Err(e) => {
                log::warn!("Discarding unreadable session record: {}", e);
                self.session.purge();
                SessionState::LoggedOut
            }
        }
    }

    pub fn store(&self, user: &SessionUser, api_cookie: Option<&str>) -> Result<(), AppError> {
        self.session.renew();
        self.session
            .insert(USER_KEY, user)
            .map_err(|e| AppError::SessionError(e.to_string()))?;
        match api_cookie {
            Some(cookie) => self
                .session
                .insert(API_COOKIE_KEY, cookie)
                .map_err(|e| AppError::SessionError(e.to_string()))?,
            None => {
                self.session.remove(API_COOKIE_KEY);
            }
        }
        self.mark_validated()
    }

    pub fn clear(&self) {
        self.session.purge();
    }

    /// Cookie header forwarded to the budget API.
    pub fn api_cookie(&self) -> Option<String> {
        self.session.get::<String>(API_COOKIE_KEY).ok().flatten()
    }

    fn mark_validated(&self) -> Result<(), AppError> {
        self.session
            .insert(VALIDATED_AT_KEY, Utc::now().timestamp())
            .map_err(|e| AppError::SessionError(e.to_string()))
    }

    pub fn is_stale(&self, max_age_secs: i64, now: i64) -> bool {
        match self.session.get::<i64>(VALIDATED_AT_KEY).ok().flatten() {
            Some(at) => now - at >= max_age_secs,
            None => true,
        }
    }

    /// Re-checks a cached session against the current-user endpoint once it
    /// is older than `max_age_secs` (0 disables the check). Auth failures log
    /// the user out; transport failures keep the cached session.
    pub async fn revalidate(&self, api: &ApiClient, max_age_secs: i64) -> SessionState {
        let state = self.load();
        if max_age_secs <= 0
            || state == SessionState::LoggedOut
            || !self.is_stale(max_age_secs, Utc::now().timestamp())
        {
            return state;
        }

        match api.current_user().await {
            Ok(user) => {
                let cookie = self.api_cookie();
                if let Err(e) = self.store(&user, cookie.as_deref()) {
                    log::error!("Failed to refresh session: {}", e);
                }
                SessionState::Active(user)
            }
            Err(e) if e.is_auth_failure() => {
                log::info!("Remote session ended, logging out");
                self.clear();
                SessionState::LoggedOut
            }
            Err(e) => {
                log::warn!("Session revalidation skipped: {}", e);
                state
            }
        }
    }

    /// The cached user, or the API's current user when nothing is cached.
    pub async fn resolve(&self, api: &ApiClient) -> Result<SessionUser, AppError> {
        if let SessionState::Active(user) = self.load() {
            return Ok(user);
        }
        match api.current_user().await {
            Ok(user) => {
                let cookie = self.api_cookie();
                self.store(&user, cookie.as_deref())?;
                Ok(user)
            }
            Err(e) if e.is_auth_failure() => Err(AppError::redirect("/login")),
            Err(e) => Err(e.into()),
        }
    }
}

/// Authenticates against the API and persists the returned identity.
pub async fn login(
    cache: &SessionCache,
    api: &ApiClient,
    email: &str,
    password: &str,
) -> Result<SessionUser, AppError> {
    let outcome = api.login(email, password).await?;
    cache.store(&outcome.user, outcome.cookie.as_deref())?;
    log::info!("User {} logged in as {}", outcome.user.user_id, outcome.user.role.as_str());
    Ok(outcome.user)
}

/// Ends the remote session and always clears the local one.
pub async fn logout(cache: &SessionCache, api: &ApiClient) -> Result<(), ApiError> {
    let result = api.logout().await;
    cache.clear();
    match result {
        Ok(true) => Ok(()),
        Ok(false) => {
            log::warn!("Remote logout was refused; local session cleared anyway");
            Ok(())
        }
        Err(e) => Err(e),
    }
}
