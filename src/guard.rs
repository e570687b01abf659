//! Route guarding by session role.

use crate::api::ApiClient;
use crate::errors::AppError;
use crate::session::{SessionCache, SessionState};
use crate::structs::{Role, SessionUser};

pub const LOGIN_PATH: &str = "/login";

#[derive(Debug, PartialEq)]
pub enum Access<'a> {
    Granted(&'a SessionUser),
    Redirect(&'static str),
}

/// Decides whether `state` may see a route that requires `required`.
pub fn authorize(state: &SessionState, required: Option<Role>) -> Access<'_> {
    match state {
        SessionState::LoggedOut => Access::Redirect(LOGIN_PATH),
        SessionState::Active(user) => match required {
            Some(role) if user.role != role => Access::Redirect(user.role.home_path()),
            _ => Access::Granted(user),
        },
    }
}

/// Where an already authenticated visitor of the login page is sent instead.
pub fn public_only(state: &SessionState) -> Option<&'static str> {
    match state {
        SessionState::Active(user) if user.role != Role::Unknown => Some(user.role.home_path()),
        _ => None,
    }
}

/// Loads (and if due, revalidates) the session and applies [`authorize`].
pub async fn protect(
    cache: &SessionCache,
    api: &ApiClient,
    revalidate_after_secs: i64,
    required: Option<Role>,
) -> Result<SessionUser, AppError> {
    let state = cache.revalidate(api, revalidate_after_secs).await;
    match authorize(&state, required) {
        Access::Granted(user) => Ok(user.clone()),
        Access::Redirect(path) => {
            log::debug!("Guard redirecting to {}", path);
            Err(AppError::redirect(path))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(role: Role) -> SessionState {
        SessionState::Active(SessionUser {
            user_id: 1,
            name: None,
            email: None,
            role,
            city_id: None,
            city_name: None,
        })
    }

    #[test]
    fn logged_out_goes_to_login() {
        for required in [None, Some(Role::Admin), Some(Role::Treasurer)] {
            assert_eq!(authorize(&SessionState::LoggedOut, required), Access::Redirect("/login"));
        }
    }

    #[test]
    fn wrong_role_goes_to_own_dashboard() {
        assert_eq!(
            authorize(&session(Role::Admin), Some(Role::Treasurer)),
            Access::Redirect("/admin-dashboard")
        );
        assert_eq!(
            authorize(&session(Role::Treasurer), Some(Role::Admin)),
            Access::Redirect("/treasurer-dashboard")
        );
        assert_eq!(authorize(&session(Role::Unknown), Some(Role::Admin)), Access::Redirect("/"));
    }

    #[test]
    fn matching_or_unrestricted_routes_are_granted() {
        let admin = session(Role::Admin);
        assert!(matches!(authorize(&admin, Some(Role::Admin)), Access::Granted(_)));
        assert!(matches!(authorize(&admin, None), Access::Granted(_)));
        assert!(matches!(authorize(&session(Role::Unknown), None), Access::Granted(_)));
    }

    #[test]
    fn login_page_bounces_known_roles_only() {
        assert_eq!(public_only(&SessionState::LoggedOut), None);
        assert_eq!(public_only(&session(Role::Admin)), Some("/admin-dashboard"));
        assert_eq!(public_only(&session(Role::Treasurer)), Some("/treasurer-dashboard"));
        assert_eq!(public_only(&session(Role::Unknown)), None);
    }
}
