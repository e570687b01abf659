//! Review workflow for budget requests: which actions a viewer is offered,
//! the status transitions they cause, and the mutate-then-reload sequence.
//!
//! Every successful mutation is followed by exactly one reload of the view it
//! came from. Local state is never patched.

use serde::Serialize;

use crate::api::ApiClient;
use crate::errors::{ApiError, AppError, ValidationError};
use crate::structs::{BudgetRequest, RequestStatus, Role};

pub const REJECT_COMMENT_REQUIRED: &str = "A comment is required to reject a request.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Approve,
    Reject,
    Delete,
    Resubmit,
}

impl ActionKind {
    pub fn label(self) -> &'static str {
        match self {
            ActionKind::Approve => "approve",
            ActionKind::Reject => "reject",
            ActionKind::Delete => "delete",
            ActionKind::Resubmit => "edit and resubmit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    To(RequestStatus),
    Deleted,
}

impl RequestStatus {
    /// The client-visible state machine. `None` means the action is not
    /// available from this status.
    pub fn transition(self, action: ActionKind) -> Option<Transition> {
        use RequestStatus::*;
        match (self, action) {
            (Pending, ActionKind::Approve) => Some(Transition::To(Approved)),
            (Pending, ActionKind::Reject) => Some(Transition::To(Rejected)),
            (Rejected, ActionKind::Resubmit) => Some(Transition::To(Pending)),
            (Pending | Rejected, ActionKind::Delete) => Some(Transition::Deleted),
            _ => None,
        }
    }
}

/// Actions offered to a viewer for one record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Actions {
    pub approve: bool,
    pub reject: bool,
    pub delete: bool,
    pub edit: bool,
}

impl Actions {
    pub fn for_viewer(role: Role, status: RequestStatus) -> Self {
        let pending = status == RequestStatus::Pending;
        let rejected = status == RequestStatus::Rejected;
        match role {
            Role::Admin => Actions {
                approve: pending,
                reject: pending,
                delete: pending || rejected,
                edit: false,
            },
            Role::Treasurer => Actions {
                approve: false,
                reject: false,
                delete: pending,
                edit: rejected,
            },
            Role::Unknown => Actions::default(),
        }
    }

    pub fn permits(&self, kind: ActionKind) -> bool {
        match kind {
            ActionKind::Approve => self.approve,
            ActionKind::Reject => self.reject,
            ActionKind::Delete => self.delete,
            ActionKind::Resubmit => self.edit,
        }
    }

    pub fn any(&self) -> bool {
        self.approve || self.reject || self.delete || self.edit
    }
}

/// Refuses an action the viewer was not offered for the observed status.
pub fn ensure_offered(role: Role, status: RequestStatus, kind: ActionKind) -> Result<(), AppError> {
    if Actions::for_viewer(role, status).permits(kind) && status.transition(kind).is_some() {
        Ok(())
    } else {
        Err(AppError::Conflict(format!(
            "You cannot {} a request that is {}.",
            kind.label(),
            status.as_str()
        )))
    }
}

pub fn reject_comment(raw: &str) -> Result<String, ValidationError> {
    let comment = raw.trim();
    if comment.is_empty() {
        Err(ValidationError::new(REJECT_COMMENT_REQUIRED))
    } else {
        Ok(comment.to_string())
    }
}

pub fn approve_comment(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewAction {
    Approve { comment: Option<String> },
    Reject { comment: String },
    Delete,
}

impl ReviewAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            ReviewAction::Approve { .. } => ActionKind::Approve,
            ReviewAction::Reject { .. } => ActionKind::Reject,
            ReviewAction::Delete => ActionKind::Delete,
        }
    }
}

/// Which view to reload after a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reload {
    List,
    Pending,
    Detail(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Refreshed {
    List(Vec<BudgetRequest>),
    Pending(Vec<BudgetRequest>),
    Detail(BudgetRequest),
}

pub async fn reload(api: &ApiClient, target: Reload) -> Result<Refreshed, ApiError> {
    Ok(match target {
        Reload::List => Refreshed::List(api.list_requests().await?),
        Reload::Pending => Refreshed::Pending(api.pending_requests().await?),
        Reload::Detail(id) => Refreshed::Detail(api.request_detail(id).await?),
    })
}

/// Issues one mutation and then one reload. A deleted record cannot be
/// reloaded on its own, so a detail target falls back to the list.
pub async fn perform(
    api: &ApiClient,
    id: i64,
    action: ReviewAction,
    target: Reload,
) -> Result<Refreshed, ApiError> {
    match &action {
        ReviewAction::Approve { comment } => api.approve(id, comment.as_deref()).await?,
        ReviewAction::Reject { comment } => api.reject(id, comment).await?,
        ReviewAction::Delete => api.delete_request(id).await?,
    };
    log::info!("Applied {} to request {}", action.kind().label(), id);

    let target = match (action, target) {
        (ReviewAction::Delete, Reload::Detail(_)) => Reload::List,
        (_, target) => target,
    };
    reload(api, target).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Method;
    use crate::testing::{MockTransport, MOCK_BASE};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn state_machine_matches_client_view() {
        use RequestStatus::*;
        assert_eq!(Pending.transition(ActionKind::Approve), Some(Transition::To(Approved)));
        assert_eq!(Pending.transition(ActionKind::Reject), Some(Transition::To(Rejected)));
        assert_eq!(Rejected.transition(ActionKind::Resubmit), Some(Transition::To(Pending)));
        assert_eq!(Rejected.transition(ActionKind::Delete), Some(Transition::Deleted));
        assert_eq!(Approved.transition(ActionKind::Approve), None);
        assert_eq!(Approved.transition(ActionKind::Delete), None);
        assert_eq!(Rejected.transition(ActionKind::Approve), None);
        assert_eq!(Pending.transition(ActionKind::Resubmit), None);
    }

    #[test]
    fn admin_actions() {
        let pending = Actions::for_viewer(Role::Admin, RequestStatus::Pending);
        assert!(pending.approve && pending.reject && pending.delete && !pending.edit);

        let rejected = Actions::for_viewer(Role::Admin, RequestStatus::Rejected);
        assert_eq!(
            rejected,
            Actions {
                delete: true,
                ..Actions::default()
            }
        );
        assert!(!Actions::for_viewer(Role::Admin, RequestStatus::Approved).any());
    }

    #[test]
    fn treasurer_actions() {
        let pending = Actions::for_viewer(Role::Treasurer, RequestStatus::Pending);
        assert!(pending.delete && !pending.edit && !pending.approve);

        let rejected = Actions::for_viewer(Role::Treasurer, RequestStatus::Rejected);
        assert!(rejected.edit && !rejected.delete);

        assert!(!Actions::for_viewer(Role::Treasurer, RequestStatus::Approved).any());
        assert!(!Actions::for_viewer(Role::Unknown, RequestStatus::Pending).any());
    }

    #[test]
    fn offered_actions_are_enforced() {
        assert!(ensure_offered(Role::Admin, RequestStatus::Pending, ActionKind::Approve).is_ok());
        assert!(ensure_offered(Role::Treasurer, RequestStatus::Pending, ActionKind::Approve).is_err());
        let err = ensure_offered(Role::Admin, RequestStatus::Approved, ActionKind::Reject).unwrap_err();
        assert_eq!(err.to_string(), "You cannot reject a request that is APPROVED.");
    }

    #[test]
    fn comments() {
        assert_eq!(reject_comment("   ").unwrap_err().messages, vec![REJECT_COMMENT_REQUIRED]);
        assert_eq!(reject_comment("  Missing receipts ").unwrap(), "Missing receipts");
        assert_eq!(approve_comment(Some("  ")), None);
        assert_eq!(approve_comment(Some(" ok ")), Some("ok".into()));
        assert_eq!(approve_comment(None), None);
    }

    #[tokio::test]
    async fn reject_posts_once_then_reloads_list_once() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(Method::Post, "/api/budget-requests/4/reject/", MockTransport::json(200, json!({})));
        mock.respond(
            Method::Get,
            "/api/budget-requests/",
            MockTransport::json(200, json!([{"request_id": 4, "status": "REJECTED"}])),
        );
        let api = ApiClient::new(MOCK_BASE.into(), None, mock.clone());

        let refreshed = perform(
            &api,
            4,
            ReviewAction::Reject {
                comment: "Too costly".into(),
            },
            Reload::List,
        )
        .await
        .unwrap();

        match refreshed {
            Refreshed::List(rows) => assert_eq!(rows[0].status, RequestStatus::Rejected),
            other => panic!("unexpected reload: {:?}", other),
        }
        let calls = mock.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].path, "/api/budget-requests/4/reject/");
        assert_eq!(calls[1].path, "/api/budget-requests/");
    }

    #[tokio::test]
    async fn failed_mutation_skips_reload() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(
            Method::Post,
            "/api/budget-requests/4/approve/",
            MockTransport::json(400, json!({"detail": "Already decided"})),
        );
        let api = ApiClient::new(MOCK_BASE.into(), None, mock.clone());

        let err = perform(&api, 4, ReviewAction::Approve { comment: None }, Reload::Detail(4))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Already decided");
        assert_eq!(mock.calls().len(), 1);
    }

    #[tokio::test]
    async fn delete_always_reloads_list() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(Method::Delete, "/api/budget-requests/9/", MockTransport::json(200, json!({})));
        mock.respond(Method::Get, "/api/budget-requests/", MockTransport::json(200, json!([])));
        let api = ApiClient::new(MOCK_BASE.into(), None, mock.clone());

        let refreshed = perform(&api, 9, ReviewAction::Delete, Reload::Detail(9)).await.unwrap();
        assert_eq!(refreshed, Refreshed::List(vec![]));
        assert_eq!(mock.count(Method::Get, "/api/budget-requests/9/"), 0);
    }

    #[tokio::test]
    async fn approve_from_queue_reloads_queue() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(Method::Post, "/api/budget-requests/2/approve/", MockTransport::json(200, json!({})));
        mock.respond(
            Method::Get,
            "/api/admin/pending-requests/",
            MockTransport::json(200, json!({"requests": []})),
        );
        let api = ApiClient::new(MOCK_BASE.into(), None, mock.clone());

        let refreshed = perform(
            &api,
            2,
            ReviewAction::Approve {
                comment: Some("ok".into()),
            },
            Reload::Pending,
        )
        .await
        .unwrap();
        assert_eq!(refreshed, Refreshed::Pending(vec![]));
        let calls = mock.calls();
        assert_eq!(calls[0].json(), json!({"comment": "ok"}));
        assert_eq!(calls.len(), 2);
    }
}
