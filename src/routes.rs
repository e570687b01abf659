use std::future::{ready, Ready};

use actix_session::{Session, SessionExt};
use actix_web::{
    dev::Payload,
    error::ErrorInternalServerError,
    get,
    http::StatusCode,
    post,
    web::{self, Data},
    FromRequest, HttpRequest, HttpResponse, Responder, ResponseError,
};
use serde::{Deserialize, Serialize};
use tera::Context;

use crate::{
    api::ApiClient,
    db,
    errors::{ApiError, AppError, ValidationError},
    guard::{self, LOGIN_PATH},
    session::{self, SessionCache},
    structs::{BudgetRequest, NewUser, RequestStatus, Role, SessionUser},
    utils::{format_date, format_money},
    views,
    wizard::{field, FormAction, RequestForm, Step, StepWizard},
    workflow::{self, ActionKind, Refreshed, Reload, ReviewAction},
    AppState, TEMPLATES,
};

/// One browser visit: the portal session plus an API client carrying the
/// remote session cookie.
pub struct Visit {
    cache: SessionCache,
    api: ApiClient,
    revalidate_after_secs: i64,
}

impl Visit {
    fn new(state: &AppState, session: Session) -> Self {
        let cache = SessionCache::new(session);
        let api = ApiClient::new(
            state.config.api_base.url(),
            cache.api_cookie(),
            state.transport.clone(),
        );
        Self {
            cache,
            api,
            revalidate_after_secs: state.config.revalidate_after_secs,
        }
    }

    async fn protect(&self, required: Option<Role>) -> Result<SessionUser, AppError> {
        guard::protect(&self.cache, &self.api, self.revalidate_after_secs, required).await
    }

    /// Drops the session after a failure the view cannot recover from.
    fn abandon(&self, err: ApiError) -> AppError {
        log::warn!("Sending visitor back to login: {}", err);
        self.cache.clear();
        AppError::redirect(LOGIN_PATH)
    }

    /// Auth failures end the session; anything else is shown inline.
    fn inline(&self, err: ApiError) -> Result<(StatusCode, String), AppError> {
        if err.is_auth_failure() {
            return Err(self.abandon(err));
        }
        let message = err.to_string();
        Ok((AppError::Api(err).status_code(), message))
    }
}

impl FromRequest for Visit {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let Some(state) = req.app_data::<Data<AppState>>() else {
            return ready(Err(ErrorInternalServerError("application state missing")));
        };
        ready(Ok(Visit::new(state, req.get_session())))
    }
}

fn page(title: &str, user: Option<&SessionUser>) -> Context {
    let mut context = Context::new();
    context.insert("title", title);
    context.insert("user", &user);
    context.insert("version", env!("CARGO_PKG_VERSION"));
    context.insert("error", &Option::<String>::None);
    context.insert("errors", &Vec::<String>::new());
    context.insert("notice", &Option::<String>::None);
    context
}

fn render(template: &str, context: &Context) -> Result<HttpResponse, AppError> {
    render_status(StatusCode::OK, template, context)
}

fn render_status(
    status: StatusCode,
    template: &str,
    context: &Context,
) -> Result<HttpResponse, AppError> {
    let rendered = TEMPLATES.render(template, context).map_err(|e| {
        log::error!("Failed to render template: {}", e);
        AppError::TemplateError(e)
    })?;

    Ok(HttpResponse::build(status)
        .content_type("text/html; charset=utf-8")
        .body(rendered))
}

fn see_other(location: &str) -> HttpResponse {
    HttpResponse::SeeOther()
        .append_header(("Location", location))
        .finish()
}

#[get("/")]
pub async fn index_handler(visit: Visit) -> Result<impl Responder, AppError> {
    let state = visit.cache.load();
    if let Some(home) = guard::public_only(&state) {
        return Ok(see_other(home));
    }
    render("home.html", &page("Budget Requests", state.user()))
}

#[derive(Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

fn render_login(email: &str, error: Option<String>, status: StatusCode) -> Result<HttpResponse, AppError> {
    let mut context = page("Sign in", None);
    context.insert("email", email);
    context.insert("error", &error);
    render_status(status, "login.html", &context)
}

#[get("/login")]
pub async fn login_handler(visit: Visit) -> Result<impl Responder, AppError> {
    if let Some(home) = guard::public_only(&visit.cache.load()) {
        return Ok(see_other(home));
    }
    render_login("", None, StatusCode::OK)
}

#[post("/login")]
pub async fn login_form_handler(
    visit: Visit,
    web::Form(form): web::Form<LoginForm>,
) -> Result<impl Responder, AppError> {
    let email = form.email.trim().to_lowercase();
    if email.is_empty() || form.password.is_empty() {
        return render_login(
            &email,
            Some("Email and password are required.".into()),
            StatusCode::BAD_REQUEST,
        );
    }

    match session::login(&visit.cache, &visit.api, &email, &form.password).await {
        Ok(user) => Ok(see_other(user.role.home_path())),
        Err(AppError::Api(e)) => {
            let status = StatusCode::from_u16(e.status().unwrap_or(502))
                .unwrap_or(StatusCode::BAD_GATEWAY);
            render_login(&email, Some(e.to_string()), status)
        }
        Err(e) => Err(e),
    }
}

#[post("/logout")]
pub async fn logout_handler(visit: Visit) -> impl Responder {
    if let Err(e) = session::logout(&visit.cache, &visit.api).await {
        log::warn!("Remote logout failed: {}", e);
    }
    see_other(LOGIN_PATH)
}

#[get("/admin-dashboard")]
pub async fn admin_dashboard_handler(visit: Visit) -> Result<impl Responder, AppError> {
    let user = visit.protect(Some(Role::Admin)).await?;
    let dashboard = visit
        .api
        .admin_dashboard()
        .await
        .map_err(|e| visit.abandon(e))?;

    let mut context = page("Admin Dashboard", Some(&user));
    context.insert("stats", &views::StatsView::from(&dashboard.stats));
    context.insert(
        "pending",
        &views::list_views(&user, &dashboard.pending_requests),
    );
    context.insert(
        "recent",
        &views::list_views(&user, &dashboard.recent_activity),
    );
    context.insert("monthly", &views::month_totals(&dashboard.monthly_totals));
    render("admin_dashboard.html", &context)
}

#[get("/treasurer-dashboard")]
pub async fn treasurer_dashboard_handler(visit: Visit) -> Result<impl Responder, AppError> {
    let user = visit.protect(Some(Role::Treasurer)).await?;
    let dashboard = visit
        .api
        .treasurer_dashboard()
        .await
        .map_err(|e| visit.abandon(e))?;

    let mut context = page("Treasurer Dashboard", Some(&user));
    context.insert("stats", &views::StatsView::from(&dashboard.stats));
    context.insert(
        "recent",
        &views::list_views(&user, &dashboard.recent_requests),
    );
    render("treasurer_dashboard.html", &context)
}

fn render_list(
    user: &SessionUser,
    rows: &[BudgetRequest],
    error: Option<String>,
    notice: Option<&str>,
    status: StatusCode,
) -> Result<HttpResponse, AppError> {
    let mut context = page("Budget Requests", Some(user));
    context.insert("requests", &views::list_views(user, rows));
    context.insert("error", &error);
    context.insert("notice", &notice);
    render_status(status, "budget_list.html", &context)
}

fn render_pending(
    user: &SessionUser,
    rows: &[BudgetRequest],
    error: Option<String>,
    notice: Option<&str>,
    status: StatusCode,
) -> Result<HttpResponse, AppError> {
    let mut context = page("Pending Requests", Some(user));
    context.insert("queue", &views::review_queue(rows, user.role));
    context.insert("error", &error);
    context.insert("notice", &notice);
    render_status(status, "pending_requests.html", &context)
}

fn render_detail(
    user: &SessionUser,
    request: &BudgetRequest,
    error: Option<String>,
    notice: Option<&str>,
    status: StatusCode,
) -> Result<HttpResponse, AppError> {
    if !views::visible_to(user, std::slice::from_ref(request)).is_empty() {
        let mut context = page("Budget Request", Some(user));
        context.insert("request", &views::request_view(request, user.role));
        context.insert("error", &error);
        context.insert("notice", &notice);
        render_status(status, "budget_detail.html", &context)
    } else {
        Err(AppError::NotFound)
    }
}

fn render_refreshed(
    user: &SessionUser,
    refreshed: Refreshed,
    error: Option<String>,
    notice: Option<&str>,
    status: StatusCode,
) -> Result<HttpResponse, AppError> {
    match refreshed {
        Refreshed::List(rows) => render_list(user, &rows, error, notice, status),
        Refreshed::Pending(rows) => render_pending(user, &rows, error, notice, status),
        Refreshed::Detail(request) => render_detail(user, &request, error, notice, status),
    }
}

#[get("/budgets")]
pub async fn budget_list_handler(visit: Visit) -> Result<impl Responder, AppError> {
    visit.protect(None).await?;
    let (user, rows) = tokio::join!(visit.cache.resolve(&visit.api), visit.api.list_requests());
    render_list(&user?, &rows?, None, None, StatusCode::OK)
}

#[get("/budgets/{id}")]
pub async fn budget_detail_handler(
    visit: Visit,
    path: web::Path<i64>,
) -> Result<impl Responder, AppError> {
    visit.protect(None).await?;
    let id = path.into_inner();
    let (user, request) =
        tokio::join!(visit.cache.resolve(&visit.api), visit.api.request_detail(id));
    render_detail(&user?, &request?, None, None, StatusCode::OK)
}

#[get("/admin/requests/{id}")]
pub async fn admin_request_handler(
    visit: Visit,
    path: web::Path<i64>,
) -> Result<impl Responder, AppError> {
    visit.protect(Some(Role::Admin)).await?;
    let id = path.into_inner();
    let (user, request) =
        tokio::join!(visit.cache.resolve(&visit.api), visit.api.request_detail(id));
    render_detail(&user?, &request?, None, None, StatusCode::OK)
}

#[get("/admin/pending-requests")]
pub async fn pending_requests_handler(visit: Visit) -> Result<impl Responder, AppError> {
    visit.protect(Some(Role::Admin)).await?;
    let (user, rows) =
        tokio::join!(visit.cache.resolve(&visit.api), visit.api.pending_requests());
    render_pending(&user?, &rows?, None, None, StatusCode::OK)
}

#[get("/admin/reports")]
pub async fn monthly_report_handler(visit: Visit) -> Result<impl Responder, AppError> {
    visit.protect(Some(Role::Admin)).await?;
    let (user, rows) = tokio::join!(visit.cache.resolve(&visit.api), visit.api.monthly_report());

    let mut context = page("Monthly Report", Some(&user?));
    context.insert("groups", &views::group_by_month(&rows?));
    render("monthly_report.html", &context)
}

#[derive(Deserialize)]
pub struct ReviewForm {
    #[serde(default)]
    comment: String,
    status: Option<String>,
    return_to: Option<String>,
}

fn reload_target(return_to: Option<&str>, id: i64) -> Reload {
    match return_to {
        Some("list") => Reload::List,
        Some("pending") => Reload::Pending,
        _ => Reload::Detail(id),
    }
}

/// Status the visitor saw when choosing the action, fetched when the form
/// did not carry it.
async fn observed_status(
    api: &ApiClient,
    id: i64,
    submitted: Option<&str>,
) -> Result<RequestStatus, AppError> {
    match submitted.and_then(RequestStatus::parse) {
        Some(status) => Ok(status),
        None => Ok(api.request_detail(id).await?.status),
    }
}

fn review_notice(kind: ActionKind) -> &'static str {
    match kind {
        ActionKind::Approve => "Request approved.",
        ActionKind::Reject => "Request rejected.",
        ActionKind::Delete => "Request deleted.",
        ActionKind::Resubmit => "Request resubmitted.",
    }
}

async fn review(
    visit: &Visit,
    id: i64,
    kind: ActionKind,
    form: ReviewForm,
) -> Result<HttpResponse, AppError> {
    let required = match kind {
        ActionKind::Approve | ActionKind::Reject => Some(Role::Admin),
        ActionKind::Delete | ActionKind::Resubmit => None,
    };
    let user = visit.protect(required).await?;
    let target = reload_target(form.return_to.as_deref(), id);
    let status = observed_status(&visit.api, id, form.status.as_deref()).await?;
    workflow::ensure_offered(user.role, status, kind)?;

    let action = match kind {
        ActionKind::Approve => ReviewAction::Approve {
            comment: workflow::approve_comment(Some(&form.comment)),
        },
        ActionKind::Reject => match workflow::reject_comment(&form.comment) {
            Ok(comment) => ReviewAction::Reject { comment },
            Err(e) => {
                let refreshed = workflow::reload(&visit.api, target).await?;
                return render_refreshed(
                    &user,
                    refreshed,
                    Some(e.to_string()),
                    None,
                    StatusCode::UNPROCESSABLE_ENTITY,
                );
            }
        },
        ActionKind::Delete => ReviewAction::Delete,
        ActionKind::Resubmit => {
            return Err(AppError::Conflict(
                "Open the request for editing to resubmit it.".into(),
            ))
        }
    };

    match workflow::perform(&visit.api, id, action, target).await {
        Ok(refreshed) => render_refreshed(&user, refreshed, None, Some(review_notice(kind)), StatusCode::OK),
        Err(e) => {
            let (status, message) = visit.inline(e)?;
            let target = match (kind, target) {
                (ActionKind::Delete, Reload::Detail(_)) => Reload::List,
                (_, target) => target,
            };
            let refreshed = workflow::reload(&visit.api, target).await?;
            render_refreshed(&user, refreshed, Some(message), None, status)
        }
    }
}

#[post("/budgets/{id}/approve")]
pub async fn approve_handler(
    visit: Visit,
    path: web::Path<i64>,
    web::Form(form): web::Form<ReviewForm>,
) -> Result<impl Responder, AppError> {
    review(&visit, path.into_inner(), ActionKind::Approve, form).await
}

#[post("/budgets/{id}/reject")]
pub async fn reject_handler(
    visit: Visit,
    path: web::Path<i64>,
    web::Form(form): web::Form<ReviewForm>,
) -> Result<impl Responder, AppError> {
    review(&visit, path.into_inner(), ActionKind::Reject, form).await
}

#[post("/budgets/{id}/delete")]
pub async fn delete_handler(
    visit: Visit,
    path: web::Path<i64>,
    web::Form(form): web::Form<ReviewForm>,
) -> Result<impl Responder, AppError> {
    review(&visit, path.into_inner(), ActionKind::Delete, form).await
}

#[derive(Debug, Clone, Copy)]
enum FormMode {
    Create,
    Edit(i64),
}

impl FormMode {
    fn action(self) -> String {
        match self {
            FormMode::Create => "/budgets/new".to_string(),
            FormMode::Edit(id) => format!("/budgets/{}/edit", id),
        }
    }

    /// The rejected request an edit resubmits.
    fn request_id(self) -> Option<i64> {
        match self {
            FormMode::Create => None,
            FormMode::Edit(id) => Some(id),
        }
    }

    fn title(self) -> &'static str {
        match self {
            FormMode::Create => "New Budget Request",
            FormMode::Edit(_) => "Edit Budget Request",
        }
    }
}

struct FormPage<'a> {
    user: &'a SessionUser,
    mode: FormMode,
    draft_id: Option<i64>,
    /// Status the edited request had when the form was opened.
    status: Option<RequestStatus>,
}

impl FormPage<'_> {
    fn render(
        &self,
        form: &RequestForm,
        errors: &[String],
        notice: Option<&str>,
        status: StatusCode,
    ) -> Result<HttpResponse, AppError> {
        let mut context = page(self.mode.title(), Some(self.user));
        context.insert("form", form);
        context.insert("form_action", &self.mode.action());
        context.insert("editing", &matches!(self.mode, FormMode::Edit(_)));
        context.insert("draft_id", &self.draft_id);
        context.insert("request_status", &self.status.map(RequestStatus::as_str));
        context.insert("running_total", &format_money(Some(form.running_total())));
        context.insert("errors", errors);
        context.insert("notice", &notice);
        render_status(status, "budget_form.html", &context)
    }
}

fn render_submitted(user: &SessionUser, message: &str) -> Result<HttpResponse, AppError> {
    let mut context = page("Request Submitted", Some(user));
    context.insert("message", message);
    render("submitted.html", &context)
}

/// Removes the draft a submission came from. The submission already
/// succeeded, so failures are only logged.
async fn discard_draft(state: &AppState, owner_id: i64, draft_id: Option<i64>) {
    if let Some(id) = draft_id {
        if let Err(e) = db::delete_draft(&state.db_pool, owner_id, id).await {
            log::warn!("Could not remove submitted draft {}: {}", id, e);
        }
    }
}

async fn handle_form(
    visit: &Visit,
    state: &AppState,
    mut page: FormPage<'_>,
    mut form: RequestForm,
    action: FormAction,
) -> Result<HttpResponse, AppError> {
    match action {
        FormAction::AddLine => {
            form.add_line();
            page.render(&form, &[], None, StatusCode::OK)
        }
        FormAction::RemoveLine(index) => {
            form.remove_line(index);
            page.render(&form, &[], None, StatusCode::OK)
        }
        FormAction::SaveDraft => {
            let draft = db::save_draft(
                &state.db_pool,
                page.user.user_id,
                page.mode.request_id(),
                page.draft_id,
                &form,
            )
            .await?;
            page.draft_id = Some(draft.id);
            page.render(&form, &[], Some("Draft saved."), StatusCode::OK)
        }
        // step navigation means nothing on the single-page form
        FormAction::Next | FormAction::Back => page.render(&form, &[], None, StatusCode::OK),
        FormAction::Submit => {
            let payload = match form.validate() {
                Ok(payload) => payload,
                Err(e) => {
                    return page.render(&form, &e.messages, None, StatusCode::UNPROCESSABLE_ENTITY)
                }
            };

            let (result, message) = match page.mode {
                FormMode::Create => (
                    visit.api.create_request(&payload).await,
                    "Your budget request was submitted and is pending review.",
                ),
                FormMode::Edit(id) => {
                    if let Some(status) = page.status {
                        workflow::ensure_offered(page.user.role, status, ActionKind::Resubmit)?;
                    }
                    (
                        visit.api.update_request(id, &payload).await,
                        "Your budget request was resubmitted and is pending review.",
                    )
                }
            };

            match result {
                Ok(_) => {
                    discard_draft(state, page.user.user_id, page.draft_id).await;
                    render_submitted(page.user, message)
                }
                Err(e) => {
                    let (status, message) = visit.inline(e)?;
                    page.render(&form, &[message], None, status)
                }
            }
        }
    }
}

#[derive(Deserialize)]
pub struct DraftQuery {
    draft: Option<i64>,
}

#[get("/budgets/new")]
pub async fn new_request_handler(
    visit: Visit,
    state: Data<AppState>,
    query: web::Query<DraftQuery>,
) -> Result<impl Responder, AppError> {
    let user = visit.protect(Some(Role::Treasurer)).await?;
    let (form, draft_id) = match query.draft {
        Some(id) => {
            let draft = db::get_draft(&state.db_pool, user.user_id, id).await?;
            if draft.request_id.is_some() {
                return Ok(see_other(&draft.href()));
            }
            (draft.form()?, Some(draft.id))
        }
        None => (RequestForm::default(), None),
    };

    FormPage {
        user: &user,
        mode: FormMode::Create,
        draft_id,
        status: None,
    }
    .render(&form, &[], None, StatusCode::OK)
}

fn draft_field(pairs: &[(String, String)]) -> Option<i64> {
    field(pairs, "draft_id").and_then(|v| v.trim().parse().ok())
}

#[post("/budgets/new")]
pub async fn create_request_handler(
    visit: Visit,
    state: Data<AppState>,
    web::Form(pairs): web::Form<Vec<(String, String)>>,
) -> Result<impl Responder, AppError> {
    let user = visit.protect(Some(Role::Treasurer)).await?;
    let page = FormPage {
        user: &user,
        mode: FormMode::Create,
        draft_id: draft_field(&pairs),
        status: None,
    };
    handle_form(
        &visit,
        &state,
        page,
        RequestForm::from_pairs(&pairs),
        FormAction::from_pairs(&pairs),
    )
    .await
}

#[get("/budgets/{id}/edit")]
pub async fn edit_request_handler(
    visit: Visit,
    state: Data<AppState>,
    path: web::Path<i64>,
    query: web::Query<DraftQuery>,
) -> Result<impl Responder, AppError> {
    let user = visit.protect(Some(Role::Treasurer)).await?;
    let id = path.into_inner();
    let request = visit.api.request_detail(id).await?;
    if views::visible_to(&user, std::slice::from_ref(&request)).is_empty() {
        return Err(AppError::NotFound);
    }
    workflow::ensure_offered(user.role, request.status, ActionKind::Resubmit)?;

    let (form, draft_id) = match query.draft {
        Some(draft_id) => {
            let draft = db::get_draft(&state.db_pool, user.user_id, draft_id).await?;
            if draft.request_id != Some(id) {
                return Err(AppError::NotFound);
            }
            (draft.form()?, Some(draft.id))
        }
        None => (RequestForm::from_request(&request), None),
    };

    let page = FormPage {
        user: &user,
        mode: FormMode::Edit(id),
        draft_id,
        status: Some(request.status),
    };
    let notice = request
        .admin_comment
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(|c| format!("Rejected: {}", c));
    page.render(&form, &[], notice.as_deref(), StatusCode::OK)
}

#[post("/budgets/{id}/edit")]
pub async fn update_request_handler(
    visit: Visit,
    state: Data<AppState>,
    path: web::Path<i64>,
    web::Form(pairs): web::Form<Vec<(String, String)>>,
) -> Result<impl Responder, AppError> {
    let user = visit.protect(Some(Role::Treasurer)).await?;
    let id = path.into_inner();
    let status = observed_status(&visit.api, id, field(&pairs, "status")).await?;
    let page = FormPage {
        user: &user,
        mode: FormMode::Edit(id),
        draft_id: draft_field(&pairs),
        status: Some(status),
    };
    handle_form(
        &visit,
        &state,
        page,
        RequestForm::from_pairs(&pairs),
        FormAction::from_pairs(&pairs),
    )
    .await
}

#[derive(Serialize)]
struct StepView {
    number: u8,
    title: &'static str,
    current: bool,
    done: bool,
}

fn render_steps(
    user: &SessionUser,
    wizard: &StepWizard,
    draft_id: Option<i64>,
    errors: &[String],
    notice: Option<&str>,
    status: StatusCode,
) -> Result<HttpResponse, AppError> {
    let steps: Vec<StepView> = Step::ALL
        .iter()
        .map(|s| StepView {
            number: s.number(),
            title: s.title(),
            current: *s == wizard.step,
            done: s.number() < wizard.step.number(),
        })
        .collect();

    let mut context = page("New Budget Request", Some(user));
    context.insert("steps", &steps);
    context.insert("step", &wizard.step.number());
    context.insert("step_title", wizard.step.title());
    context.insert("is_last", &wizard.is_last());
    context.insert("form", &wizard.form);
    context.insert("draft_id", &draft_id);
    context.insert("running_total", &format_money(Some(wizard.form.running_total())));
    context.insert("errors", errors);
    context.insert("notice", &notice);
    render_status(status, "budget_steps.html", &context)
}

#[get("/budgets/new/steps")]
pub async fn steps_handler(visit: Visit) -> Result<impl Responder, AppError> {
    let user = visit.protect(Some(Role::Treasurer)).await?;
    render_steps(&user, &StepWizard::default(), None, &[], None, StatusCode::OK)
}

#[post("/budgets/new/steps")]
pub async fn steps_form_handler(
    visit: Visit,
    state: Data<AppState>,
    web::Form(pairs): web::Form<Vec<(String, String)>>,
) -> Result<impl Responder, AppError> {
    let user = visit.protect(Some(Role::Treasurer)).await?;
    let mut wizard = StepWizard::from_pairs(&pairs);
    let draft_id = draft_field(&pairs);
    let invalid = |wizard: &StepWizard, e: ValidationError| {
        render_steps(&user, wizard, draft_id, &e.messages, None, StatusCode::UNPROCESSABLE_ENTITY)
    };

    match FormAction::from_pairs(&pairs) {
        FormAction::Next => match wizard.advance() {
            Ok(()) => render_steps(&user, &wizard, draft_id, &[], None, StatusCode::OK),
            Err(e) => invalid(&wizard, e),
        },
        FormAction::Back => {
            wizard.back();
            render_steps(&user, &wizard, draft_id, &[], None, StatusCode::OK)
        }
        FormAction::AddLine => {
            wizard.form.add_line();
            render_steps(&user, &wizard, draft_id, &[], None, StatusCode::OK)
        }
        FormAction::RemoveLine(index) => {
            wizard.form.remove_line(index);
            render_steps(&user, &wizard, draft_id, &[], None, StatusCode::OK)
        }
        FormAction::SaveDraft => {
            let draft = db::save_draft(&state.db_pool, user.user_id, None, draft_id, &wizard.form).await?;
            render_steps(&user, &wizard, Some(draft.id), &[], Some("Draft saved."), StatusCode::OK)
        }
        FormAction::Submit => {
            let payload = match wizard.submit() {
                Ok(payload) => payload,
                Err(e) => return invalid(&wizard, e),
            };
            match visit.api.create_request(&payload).await {
                Ok(_) => {
                    discard_draft(&state, user.user_id, draft_id).await;
                    render_submitted(
                        &user,
                        "Your budget request was submitted and is pending review.",
                    )
                }
                Err(e) => {
                    let (status, message) = visit.inline(e)?;
                    render_steps(&user, &wizard, draft_id, &[message], None, status)
                }
            }
        }
    }
}

#[derive(Serialize)]
struct DraftView {
    id: i64,
    title: String,
    href: String,
    resubmits: Option<i64>,
    updated: String,
}

#[get("/drafts")]
pub async fn drafts_handler(
    visit: Visit,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let user = visit.protect(Some(Role::Treasurer)).await?;
    let drafts: Vec<DraftView> = db::list_drafts(&state.db_pool, user.user_id)
        .await?
        .into_iter()
        .map(|d| DraftView {
            updated: format_date(Some(&d.updated_at)),
            href: d.href(),
            resubmits: d.request_id,
            id: d.id,
            title: d.title,
        })
        .collect();

    let mut context = page("Saved Drafts", Some(&user));
    context.insert("drafts", &drafts);
    render("drafts.html", &context)
}

#[post("/drafts/{id}/delete")]
pub async fn delete_draft_handler(
    visit: Visit,
    state: Data<AppState>,
    path: web::Path<i64>,
) -> Result<impl Responder, AppError> {
    let user = visit.protect(Some(Role::Treasurer)).await?;
    db::delete_draft(&state.db_pool, user.user_id, path.into_inner()).await?;
    Ok(see_other("/drafts"))
}

#[derive(Deserialize, Serialize, Default, Clone)]
pub struct CreateUserForm {
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    whatsapp: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    city_id: String,
    #[serde(default)]
    password: String,
}

impl CreateUserForm {
    fn validate(&self) -> Result<NewUser, ValidationError> {
        let mut errors = Vec::new();
        if self.name.trim().is_empty() {
            errors.push("Name is required".to_string());
        }
        let email = self.email.trim();
        if email.is_empty() {
            errors.push("Email is required".to_string());
        } else if !looks_like_email(email) {
            errors.push("Email must be a valid address".to_string());
        }
        if self.password.is_empty() {
            errors.push("Password is required".to_string());
        }
        let city_id = self.city_id.trim().parse::<i64>().ok();
        if city_id.is_none() {
            errors.push("City is required".to_string());
        }
        let role = Role::parse_assignable(&self.role);
        if role.is_none() {
            errors.push("Role must be ADMIN or TREASURER".to_string());
        }
        ValidationError::from_messages(errors)?;

        match (role, city_id) {
            (Some(role), Some(city_id)) => Ok(NewUser {
                name: self.name.trim().to_string(),
                email: self.email.trim().to_lowercase(),
                whatsapp: Some(self.whatsapp.trim().to_string()).filter(|w| !w.is_empty()),
                role,
                city_id,
                password: self.password.clone(),
            }),
            _ => Err(ValidationError::new("City and role are required")),
        }
    }
}

/// `local@domain.tld` with no whitespace.
fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

#[derive(Serialize)]
struct CityOption {
    id: i64,
    label: String,
    selected: bool,
}

async fn render_create_user(
    visit: &Visit,
    user: &SessionUser,
    form: &CreateUserForm,
    mut errors: Vec<String>,
    status: StatusCode,
) -> Result<HttpResponse, AppError> {
    let cities = match visit.api.cities().await {
        Ok(cities) => cities,
        Err(e) => {
            errors.push(format!("Could not load cities: {}", e));
            Vec::new()
        }
    };

    let mut context = page("Create Account", Some(user));
    // never echo the password back
    let shown = CreateUserForm {
        password: String::new(),
        ..form.clone()
    };
    context.insert("form", &shown);
    let cities: Vec<CityOption> = cities
        .into_iter()
        .map(|c| CityOption {
            selected: form.city_id.trim() == c.city_id.to_string(),
            label: match c.province {
                Some(province) => format!("{}, {}", c.name, province),
                None => c.name,
            },
            id: c.city_id,
        })
        .collect();
    context.insert("cities", &cities);
    context.insert("errors", &errors);
    render_status(status, "create_user.html", &context)
}

#[get("/admin/create-account")]
pub async fn create_account_handler(visit: Visit) -> Result<impl Responder, AppError> {
    let user = visit.protect(Some(Role::Admin)).await?;
    render_create_user(&visit, &user, &CreateUserForm::default(), Vec::new(), StatusCode::OK).await
}

#[post("/admin/create-account")]
pub async fn create_account_form_handler(
    visit: Visit,
    web::Form(form): web::Form<CreateUserForm>,
) -> Result<impl Responder, AppError> {
    let user = visit.protect(Some(Role::Admin)).await?;
    let new_user = match form.validate() {
        Ok(new_user) => new_user,
        Err(e) => {
            return render_create_user(&visit, &user, &form, e.messages, StatusCode::UNPROCESSABLE_ENTITY)
                .await
        }
    };

    match visit.api.create_user(&new_user).await {
        Ok(_) => {
            log::info!("Account created for {} as {}", new_user.email, new_user.role.as_str());
            let mut context = page("Account Created", Some(&user));
            context.insert("created_name", &new_user.name);
            context.insert("created_role", new_user.role.as_str());
            render("account_created.html", &context)
        }
        Err(e) => {
            let (status, message) = visit.inline(e)?;
            render_create_user(&visit, &user, &form, vec![message], status).await
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(index_handler)
        .service(login_handler)
        .service(login_form_handler)
        .service(logout_handler)
        .service(admin_dashboard_handler)
        .service(treasurer_dashboard_handler)
        .service(budget_list_handler)
        // literal paths before `/budgets/{id}`
        .service(new_request_handler)
        .service(create_request_handler)
        .service(steps_handler)
        .service(steps_form_handler)
        .service(budget_detail_handler)
        .service(edit_request_handler)
        .service(update_request_handler)
        .service(approve_handler)
        .service(reject_handler)
        .service(delete_handler)
        .service(pending_requests_handler)
        .service(admin_request_handler)
        .service(monthly_report_handler)
        .service(create_account_handler)
        .service(create_account_form_handler)
        .service(drafts_handler)
        .service(delete_draft_handler);
}
