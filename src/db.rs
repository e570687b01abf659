use std::str::FromStr;

use serde::Serialize;
use sqlx::{
    prelude::FromRow,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};

use crate::{errors::AppError, wizard::RequestForm};

/// A locally saved, unsubmitted request form. Never sent to the budget API
/// until it is reopened and submitted through the wizard.
#[derive(Serialize, Debug, Clone, FromRow)]
pub struct Draft {
    pub id: i64,
    pub owner_id: i64,
    /// Set when the draft is an unsent resubmission of a rejected request.
    pub request_id: Option<i64>,
    pub title: String,
    pub form_json: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Draft {
    pub fn form(&self) -> Result<RequestForm, AppError> {
        Ok(serde_json::from_str(&self.form_json)?)
    }

    /// The form page the draft reopens on.
    pub fn href(&self) -> String {
        match self.request_id {
            Some(request_id) => format!("/budgets/{}/edit?draft={}", request_id, self.id),
            None => format!("/budgets/new?draft={}", self.id),
        }
    }
}

pub async fn connect(database_url: &str) -> Result<SqlitePool, AppError> {
    let in_memory = database_url.contains(":memory:");
    let mut opts = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .read_only(false)
        .busy_timeout(std::time::Duration::from_secs(5));
    if !in_memory {
        opts = opts.journal_mode(SqliteJournalMode::Wal);
    }

    // every in-memory connection is its own database
    let max_connections = if in_memory { 1 } else { 5 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(opts)
        .await?;

    sqlx::migrate!().run(&pool).await?;
    log::info!("Drafts database migrated successfully");
    Ok(pool)
}

fn draft_title(form: &RequestForm) -> String {
    let name = form.event_name.trim();
    let month = form.month.trim();
    match (name.is_empty(), month.is_empty()) {
        (false, false) => format!("{} ({})", name, month),
        (false, true) => name.to_string(),
        (true, false) => format!("Request for {}", month),
        (true, true) => "Untitled draft".to_string(),
    }
}

/// Inserts a new draft, or overwrites `draft_id` when the owner holds it for
/// the same request (`None` for a new request).
pub async fn save_draft(
    pool: &SqlitePool,
    owner_id: i64,
    request_id: Option<i64>,
    draft_id: Option<i64>,
    form: &RequestForm,
) -> Result<Draft, AppError> {
    let now = chrono::Utc::now().to_string();
    let form_json = serde_json::to_string(form)?;
    let title = draft_title(form);

    let draft = match draft_id {
        Some(id) => sqlx::query_as::<_, Draft>(
            "UPDATE drafts SET title = $1, form_json = $2, updated_at = $3 WHERE id = $4 AND owner_id = $5 AND request_id IS $6 RETURNING *",
        )
        .bind(&title)
        .bind(&form_json)
        .bind(&now)
        .bind(id)
        .bind(owner_id)
        .bind(request_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound)?,
        None => sqlx::query_as::<_, Draft>(
            "INSERT INTO drafts (owner_id, request_id, title, form_json, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
        )
        .bind(owner_id)
        .bind(request_id)
        .bind(&title)
        .bind(&form_json)
        .bind(&now)
        .bind(&now)
        .fetch_one(pool)
        .await?,
    };
    log::info!("Draft {} saved for user {}", draft.id, owner_id);
    Ok(draft)
}

/// Newest first.
pub async fn list_drafts(pool: &SqlitePool, owner_id: i64) -> Result<Vec<Draft>, AppError> {
    let drafts = sqlx::query_as::<_, Draft>(
        "SELECT * FROM drafts WHERE owner_id = $1 ORDER BY updated_at DESC, id DESC",
    )
    .bind(owner_id)
    .fetch_all(pool)
    .await?;
    Ok(drafts)
}

pub async fn get_draft(pool: &SqlitePool, owner_id: i64, id: i64) -> Result<Draft, AppError> {
    sqlx::query_as::<_, Draft>("SELECT * FROM drafts WHERE id = $1 AND owner_id = $2")
        .bind(id)
        .bind(owner_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound)
}

pub async fn delete_draft(pool: &SqlitePool, owner_id: i64, id: i64) -> Result<(), AppError> {
    let result = sqlx::query("DELETE FROM drafts WHERE id = $1 AND owner_id = $2")
        .bind(id)
        .bind(owner_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }
    log::info!("Draft {} deleted", id);
    Ok(())
}
