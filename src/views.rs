//! Template-facing projections of API records. Money and dates are
//! formatted here so templates only print strings.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::structs::{
    BreakdownLine, BudgetRequest, DashboardStats, MonthlyReportRow, MonthlyTotal, RequestStatus,
    Role, SessionUser,
};
use crate::utils::{format_date, format_money, month_label, round_cents};
use crate::workflow::Actions;

#[derive(Debug, Serialize)]
pub struct LineView {
    pub number: u32,
    pub description: String,
    pub category_id: Option<i64>,
    pub amount: String,
}

#[derive(Debug, Serialize)]
pub struct RequestView {
    pub id: i64,
    pub month: String,
    pub month_label: String,
    pub city: String,
    pub description: String,
    pub status: &'static str,
    pub status_class: &'static str,
    pub requester: String,
    pub admin_comment: Option<String>,
    pub event_name: String,
    pub event_date: String,
    pub event_notes: String,
    pub total: String,
    pub created: String,
    pub updated: String,
    pub lines: Vec<LineView>,
    pub actions: Actions,
}

fn status_class(status: RequestStatus) -> &'static str {
    match status {
        RequestStatus::Pending => "status-pending",
        RequestStatus::Approved => "status-approved",
        RequestStatus::Rejected => "status-rejected",
    }
}

fn line_view(index: usize, line: &BreakdownLine) -> LineView {
    LineView {
        number: line.line_number.unwrap_or(index as u32 + 1),
        description: line.description.clone().unwrap_or_default(),
        category_id: line.category_id,
        amount: format_money(line.amount),
    }
}

pub fn request_view(request: &BudgetRequest, viewer: Role) -> RequestView {
    let event = request.event.clone().unwrap_or_default();
    let month = request.month.clone().unwrap_or_default();
    RequestView {
        id: request.request_id,
        month_label: month_label(&month),
        month,
        city: request.city_name.clone().unwrap_or_else(|| "—".into()),
        description: request.description.clone().unwrap_or_default(),
        status: request.status.as_str(),
        status_class: status_class(request.status),
        requester: request
            .requester_name
            .clone()
            .or_else(|| request.requester_email.clone())
            .unwrap_or_else(|| "—".into()),
        admin_comment: request
            .admin_comment
            .clone()
            .filter(|c| !c.trim().is_empty()),
        event_name: event.name.unwrap_or_default(),
        event_date: format_date(event.event_date.as_deref()),
        event_notes: event.notes.unwrap_or_default(),
        total: format_money(request.total().map(round_cents)),
        created: format_date(request.created_at.as_deref()),
        updated: format_date(request.updated_at.as_deref()),
        lines: request
            .lines()
            .iter()
            .enumerate()
            .map(|(i, l)| line_view(i, l))
            .collect(),
        actions: Actions::for_viewer(viewer, request.status),
    }
}

/// Treasurers only ever see requests they raised. Records without a
/// requester id are trusted to be pre-filtered by the API.
pub fn visible_to<'a>(user: &SessionUser, rows: &'a [BudgetRequest]) -> Vec<&'a BudgetRequest> {
    rows.iter()
        .filter(|r| match user.role {
            Role::Treasurer => r.requester_id.map_or(true, |id| id == user.user_id),
            _ => true,
        })
        .collect()
}

pub fn list_views(user: &SessionUser, rows: &[BudgetRequest]) -> Vec<RequestView> {
    visible_to(user, rows)
        .into_iter()
        .map(|r| request_view(r, user.role))
        .collect()
}

/// Pending-review page sections.
#[derive(Debug, Serialize)]
pub struct ReviewQueue {
    pub pending: Vec<RequestView>,
    pub rejected: Vec<RequestView>,
}

pub fn review_queue(rows: &[BudgetRequest], viewer: Role) -> ReviewQueue {
    let (pending, rejected): (Vec<_>, Vec<_>) = rows
        .iter()
        .filter(|r| r.status != RequestStatus::Approved)
        .partition(|r| r.status == RequestStatus::Pending);
    ReviewQueue {
        pending: pending.into_iter().map(|r| request_view(r, viewer)).collect(),
        rejected: rejected.into_iter().map(|r| request_view(r, viewer)).collect(),
    }
}

#[derive(Debug, Serialize)]
pub struct StatsView {
    pub total: u64,
    pub pending: u64,
    pub approved: u64,
    pub rejected: u64,
    pub total_users: Option<u64>,
    pub approved_amount: String,
}

impl From<&DashboardStats> for StatsView {
    fn from(stats: &DashboardStats) -> Self {
        Self {
            total: stats.total,
            pending: stats.pending,
            approved: stats.approved,
            rejected: stats.rejected,
            total_users: stats.total_users,
            approved_amount: format_money(stats.approved_amount),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MonthTotalView {
    pub label: String,
    pub total: String,
}

pub fn month_totals(rows: &[MonthlyTotal]) -> Vec<MonthTotalView> {
    rows.iter()
        .map(|r| MonthTotalView {
            label: month_label(&r.month),
            total: format_money(r.total),
        })
        .collect()
}

#[derive(Debug, Serialize)]
pub struct CityTotal {
    pub city: String,
    pub total: String,
}

#[derive(Debug, Serialize)]
pub struct MonthGroup {
    pub month: String,
    pub label: String,
    pub total: String,
    pub cities: Vec<CityTotal>,
}

/// Groups report rows by month, newest month first, keeping the row order
/// within each month.
pub fn group_by_month(rows: &[MonthlyReportRow]) -> Vec<MonthGroup> {
    let mut months: BTreeMap<String, Vec<&MonthlyReportRow>> = BTreeMap::new();
    for row in rows {
        months.entry(month_key(&row.month)).or_default().push(row);
    }

    months
        .into_iter()
        .rev()
        .map(|(month, rows)| {
            let total: f64 = rows.iter().filter_map(|r| r.total_requested).sum();
            MonthGroup {
                label: month_label(&month),
                total: format_money(Some(round_cents(total))),
                cities: rows
                    .iter()
                    .map(|r| CityTotal {
                        city: r.city.clone(),
                        total: format_money(r.total_requested),
                    })
                    .collect(),
                month,
            }
        })
        .collect()
}

/// "2025-11-01" and "2025-11" group together.
fn month_key(month: &str) -> String {
    month.trim().chars().take(7).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::Event;

    fn request(id: i64, status: RequestStatus, requester: Option<i64>) -> BudgetRequest {
        BudgetRequest {
            request_id: id,
            city_id: Some(1),
            city_name: Some("Toronto".into()),
            month: Some("2025-11-01".into()),
            description: None,
            status,
            requester_id: requester,
            requester_name: Some("Maryam".into()),
            requester_email: None,
            admin_comment: Some("  ".into()),
            created_at: Some("2025-10-30T09:00:00+00:00".into()),
            updated_at: None,
            event: Some(Event {
                name: Some("Eid dinner".into()),
                event_date: Some("2025-11-15".into()),
                notes: None,
                total_amount: None,
            }),
            breakdown_lines: Some(vec![BreakdownLine {
                line_number: None,
                category_id: None,
                description: Some("Food".into()),
                amount: Some(25.0),
            }]),
            amount: None,
        }
    }

    fn user(role: Role, id: i64) -> SessionUser {
        SessionUser {
            user_id: id,
            name: None,
            email: None,
            role,
            city_id: None,
            city_name: None,
        }
    }

    #[test]
    fn request_view_formats_fields() {
        let view = request_view(&request(3, RequestStatus::Pending, Some(7)), Role::Admin);
        assert_eq!(view.total, "$25.00");
        assert_eq!(view.lines[0].amount, "$25.00");
        assert_eq!(view.lines[0].number, 1);
        assert_eq!(view.month_label, "November 2025");
        assert_eq!(view.created, "2025-10-30");
        assert_eq!(view.status_class, "status-pending");
        assert_eq!(view.admin_comment, None);
        assert!(view.actions.approve);
    }

    #[test]
    fn treasurer_sees_only_own_requests() {
        let rows = vec![
            request(1, RequestStatus::Pending, Some(7)),
            request(2, RequestStatus::Pending, Some(8)),
            request(3, RequestStatus::Approved, None),
        ];
        let ids: Vec<i64> = list_views(&user(Role::Treasurer, 7), &rows)
            .iter()
            .map(|v| v.id)
            .collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(list_views(&user(Role::Admin, 1), &rows).len(), 3);
    }

    #[test]
    fn review_queue_splits_by_status() {
        let rows = vec![
            request(1, RequestStatus::Pending, None),
            request(2, RequestStatus::Rejected, None),
            request(3, RequestStatus::Approved, None),
            request(4, RequestStatus::Pending, None),
        ];
        let queue = review_queue(&rows, Role::Admin);
        assert_eq!(queue.pending.iter().map(|v| v.id).collect::<Vec<_>>(), vec![1, 4]);
        assert_eq!(queue.rejected.iter().map(|v| v.id).collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn report_groups_newest_month_first() {
        let row = |month: &str, city: &str, total: f64| MonthlyReportRow {
            month: month.into(),
            city: city.into(),
            total_requested: Some(total),
        };
        let rows = vec![
            row("2025-10-01", "Toronto", 100.0),
            row("2025-11-01", "Ottawa", 40.5),
            row("2025-10", "Calgary", 20.25),
        ];

        let groups = group_by_month(&rows);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].label, "November 2025");
        assert_eq!(groups[0].total, "$40.50");
        assert_eq!(groups[1].label, "October 2025");
        assert_eq!(groups[1].total, "$120.25");
        assert_eq!(groups[1].cities[1].city, "Calgary");
    }
}
