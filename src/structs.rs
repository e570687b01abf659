use serde::{Deserialize, Deserializer, Serialize};

/// Role carried by the remote API. Anything the portal does not recognise
/// decodes to `Unknown` instead of failing the whole record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    Treasurer,
    #[serde(other)]
    Unknown,
}

impl Role {
    /// Default landing page for the role.
    pub fn home_path(self) -> &'static str {
        match self {
            Role::Admin => "/admin-dashboard",
            Role::Treasurer => "/treasurer-dashboard",
            Role::Unknown => "/",
        }
    }

    /// Parses the two roles an account may be created with.
    pub fn parse_assignable(value: &str) -> Option<Role> {
        match value.trim() {
            "ADMIN" => Some(Role::Admin),
            "TREASURER" => Some(Role::Treasurer),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Treasurer => "TREASURER",
            Role::Unknown => "UNKNOWN",
        }
    }
}

/// The authenticated user as cached in the portal session.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct SessionUser {
    #[serde(alias = "id")]
    pub user_id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub city_id: Option<i64>,
    #[serde(default)]
    pub city_name: Option<String>,
}

impl SessionUser {
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or("there")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::Approved => "APPROVED",
            RequestStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(RequestStatus::Pending),
            "APPROVED" => Some(RequestStatus::Approved),
            "REJECTED" => Some(RequestStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct Event {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub event_date: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub total_amount: Option<f64>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct BreakdownLine {
    #[serde(default)]
    pub line_number: Option<u32>,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub amount: Option<f64>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct BudgetRequest {
    pub request_id: i64,
    #[serde(default)]
    pub city_id: Option<i64>,
    #[serde(default)]
    pub city_name: Option<String>,
    #[serde(default)]
    pub month: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub status: RequestStatus,
    #[serde(default)]
    pub requester_id: Option<i64>,
    #[serde(default)]
    pub requester_name: Option<String>,
    #[serde(default)]
    pub requester_email: Option<String>,
    #[serde(default)]
    pub admin_comment: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub event: Option<Event>,
    #[serde(default)]
    pub breakdown_lines: Option<Vec<BreakdownLine>>,
    /// Pre-computed total some list endpoints attach.
    #[serde(default, deserialize_with = "lenient_amount")]
    pub amount: Option<f64>,
}

impl BudgetRequest {
    pub fn lines(&self) -> &[BreakdownLine] {
        self.breakdown_lines.as_deref().unwrap_or(&[])
    }

    /// Event total when the server sent one, otherwise the sum of the lines,
    /// otherwise the list-level amount.
    pub fn total(&self) -> Option<f64> {
        if let Some(total) = self.event.as_ref().and_then(|e| e.total_amount) {
            return Some(total);
        }
        let amounts: Vec<f64> = self.lines().iter().filter_map(|l| l.amount).collect();
        if !amounts.is_empty() {
            return Some(amounts.iter().sum());
        }
        self.amount
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct DashboardStats {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub pending: u64,
    #[serde(default)]
    pub approved: u64,
    #[serde(default)]
    pub rejected: u64,
    #[serde(default)]
    pub total_users: Option<u64>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub approved_amount: Option<f64>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct MonthlyTotal {
    pub month: String,
    #[serde(default, alias = "total_requested", deserialize_with = "lenient_amount")]
    pub total: Option<f64>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct AdminDashboard {
    #[serde(default)]
    pub stats: DashboardStats,
    #[serde(default)]
    pub pending_requests: Vec<BudgetRequest>,
    #[serde(default)]
    pub recent_activity: Vec<BudgetRequest>,
    #[serde(default)]
    pub monthly_totals: Vec<MonthlyTotal>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct TreasurerDashboard {
    #[serde(default)]
    pub stats: DashboardStats,
    #[serde(default)]
    pub recent_requests: Vec<BudgetRequest>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct MonthlyReportRow {
    pub month: String,
    pub city: String,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub total_requested: Option<f64>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct City {
    pub city_id: i64,
    pub name: String,
    #[serde(default)]
    pub province: Option<String>,
}

/// Body of `POST /api/admin/users/`.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub whatsapp: Option<String>,
    pub role: Role,
    pub city_id: i64,
    pub password: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct EventPayload {
    pub name: String,
    pub event_date: String,
    pub notes: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct LinePayload {
    pub category_id: Option<i64>,
    pub description: String,
    pub amount: Option<f64>,
}

/// Body of create and update calls for a budget request.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RequestPayload {
    pub month: String,
    pub description: String,
    pub event: EventPayload,
    pub breakdown: Vec<LinePayload>,
}

/// Accepts amounts as JSON numbers, decimal strings or null.
fn lenient_amount<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Raw::Text(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
