use chrono::{DateTime, NaiveDate};

/// Rounds to whole cents.
pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

pub fn format_money(amount: Option<f64>) -> String {
    match amount {
        Some(value) => format!("${:.2}", value),
        None => "—".to_string(),
    }
}

/// Amount as it is put back into a form input.
pub fn format_amount_input(amount: Option<f64>) -> String {
    amount.map(|v| format!("{:.2}", v)).unwrap_or_default()
}

/// "2025-11" or "2025-11-01" as "November 2025". Anything else is returned
/// unchanged.
pub fn month_label(month: &str) -> String {
    let trimmed = month.trim();
    let candidate = if trimmed.len() == 7 {
        format!("{}-01", trimmed)
    } else {
        trimmed.chars().take(10).collect()
    };
    match NaiveDate::parse_from_str(&candidate, "%Y-%m-%d") {
        Ok(date) => date.format("%B %Y").to_string(),
        Err(_) => trimmed.to_string(),
    }
}

/// Calendar date of an API timestamp.
pub fn format_date(timestamp: Option<&str>) -> String {
    let Some(raw) = timestamp.map(str::trim).filter(|t| !t.is_empty()) else {
        return "—".to_string();
    };
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return parsed.format("%Y-%m-%d").to_string();
    }
    raw.chars().take(10).collect()
}
