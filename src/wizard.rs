//! Budget request form state, for both the single-page form and the stepped
//! wizard.

use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;
use crate::structs::{BudgetRequest, EventPayload, LinePayload, RequestPayload};
use crate::utils::{format_amount_input, round_cents};

pub const HEADER_REQUIRED: &str = "Month, event name, and event date are required.";
pub const LINE_REQUIRED: &str = "At least one breakdown line is required.";

/// One breakdown line exactly as typed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineInput {
    pub category_id: String,
    pub description: String,
    pub amount: String,
}

impl LineInput {
    /// A line counts once any of its fields holds something.
    pub fn is_touched(&self) -> bool {
        !self.category_id.trim().is_empty()
            || !self.description.trim().is_empty()
            || !self.amount.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestForm {
    pub month: String,
    pub description: String,
    pub event_name: String,
    pub event_date: String,
    pub event_notes: String,
    pub lines: Vec<LineInput>,
}

impl Default for RequestForm {
    fn default() -> Self {
        Self {
            month: String::new(),
            description: String::new(),
            event_name: String::new(),
            event_date: String::new(),
            event_notes: String::new(),
            lines: vec![LineInput::default()],
        }
    }
}

/// What the submit button pressed on the form asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormAction {
    Submit,
    AddLine,
    RemoveLine(usize),
    SaveDraft,
    Next,
    Back,
}

impl FormAction {
    pub fn from_pairs(pairs: &[(String, String)]) -> Self {
        let Some(action) = field(pairs, "action") else {
            return FormAction::Submit;
        };
        match action {
            "add_line" => FormAction::AddLine,
            "save_draft" => FormAction::SaveDraft,
            "next" => FormAction::Next,
            "back" => FormAction::Back,
            other => other
                .strip_prefix("remove_line:")
                .and_then(|idx| idx.parse().ok())
                .map(FormAction::RemoveLine)
                .unwrap_or(FormAction::Submit),
        }
    }
}

/// First value submitted under `name`.
pub fn field<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

impl RequestForm {
    /// Builds the form from urlencoded pairs. Line fields repeat once per
    /// line, in document order.
    pub fn from_pairs(pairs: &[(String, String)]) -> Self {
        let text = |name: &str| field(pairs, name).unwrap_or_default().to_string();
        let mut categories = Vec::new();
        let mut descriptions = Vec::new();
        let mut amounts = Vec::new();
        for (key, value) in pairs {
            match key.as_str() {
                "line_category" => categories.push(value.clone()),
                "line_description" => descriptions.push(value.clone()),
                "line_amount" => amounts.push(value.clone()),
                _ => {}
            }
        }

        let count = categories.len().max(descriptions.len()).max(amounts.len());
        let mut lines: Vec<LineInput> = (0..count)
            .map(|i| LineInput {
                category_id: categories.get(i).cloned().unwrap_or_default(),
                description: descriptions.get(i).cloned().unwrap_or_default(),
                amount: amounts.get(i).cloned().unwrap_or_default(),
            })
            .collect();
        if lines.is_empty() {
            lines.push(LineInput::default());
        }

        Self {
            month: text("month"),
            description: text("description"),
            event_name: text("event_name"),
            event_date: text("event_date"),
            event_notes: text("event_notes"),
            lines,
        }
    }

    /// Pre-populates the form from a stored request (edit mode).
    pub fn from_request(request: &BudgetRequest) -> Self {
        let event = request.event.clone().unwrap_or_default();
        let mut lines: Vec<LineInput> = request
            .lines()
            .iter()
            .map(|line| LineInput {
                category_id: line.category_id.map(|c| c.to_string()).unwrap_or_default(),
                description: line.description.clone().unwrap_or_default(),
                amount: format_amount_input(line.amount),
            })
            .collect();
        if lines.is_empty() {
            lines.push(LineInput::default());
        }

        Self {
            month: request.month.clone().unwrap_or_default(),
            description: request.description.clone().unwrap_or_default(),
            event_name: event.name.unwrap_or_default(),
            event_date: event.event_date.unwrap_or_default(),
            event_notes: event.notes.unwrap_or_default(),
            lines,
        }
    }

    pub fn add_line(&mut self) {
        self.lines.push(LineInput::default());
    }

    /// Removes a line, keeping at least one on the form.
    pub fn remove_line(&mut self, index: usize) {
        if self.lines.len() > 1 && index < self.lines.len() {
            self.lines.remove(index);
        }
    }

    fn header_complete(&self) -> bool {
        !self.month.trim().is_empty()
            && !self.event_name.trim().is_empty()
            && !self.event_date.trim().is_empty()
    }

    /// Validates the whole form and composes the API payload. Untouched lines
    /// are dropped.
    pub fn validate(&self) -> Result<RequestPayload, ValidationError> {
        let mut errors = Vec::new();
        if !self.header_complete() {
            errors.push(HEADER_REQUIRED.to_string());
        }

        let mut breakdown = Vec::new();
        for (idx, line) in self.lines.iter().enumerate() {
            if !line.is_touched() {
                continue;
            }
            match (parse_category(&line.category_id), parse_amount(&line.amount)) {
                (Ok(category_id), Ok(amount)) => breakdown.push(LinePayload {
                    category_id,
                    description: line.description.trim().to_string(),
                    amount,
                }),
                (category, amount) => {
                    for reason in [category.err(), amount.err()].into_iter().flatten() {
                        errors.push(format!("Line {}: {}", idx + 1, reason));
                    }
                }
            }
        }
        if breakdown.is_empty() && !errors.iter().any(|e| e.starts_with("Line ")) {
            errors.push(LINE_REQUIRED.to_string());
        }

        ValidationError::from_messages(errors)?;
        Ok(RequestPayload {
            month: self.month.trim().to_string(),
            description: self.description.trim().to_string(),
            event: EventPayload {
                name: self.event_name.trim().to_string(),
                event_date: self.event_date.trim().to_string(),
                notes: self.event_notes.trim().to_string(),
            },
            breakdown,
        })
    }

    /// Sum of the amounts typed so far.
    pub fn running_total(&self) -> f64 {
        round_cents(
            self.lines
                .iter()
                .filter_map(|l| parse_amount(&l.amount).ok().flatten())
                .sum(),
        )
    }
}

/// Empty means "no amount"; otherwise a finite, non-negative number rounded
/// to cents.
fn parse_amount(raw: &str) -> Result<Option<f64>, &'static str> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let value: f64 = raw
        .replace(',', ".")
        .parse()
        .map_err(|_| "amount must be a number.")?;
    if !value.is_finite() {
        return Err("amount must be a number.");
    }
    if value < 0.0 {
        return Err("amount cannot be negative.");
    }
    let amount = round_cents(value);
    if !amount.is_finite() {
        return Err("amount is too large.");
    }
    Ok(Some(amount))
}

/// Empty means "uncategorised"; otherwise a positive category id.
fn parse_category(raw: &str) -> Result<Option<i64>, &'static str> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    match raw.parse::<i64>() {
        Ok(id) if id > 0 => Ok(Some(id)),
        _ => Err("category must be a category number."),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Step {
    Request,
    Event,
    Breakdown,
}

impl Step {
    pub const ALL: [Step; 3] = [Step::Request, Step::Event, Step::Breakdown];

    pub fn number(self) -> u8 {
        match self {
            Step::Request => 1,
            Step::Event => 2,
            Step::Breakdown => 3,
        }
    }

    pub fn from_number(n: u8) -> Option<Step> {
        Step::ALL.into_iter().find(|s| s.number() == n)
    }

    pub fn title(self) -> &'static str {
        match self {
            Step::Request => "Request Details",
            Step::Event => "Event Information",
            Step::Breakdown => "Budget Breakdown",
        }
    }

    pub fn next(self) -> Option<Step> {
        Step::from_number(self.number() + 1)
    }

    pub fn prev(self) -> Option<Step> {
        self.number().checked_sub(1).and_then(Step::from_number)
    }
}

/// The stepped variant: one section at a time, each validated before the
/// wizard moves past it.
#[derive(Debug, Clone, PartialEq)]
pub struct StepWizard {
    pub step: Step,
    pub form: RequestForm,
}

impl Default for StepWizard {
    fn default() -> Self {
        Self {
            step: Step::Request,
            form: RequestForm::default(),
        }
    }
}

impl StepWizard {
    pub fn from_pairs(pairs: &[(String, String)]) -> Self {
        let step = field(pairs, "step")
            .and_then(|s| s.parse::<u8>().ok())
            .and_then(Step::from_number)
            .unwrap_or(Step::Request);
        Self {
            step,
            form: RequestForm::from_pairs(pairs),
        }
    }

    pub fn validate_step(&self, step: Step) -> Result<(), ValidationError> {
        let form = &self.form;
        let mut errors = Vec::new();
        match step {
            Step::Request => {
                if form.month.trim().is_empty() {
                    errors.push("Month is required.".to_string());
                }
            }
            Step::Event => {
                if form.event_name.trim().is_empty() {
                    errors.push("Event name is required.".to_string());
                }
                if form.event_date.trim().is_empty() {
                    errors.push("Event date is required.".to_string());
                }
            }
            Step::Breakdown => {
                let mut touched = 0;
                for (idx, line) in form.lines.iter().enumerate() {
                    if !line.is_touched() {
                        continue;
                    }
                    touched += 1;
                    if line.description.trim().is_empty() {
                        errors.push(format!("Line {}: description is required.", idx + 1));
                    }
                    if let Err(reason) = parse_category(&line.category_id) {
                        errors.push(format!("Line {}: {}", idx + 1, reason));
                    }
                    match parse_amount(&line.amount) {
                        Ok(Some(amount)) if amount > 0.0 => {}
                        Ok(_) => {
                            errors.push(format!("Line {}: amount must be greater than 0.", idx + 1))
                        }
                        Err(reason) => errors.push(format!("Line {}: {}", idx + 1, reason)),
                    }
                }
                if touched == 0 {
                    errors.push(LINE_REQUIRED.to_string());
                }
            }
        }
        ValidationError::from_messages(errors)
    }

    /// Moves forward if the current section validates.
    pub fn advance(&mut self) -> Result<(), ValidationError> {
        self.validate_step(self.step)?;
        if let Some(next) = self.step.next() {
            self.step = next;
        }
        Ok(())
    }

    pub fn back(&mut self) {
        if let Some(prev) = self.step.prev() {
            self.step = prev;
        }
    }

    pub fn is_last(&self) -> bool {
        self.step.next().is_none()
    }

    /// Re-validates every section, stopping on the first one that fails so
    /// the wizard can show it.
    pub fn submit(&mut self) -> Result<RequestPayload, ValidationError> {
        for step in Step::ALL {
            if let Err(e) = self.validate_step(step) {
                self.step = step;
                return Err(e);
            }
        }
        self.form.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::{BreakdownLine, Event, RequestStatus};

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn filled() -> RequestForm {
        RequestForm {
            month: "2025-11-01".into(),
            description: "Monthly halaqa".into(),
            event_name: "Youth Night".into(),
            event_date: "2025-11-14".into(),
            event_notes: String::new(),
            lines: vec![LineInput {
                category_id: String::new(),
                description: "Food".into(),
                amount: "25".into(),
            }],
        }
    }

    #[test]
    fn missing_month_fails() {
        let form = RequestForm {
            month: String::new(),
            ..filled()
        };
        let err = form.validate().unwrap_err();
        assert_eq!(err.messages, vec![HEADER_REQUIRED.to_string()]);
    }

    #[test]
    fn all_blank_lines_fail() {
        let form = RequestForm {
            lines: vec![LineInput::default(), LineInput::default()],
            ..filled()
        };
        let err = form.validate().unwrap_err();
        assert_eq!(err.messages, vec![LINE_REQUIRED.to_string()]);
    }

    #[test]
    fn untouched_lines_are_dropped_and_amounts_rounded() {
        let form = RequestForm {
            lines: vec![
                LineInput::default(),
                LineInput {
                    category_id: "4".into(),
                    description: " Snacks ".into(),
                    amount: "12.346".into(),
                },
                LineInput {
                    description: "Prizes".into(),
                    ..LineInput::default()
                },
            ],
            ..filled()
        };
        let payload = form.validate().unwrap();
        assert_eq!(payload.breakdown.len(), 2);
        assert_eq!(payload.breakdown[0].category_id, Some(4));
        assert_eq!(payload.breakdown[0].description, "Snacks");
        assert_eq!(payload.breakdown[0].amount, Some(12.35));
        assert_eq!(payload.breakdown[1].amount, None);
    }

    #[test]
    fn bad_amounts_are_reported_per_line() {
        let form = RequestForm {
            lines: vec![
                LineInput {
                    description: "Food".into(),
                    amount: "-3".into(),
                    ..LineInput::default()
                },
                LineInput {
                    description: "Hall".into(),
                    amount: "abc".into(),
                    ..LineInput::default()
                },
            ],
            ..filled()
        };
        let err = form.validate().unwrap_err();
        assert_eq!(
            err.messages,
            vec![
                "Line 1: amount cannot be negative.".to_string(),
                "Line 2: amount must be a number.".to_string(),
            ]
        );
    }

    #[test]
    fn amounts_that_overflow_when_rounded_are_refused() {
        let form = RequestForm {
            lines: vec![LineInput {
                description: "Hall".into(),
                amount: "1e308".into(),
                ..LineInput::default()
            }],
            ..filled()
        };
        let err = form.validate().unwrap_err();
        assert_eq!(err.messages, vec!["Line 1: amount is too large.".to_string()]);
        assert_eq!(form.running_total(), 0.0);

        let mut wizard = StepWizard {
            step: Step::Breakdown,
            form,
        };
        assert!(wizard.submit().is_err());
        assert_eq!(wizard.step, Step::Breakdown);
    }

    #[test]
    fn non_numeric_category_is_reported() {
        let form = RequestForm {
            lines: vec![LineInput {
                category_id: "abc".into(),
                description: "Food".into(),
                amount: "-1".into(),
            }],
            ..filled()
        };
        let err = form.validate().unwrap_err();
        assert_eq!(
            err.messages,
            vec![
                "Line 1: category must be a category number.".to_string(),
                "Line 1: amount cannot be negative.".to_string(),
            ]
        );

        let wizard = StepWizard {
            step: Step::Breakdown,
            form: RequestForm {
                lines: vec![LineInput {
                    category_id: "0".into(),
                    description: "Food".into(),
                    amount: "5".into(),
                }],
                ..filled()
            },
        };
        let err = wizard.validate_step(Step::Breakdown).unwrap_err();
        assert_eq!(err.messages, vec!["Line 1: category must be a category number.".to_string()]);
    }

    #[test]
    fn pairs_rebuild_lines_in_order() {
        let form = RequestForm::from_pairs(&pairs(&[
            ("month", "2025-11-01"),
            ("event_name", "Retreat"),
            ("line_category", ""),
            ("line_description", "Bus"),
            ("line_amount", "100"),
            ("line_category", ""),
            ("line_description", "Food"),
            ("line_amount", "50.5"),
            ("action", "remove_line:0"),
        ]));
        assert_eq!(form.lines.len(), 2);
        assert_eq!(form.lines[1].description, "Food");
        assert_eq!(form.event_date, "");
        assert_eq!(form.running_total(), 150.5);
    }

    #[test]
    fn actions_parse() {
        assert_eq!(FormAction::from_pairs(&pairs(&[])), FormAction::Submit);
        assert_eq!(FormAction::from_pairs(&pairs(&[("action", "add_line")])), FormAction::AddLine);
        assert_eq!(
            FormAction::from_pairs(&pairs(&[("action", "remove_line:2")])),
            FormAction::RemoveLine(2)
        );
        assert_eq!(FormAction::from_pairs(&pairs(&[("action", "save_draft")])), FormAction::SaveDraft);
    }

    #[test]
    fn at_least_one_line_stays() {
        let mut form = RequestForm::default();
        form.remove_line(0);
        assert_eq!(form.lines.len(), 1);
        form.add_line();
        form.remove_line(5);
        assert_eq!(form.lines.len(), 2);
    }

    #[test]
    fn edit_mode_rebuilds_everything() {
        let request = BudgetRequest {
            request_id: 5,
            city_id: Some(1),
            city_name: Some("Toronto".into()),
            month: Some("2025-10-01".into()),
            description: Some("Fall event".into()),
            status: RequestStatus::Rejected,
            requester_id: Some(2),
            requester_name: None,
            requester_email: None,
            admin_comment: Some("Add receipts".into()),
            created_at: None,
            updated_at: None,
            event: Some(Event {
                name: Some("Fall Fair".into()),
                event_date: Some("2025-10-20".into()),
                notes: Some("Outdoor".into()),
                total_amount: Some(30.0),
            }),
            breakdown_lines: Some(vec![
                BreakdownLine {
                    line_number: Some(1),
                    category_id: Some(2),
                    description: Some("Games".into()),
                    amount: Some(30.0),
                },
            ]),
            amount: None,
        };
        let form = RequestForm::from_request(&request);
        assert_eq!(form.event_name, "Fall Fair");
        assert_eq!(form.event_notes, "Outdoor");
        assert_eq!(form.lines[0].category_id, "2");
        assert_eq!(form.lines[0].amount, "30.00");
        assert!(form.validate().is_ok());

        let bare = BudgetRequest {
            event: None,
            breakdown_lines: None,
            ..request
        };
        assert_eq!(RequestForm::from_request(&bare).lines.len(), 1);
    }

    #[test]
    fn stepped_wizard_validates_only_current_section() {
        let mut wizard = StepWizard::default();
        assert!(wizard.advance().is_err());
        assert_eq!(wizard.step, Step::Request);

        wizard.form.month = "2025-11-01".into();
        wizard.advance().unwrap();
        assert_eq!(wizard.step, Step::Event);

        wizard.back();
        assert_eq!(wizard.step, Step::Request);
        wizard.advance().unwrap();

        let err = wizard.advance().unwrap_err();
        assert_eq!(err.messages.len(), 2);
        wizard.form.event_name = "Iftar".into();
        wizard.form.event_date = "2026-03-01".into();
        wizard.advance().unwrap();
        assert!(wizard.is_last());
    }

    #[test]
    fn stepped_lines_enforced_only_when_touched() {
        let mut wizard = StepWizard {
            step: Step::Breakdown,
            form: RequestForm {
                lines: vec![
                    LineInput {
                        description: "Dates".into(),
                        amount: "20".into(),
                        ..LineInput::default()
                    },
                    LineInput::default(),
                ],
                ..filled()
            },
        };
        assert!(wizard.validate_step(Step::Breakdown).is_ok());

        wizard.form.lines[1].amount = "0".into();
        let err = wizard.validate_step(Step::Breakdown).unwrap_err();
        assert_eq!(
            err.messages,
            vec![
                "Line 2: description is required.".to_string(),
                "Line 2: amount must be greater than 0.".to_string(),
            ]
        );
    }

    #[test]
    fn stepped_submit_jumps_back_to_failing_section() {
        let mut wizard = StepWizard {
            step: Step::Breakdown,
            form: RequestForm {
                event_date: String::new(),
                ..filled()
            },
        };
        assert!(wizard.submit().is_err());
        assert_eq!(wizard.step, Step::Event);

        wizard.form.event_date = "2025-11-14".into();
        let payload = wizard.submit().unwrap();
        assert_eq!(payload.breakdown[0].amount, Some(25.0));
    }

    #[test]
    fn steps_number_round_trip() {
        assert_eq!(Step::Request.prev(), None);
        assert_eq!(Step::Breakdown.next(), None);
        assert_eq!(Step::from_number(2), Some(Step::Event));
        assert_eq!(Step::from_number(4), None);
    }
}
