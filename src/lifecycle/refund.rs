use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::{
    app_error::AppError,
    models::{RefundRequestPayload, RefundStatus},
};

#[derive(Deserialize, ToSchema, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefundAction {
    Approve,
    Deny,
}

impl RefundAction {
    pub fn target(self) -> RefundStatus {
        match self {
            RefundAction::Approve => RefundStatus::Approved,
            RefundAction::Deny => RefundStatus::Denied,
        }
    }
}

/// Produces the resolved payload. Only pending requests can be resolved.
pub fn resolve(
    request: &RefundRequestPayload,
    action: RefundAction,
    resolver_id: i32,
    notes: Option<String>,
    at: DateTime<Utc>,
) -> Result<RefundRequestPayload, AppError> {
    if request.status != RefundStatus::Pending {
        return Err(AppError::invalid_transition(
            "refund request",
            request.status,
            action.target(),
        ));
    }

    Ok(RefundRequestPayload {
        status: action.target(),
        resolver_notes: notes,
        resolved_by: Some(resolver_id),
        processed_at: Some(at),
        ..request.clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> RefundRequestPayload {
        RefundRequestPayload {
            order_id: 7,
            customer_id: 1,
            restaurant_id: 3,
            restaurant_name: "Noodle Bar".into(),
            reason: Some("cold".into()),
            amount_cents: 1_250,
            status: RefundStatus::Pending,
            resolver_notes: None,
            resolved_by: None,
            processed_at: None,
            gateway: None,
        }
    }

    #[test]
    fn approving_fills_audit_fields() {
        let now = Utc::now();
        let resolved =
            resolve(&pending(), RefundAction::Approve, 42, Some("sorry".into()), now).unwrap();

        assert_eq!(resolved.status, RefundStatus::Approved);
        assert_eq!(resolved.resolved_by, Some(42));
        assert_eq!(resolved.processed_at, Some(now));
        assert_eq!(resolved.amount_cents, 1_250);
    }

    #[test]
    fn resolved_requests_are_final() {
        let denied = resolve(&pending(), RefundAction::Deny, 42, None, Utc::now()).unwrap();
        let err = resolve(&denied, RefundAction::Approve, 42, None, Utc::now()).unwrap_err();

        assert!(matches!(
            err,
            AppError::InvalidTransition { ref current, .. } if current == "denied"
        ));
    }
}
