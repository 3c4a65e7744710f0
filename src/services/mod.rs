//! Business operations. Each validates against the lifecycle tables, performs
//! one compare-and-set through the store and then fans notifications out.

pub mod claims;
pub mod deliveries;
pub mod dispatch;
pub mod notifications;
pub mod orders;
pub mod refunds;

use crate::{app_error::AppError, app_state::AppState, models::OrderEntity};

/// Upper bound for free-text fields such as instructions, reasons and notes.
pub const MAX_TEXT_LEN: usize = 500;

pub(crate) async fn load_order(state: &AppState, order_id: i32) -> Result<OrderEntity, AppError> {
    state
        .store
        .get_order(order_id)
        .await?
        .ok_or(AppError::NotFound)
}

/// Trims `value`, maps blank to `None` and enforces [`MAX_TEXT_LEN`].
pub(crate) fn clean_text(field: &str, value: Option<String>) -> Result<Option<String>, AppError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let value = value.trim();
    if value.chars().count() > MAX_TEXT_LEN {
        return Err(AppError::BadRequest(format!(
            "{field} must be at most {MAX_TEXT_LEN} characters"
        )));
    }
    Ok((!value.is_empty()).then(|| value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_text_becomes_none() {
        assert_eq!(clean_text("notes", Some("   ".into())).unwrap(), None);
        assert_eq!(
            clean_text("notes", Some(" ring twice ".into())).unwrap(),
            Some("ring twice".into())
        );
    }

    #[test]
    fn over_long_text_is_rejected() {
        let long = "x".repeat(MAX_TEXT_LEN + 1);
        assert!(matches!(
            clean_text("reason", Some(long)),
            Err(AppError::BadRequest(_))
        ));
        assert!(clean_text("reason", Some("x".repeat(MAX_TEXT_LEN))).is_ok());
    }
}
