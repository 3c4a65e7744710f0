use crate::{app_error::AppError, models::DeliveryStatus};

/// The only status a driver may move a delivery to from `current`.
pub fn next_status(current: DeliveryStatus) -> Option<DeliveryStatus> {
    match current {
        DeliveryStatus::Unclaimed => Some(DeliveryStatus::Claimed),
        DeliveryStatus::Claimed => Some(DeliveryStatus::PickedUp),
        DeliveryStatus::PickedUp => Some(DeliveryStatus::InTransit),
        DeliveryStatus::InTransit => Some(DeliveryStatus::Delivered),
        DeliveryStatus::Delivered | DeliveryStatus::Cancelled => None,
    }
}

pub fn is_allowed(from: DeliveryStatus, to: DeliveryStatus) -> bool {
    next_status(from) == Some(to)
        || (to == DeliveryStatus::Cancelled
            && matches!(from, DeliveryStatus::Unclaimed | DeliveryStatus::Claimed))
}

/// Validates a driver-requested advance. Claiming goes through the claim
/// arbiter and cancellation through the order, so neither is accepted here.
pub fn check_advance(current: DeliveryStatus, requested: DeliveryStatus) -> Result<(), AppError> {
    let driver_step = matches!(
        requested,
        DeliveryStatus::PickedUp | DeliveryStatus::InTransit | DeliveryStatus::Delivered
    );
    if driver_step && next_status(current) == Some(requested) {
        Ok(())
    } else {
        Err(AppError::invalid_transition("delivery", current, requested))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DeliveryStatus::*;

    #[test]
    fn statuses_only_move_forward_one_step() {
        assert!(check_advance(Claimed, PickedUp).is_ok());
        assert!(check_advance(PickedUp, InTransit).is_ok());
        assert!(check_advance(InTransit, Delivered).is_ok());

        assert!(check_advance(Claimed, InTransit).is_err());
        assert!(check_advance(Claimed, Delivered).is_err());
        assert!(check_advance(InTransit, PickedUp).is_err());
        assert!(check_advance(Delivered, Delivered).is_err());
    }

    #[test]
    fn drivers_cannot_claim_or_cancel_through_advance() {
        assert!(check_advance(Unclaimed, Claimed).is_err());
        assert!(check_advance(Claimed, Cancelled).is_err());
    }

    #[test]
    fn cancellation_only_before_pickup() {
        for from in DeliveryStatus::ALL {
            assert_eq!(
                is_allowed(*from, Cancelled),
                matches!(from, Unclaimed | Claimed),
                "{from}"
            );
        }
    }

    #[test]
    fn terminal_statuses_have_no_successor() {
        assert_eq!(next_status(Delivered), None);
        assert_eq!(next_status(Cancelled), None);
    }
}
