use crate::{app_error::AppError, models::OrderStatus};

/// Actions that move an order along its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderTransition {
    ConfirmPayment,
    Cancel,
    Complete,
    Deliver,
}

impl OrderTransition {
    pub const ALL: &'static [OrderTransition] = &[
        OrderTransition::ConfirmPayment,
        OrderTransition::Cancel,
        OrderTransition::Complete,
        OrderTransition::Deliver,
    ];

    pub fn target(self) -> OrderStatus {
        match self {
            OrderTransition::ConfirmPayment => OrderStatus::Paid,
            OrderTransition::Cancel => OrderStatus::Cancelled,
            OrderTransition::Complete => OrderStatus::Completed,
            OrderTransition::Deliver => OrderStatus::Delivered,
        }
    }

    /// Statuses the transition may start from.
    pub fn sources(self) -> &'static [OrderStatus] {
        match self {
            OrderTransition::ConfirmPayment => &[OrderStatus::Pending],
            OrderTransition::Cancel => &[OrderStatus::Pending, OrderStatus::Paid],
            OrderTransition::Complete => &[OrderStatus::Paid],
            OrderTransition::Deliver => &[OrderStatus::Completed],
        }
    }
}

pub fn is_allowed(from: OrderStatus, to: OrderStatus) -> bool {
    OrderTransition::ALL
        .iter()
        .any(|t| t.target() == to && t.sources().contains(&from))
}

/// Returns the status `transition` leads to from `current`.
pub fn apply(current: OrderStatus, transition: OrderTransition) -> Result<OrderStatus, AppError> {
    if transition.sources().contains(&current) {
        Ok(transition.target())
    } else {
        Err(AppError::invalid_transition(
            "order",
            current,
            transition.target(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrderStatus::*;

    const EDGES: &[(OrderStatus, OrderStatus)] = &[
        (Pending, Paid),
        (Pending, Cancelled),
        (Paid, Cancelled),
        (Paid, Completed),
        (Completed, Delivered),
    ];

    #[test]
    fn only_listed_edges_are_allowed() {
        for from in OrderStatus::ALL {
            for to in OrderStatus::ALL {
                assert_eq!(
                    is_allowed(*from, *to),
                    EDGES.contains(&(*from, *to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn terminal_statuses_have_no_exit() {
        for from in [Cancelled, Delivered] {
            for transition in OrderTransition::ALL {
                assert!(apply(from, *transition).is_err());
            }
        }
    }

    #[test]
    fn rejection_reports_current_status() {
        match apply(Completed, OrderTransition::Cancel) {
            Err(AppError::InvalidTransition {
                current, attempted, ..
            }) => {
                assert_eq!(current, "completed");
                assert_eq!(attempted, "cancelled");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
