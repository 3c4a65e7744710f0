use std::{collections::BTreeSet, sync::Arc};

use dashmap::DashMap;

/// New-order alerts each driver has not acknowledged yet.
///
/// Alerts live in memory only: they are a nudge, the durable record is the
/// `new_order` notification.
#[derive(Clone, Default)]
pub struct AlertBoard {
    pending: Arc<DashMap<i32, BTreeSet<i32>>>,
}

impl AlertBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self, driver_id: i32, order_id: i32) {
        self.pending.entry(driver_id).or_default().insert(order_id);
    }

    /// Acknowledges one alert, or all of them when `order_id` is `None`.
    /// Returns how many were cleared; acknowledging twice clears nothing.
    pub fn acknowledge(&self, driver_id: i32, order_id: Option<i32>) -> usize {
        let cleared = {
            let Some(mut set) = self.pending.get_mut(&driver_id) else {
                return 0;
            };
            match order_id {
                Some(order_id) => usize::from(set.remove(&order_id)),
                None => {
                    let n = set.len();
                    set.clear();
                    n
                }
            }
        };
        self.pending.remove_if(&driver_id, |_, set| set.is_empty());
        cleared
    }

    /// Withdraws the alert from every driver, e.g. once the order is claimed.
    pub fn clear_order(&self, order_id: i32) {
        for mut entry in self.pending.iter_mut() {
            entry.value_mut().remove(&order_id);
        }
        self.pending.retain(|_, set| !set.is_empty());
    }

    pub fn pending_for(&self, driver_id: i32) -> Vec<i32> {
        self.pending
            .get(&driver_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acknowledge_is_idempotent() {
        let board = AlertBoard::new();
        board.raise(1, 10);
        board.raise(1, 11);

        assert_eq!(board.acknowledge(1, Some(10)), 1);
        assert_eq!(board.acknowledge(1, Some(10)), 0);
        assert_eq!(board.pending_for(1), vec![11]);
    }

    #[test]
    fn acknowledge_all_empties_the_driver() {
        let board = AlertBoard::new();
        board.raise(1, 10);
        board.raise(1, 11);

        assert_eq!(board.acknowledge(1, None), 2);
        assert!(board.pending_for(1).is_empty());
        assert_eq!(board.acknowledge(1, None), 0);
    }

    #[test]
    fn claimed_order_disappears_for_everyone() {
        let board = AlertBoard::new();
        board.raise(1, 10);
        board.raise(2, 10);
        board.raise(2, 12);

        board.clear_order(10);

        assert!(board.pending_for(1).is_empty());
        assert_eq!(board.pending_for(2), vec![12]);
    }
}
