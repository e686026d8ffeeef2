pub mod alerts;
pub mod audit;
pub mod inventory_counts;
pub mod reservations;
pub mod sequence;
pub mod stock_ledger;
pub mod transfers;
pub mod warehouses;

use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

/// Upper bound on page size for list queries.
pub const MAX_PAGE_SIZE: u64 = 1000;

pub(crate) fn validate_page(page: u64, limit: u64) -> Result<(), ServiceError> {
    if page == 0 {
        return Err(ServiceError::ValidationError(
            "Page number must be greater than 0".to_string(),
        ));
    }
    if limit == 0 || limit > MAX_PAGE_SIZE {
        return Err(ServiceError::ValidationError(format!(
            "Limit must be between 1 and {}",
            MAX_PAGE_SIZE
        )));
    }
    Ok(())
}

/// Publishes events collected during a committed unit of work.
pub(crate) async fn publish_all(sender: &EventSender, events: Vec<Event>) {
    for event in events {
        sender.send_or_log(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_bounds_are_enforced() {
        assert!(validate_page(1, 50).is_ok());
        assert!(validate_page(0, 50).is_err());
        assert!(validate_page(1, 0).is_err());
        assert!(validate_page(1, MAX_PAGE_SIZE + 1).is_err());
    }
}
