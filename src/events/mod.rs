use crate::entities::low_stock_alert::AlertLevel;
use crate::entities::movement_entry::MovementType;
use crate::entities::reservation::ReservationType;
use crate::entities::transfer::TransferStatus;
use crate::errors::ServiceError;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Handle for publishing domain events onto the processing channel.
#[derive(Clone, Debug)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a bounded channel and returns both ends.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), ServiceError> {
        self.sender
            .send(event)
            .await
            .map_err(|e| ServiceError::EventError(format!("Failed to send event: {}", e)))
    }

    /// Publishes after a commit. A closed channel never fails the caller.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "Dropping event after commit");
            counter!("stock_ledger.events.dropped", 1);
        }
    }
}

// Events published by the stock ledger after a successful commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    MovementPosted {
        movement_id: Uuid,
        movement_number: String,
        product_id: Uuid,
        warehouse_id: Uuid,
        movement_type: MovementType,
        quantity: i32,
        quantity_after: i32,
    },
    StockReserved {
        reservation_id: Uuid,
        product_id: Uuid,
        warehouse_id: Uuid,
        quantity: i32,
        reservation_type: ReservationType,
        reference_id: Uuid,
    },
    ReservationReleased {
        reservation_id: Uuid,
        product_id: Uuid,
        warehouse_id: Uuid,
        quantity: i32,
        reason: Option<String>,
    },
    ReservationFulfilled {
        reservation_id: Uuid,
        movement_id: Uuid,
    },
    ReservationExpired {
        reservation_id: Uuid,
        product_id: Uuid,
        warehouse_id: Uuid,
        quantity: i32,
    },
    LowStockAlertRaised {
        alert_id: Uuid,
        product_id: Uuid,
        warehouse_id: Uuid,
        level: AlertLevel,
        current_quantity: i32,
    },
    LowStockAlertResolved {
        alert_id: Uuid,
        product_id: Uuid,
        warehouse_id: Uuid,
    },
    TransferStatusChanged {
        transfer_id: Uuid,
        transfer_number: String,
        old_status: TransferStatus,
        new_status: TransferStatus,
    },
    InventoryCountApproved {
        count_id: Uuid,
        count_number: String,
        adjustments_posted: usize,
    },
    /// A write-off left fewer units on hand than are promised to
    /// reservations. The reservations stay confirmed until someone acts.
    StockOverReserved {
        product_id: Uuid,
        warehouse_id: Uuid,
        quantity: i32,
        reserved_quantity: i32,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::MovementPosted { .. } => "movement_posted",
            Event::StockReserved { .. } => "stock_reserved",
            Event::ReservationReleased { .. } => "reservation_released",
            Event::ReservationFulfilled { .. } => "reservation_fulfilled",
            Event::ReservationExpired { .. } => "reservation_expired",
            Event::LowStockAlertRaised { .. } => "low_stock_alert_raised",
            Event::LowStockAlertResolved { .. } => "low_stock_alert_resolved",
            Event::TransferStatusChanged { .. } => "transfer_status_changed",
            Event::InventoryCountApproved { .. } => "inventory_count_approved",
            Event::StockOverReserved { .. } => "stock_over_reserved",
        }
    }
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        counter!("stock_ledger.events.processed", 1, "event" => event.name());

        match &event {
            Event::LowStockAlertRaised {
                product_id,
                warehouse_id,
                level,
                current_quantity,
                ..
            } => {
                warn!(
                    %product_id,
                    %warehouse_id,
                    %level,
                    current_quantity,
                    "Low stock alert raised"
                );
            }
            Event::ReservationExpired {
                reservation_id,
                quantity,
                ..
            } => {
                info!(%reservation_id, quantity, "Reservation expired");
            }
            Event::TransferStatusChanged {
                transfer_number,
                old_status,
                new_status,
                ..
            } => {
                info!(
                    transfer_number = transfer_number.as_str(),
                    %old_status,
                    %new_status,
                    "Transfer status changed"
                );
            }
            Event::InventoryCountApproved {
                count_number,
                adjustments_posted,
                ..
            } => {
                info!(
                    count_number = count_number.as_str(),
                    adjustments_posted, "Inventory count approved"
                );
            }
            Event::StockOverReserved {
                product_id,
                warehouse_id,
                quantity,
                reserved_quantity,
            } => {
                warn!(
                    %product_id,
                    %warehouse_id,
                    quantity,
                    reserved_quantity,
                    "Reservations exceed stock on hand"
                );
            }
            other => {
                debug!(event = other.name(), "Received event: {:?}", other);
            }
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_fails_once_receiver_is_gone() {
        let (sender, rx) = EventSender::channel(4);
        drop(rx);
        let err = sender
            .send(Event::ReservationFulfilled {
                reservation_id: Uuid::new_v4(),
                movement_id: Uuid::new_v4(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::EventError(_)));
    }

    #[tokio::test]
    async fn events_are_delivered_in_order() {
        let (sender, mut rx) = EventSender::channel(4);
        let first = Event::LowStockAlertResolved {
            alert_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            warehouse_id: Uuid::new_v4(),
        };
        let second = Event::ReservationFulfilled {
            reservation_id: Uuid::new_v4(),
            movement_id: Uuid::new_v4(),
        };
        sender.send(first.clone()).await.unwrap();
        sender.send_or_log(second.clone()).await;
        assert_eq!(rx.recv().await, Some(first));
        assert_eq!(rx.recv().await, Some(second));
    }
}
