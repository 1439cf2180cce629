use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::entities::menu_category::Station;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is gone.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "event dropped");
        }
    }
}

/// Business events published after a transaction commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    RestaurantCreated(Uuid),

    SessionOpened {
        session_id: Uuid,
        table_id: Uuid,
    },
    SessionClosed(Uuid),

    OrderPlaced {
        order_id: Uuid,
        restaurant_id: Uuid,
    },
    OrderConfirmed(Uuid),
    OrderCancelled(Uuid),

    TicketIssued {
        ticket_id: Uuid,
        station: Station,
        ticket_number: String,
    },
    TicketCompleted(Uuid),

    BillGenerated {
        restaurant_id: Uuid,
        bill_id: Uuid,
    },
    BillPaid {
        restaurant_id: Uuid,
        bill_id: Uuid,
    },
    BillVoided {
        restaurant_id: Uuid,
        bill_id: Uuid,
    },

    PaymentCompleted {
        payment_id: Uuid,
        bill_id: Uuid,
    },
    PaymentFailed(Uuid),

    LoyaltyPointsEarned {
        customer_id: Uuid,
        points: i64,
    },

    VoucherPosted(Uuid),
    VoucherCancelled(Uuid),

    StockLow {
        restaurant_id: Uuid,
        stock_item_id: Uuid,
        quantity: Decimal,
    },
}

/// Reacts to events off the request path.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &Event) -> Result<(), String>;
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, handlers: Vec<Arc<dyn EventHandler>>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::StockLow {
                stock_item_id,
                quantity,
                ..
            } => warn!(%stock_item_id, %quantity, "stock at or below reorder level"),
            Event::PaymentFailed(payment_id) => warn!(%payment_id, "payment failed"),
            other => info!(event = ?other, "event received"),
        }

        for handler in &handlers {
            if let Err(e) = handler.handle_event(&event).await {
                error!(event = ?event, error = %e, "event handler failed");
            }
        }
    }

    warn!("Event processing loop has ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(AtomicUsize);

    #[async_trait]
    impl EventHandler for Counting {
        async fn handle_event(&self, event: &Event) -> Result<(), String> {
            if matches!(event, Event::BillPaid { .. }) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn handlers_see_every_event() {
        let (tx, rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);
        let counter = Arc::new(Counting(AtomicUsize::new(0)));

        sender
            .send_or_log(Event::BillPaid {
                restaurant_id: Uuid::new_v4(),
                bill_id: Uuid::new_v4(),
            })
            .await;
        sender.send_or_log(Event::SessionClosed(Uuid::new_v4())).await;
        drop(sender);

        process_events(rx, vec![counter.clone() as Arc<dyn EventHandler>]).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }
}
