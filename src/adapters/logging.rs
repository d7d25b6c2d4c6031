use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::delivery::{Delivery, DeliveryStatus, OrderStatus};
use crate::ports::{NotificationSink, OrderStatusSync, PayoutTrigger};

/// Stands in for the push/SMS, order service and payout integrations when the
/// service runs standalone.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingOutbound;

#[async_trait]
impl NotificationSink for TracingOutbound {
    async fn send_assignment_offer(&self, driver_id: Uuid, delivery: &Delivery) -> AppResult<()> {
        info!(
            driver_id = %driver_id,
            delivery_id = %delivery.id,
            pickup = %delivery.pickup.line,
            "assignment offer sent"
        );
        Ok(())
    }

    async fn send_status_update(&self, order_id: Uuid, status: DeliveryStatus) -> AppResult<()> {
        info!(order_id = %order_id, status = %status, "status update sent");
        Ok(())
    }

    async fn send_driver_message(&self, driver_id: Uuid, text: &str) -> AppResult<()> {
        info!(driver_id = %driver_id, text, "driver message sent");
        Ok(())
    }
}

#[async_trait]
impl OrderStatusSync for TracingOutbound {
    async fn update_status(&self, order_id: Uuid, status: OrderStatus) -> AppResult<()> {
        info!(order_id = %order_id, status = status.as_str(), "order status synced");
        Ok(())
    }
}

#[async_trait]
impl PayoutTrigger for TracingOutbound {
    async fn request_payout(&self, delivery_id: Uuid) -> AppResult<()> {
        info!(delivery_id = %delivery_id, "payout requested");
        Ok(())
    }
}
