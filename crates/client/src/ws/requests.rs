//! Typed request helpers on top of [`RealtimeSession::request`].

use raptor_shared::{ClientCommand, Payload};

use super::session::RealtimeSession;
use crate::error::RequestError;

impl RealtimeSession {
    pub async fn fetch_customer_orders(
        &self,
        customer_email: &str,
        include_history: bool,
    ) -> Result<Payload, RequestError> {
        self.request(ClientCommand::FetchCustomerOrders {
            customer_email: customer_email.to_string(),
            include_history,
        })
        .await
    }

    pub async fn fetch_customer_profile(
        &self,
        customer_email: &str,
    ) -> Result<Payload, RequestError> {
        self.request(ClientCommand::FetchCustomerProfile {
            customer_email: customer_email.to_string(),
        })
        .await
    }

    pub async fn fetch_active_drivers(&self) -> Result<Payload, RequestError> {
        self.request(ClientCommand::FetchActiveDrivers {}).await
    }

    pub async fn fetch_order_details(&self, order_id: &str) -> Result<Payload, RequestError> {
        self.request(ClientCommand::FetchOrderDetails {
            order_id: order_id.to_string(),
        })
        .await
    }

    /// Past orders, newest first; `limit` of `None` leaves it to the server.
    pub async fn fetch_order_history(
        &self,
        customer_email: &str,
        limit: Option<u32>,
    ) -> Result<Payload, RequestError> {
        self.request(ClientCommand::FetchOrderHistory {
            customer_email: customer_email.to_string(),
            limit,
        })
        .await
    }

    /// Post a chat line on an order. Fire-and-forget; dropped unless connected.
    pub fn send_chat_message(&self, order_id: &str, message: &str, sender_email: &str) {
        self.send(ClientCommand::chat(order_id, message, sender_email));
    }
}
