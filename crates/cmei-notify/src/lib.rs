//! # CMEI Notify
//!
//! Two outbound channels:
//! - [`WebhookDispatcher`]: fixed-shape JSON payload to the system webhook
//! - [`WhatsAppGateway`]: text message through a third-party gateway

pub mod error;
pub mod payload;
pub mod webhook;
pub mod whatsapp;

pub use error::NotifyError;
pub use payload::NotificationPayload;
pub use webhook::WebhookDispatcher;
pub use whatsapp::{WhatsAppGateway, normalize_phone};
