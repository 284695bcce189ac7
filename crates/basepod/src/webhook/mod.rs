//! Webhook ingest — signature verification, push filtering, and the
//! bridge into the git deploy flow.

pub mod ingest;
pub mod signature;

pub use ingest::{handle_webhook, setup_webhook, WebhookError, WebhookResponse};
pub use signature::{generate_secret, verify_signature};
