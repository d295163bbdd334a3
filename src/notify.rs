//! New-device notifications.
//!
//! Delivery (mail, push, chat) belongs to an outside collaborator; the
//! engine only needs a fire-and-report hook.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::device::DeviceRecord;

#[derive(Debug, Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

#[async_trait]
pub trait Notifier: Send + Sync {
    /// A known user registered a device not seen before.
    async fn new_device(&self, record: &DeviceRecord) -> Result<(), NotifyError>;
}

pub type SharedNotifier = Arc<dyn Notifier>;

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn new_device(&self, record: &DeviceRecord) -> Result<(), NotifyError> {
        tracing::info!(
            device_id = %record.device_id,
            user_id = record.user_id.as_deref().unwrap_or("-"),
            platform = %record.fingerprint.platform,
            source_ip = %record.last_known_ip,
            "new device registered for existing user"
        );
        Ok(())
    }
}
