//! Push provider contract

use async_trait::async_trait;
use log::info;

use crate::error::Result;
use crate::notify::dispatcher::NotificationJob;

/// Delivers one notification to a user's devices
#[async_trait]
pub trait PushProvider: Send + Sync {
    async fn send(&self, job: &NotificationJob) -> Result<()>;
}

/// Default provider: records the notification in the log. Real push
/// dispatch (APNs, FCM) lives outside this server.
pub struct LogPushProvider;

#[async_trait]
impl PushProvider for LogPushProvider {
    async fn send(&self, job: &NotificationJob) -> Result<()> {
        info!(
            "Push to {}: {} - {} {:?}",
            job.target_user, job.title, job.body, job.metadata
        );
        Ok(())
    }
}
