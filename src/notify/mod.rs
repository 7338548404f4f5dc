//! Push notifications for completed jobs.
//!
//! Delivery is strictly best-effort: a completed job stays completed no
//! matter what the push transport does. The only side effect a failure
//! may have is pruning a subscription whose endpoint reported itself
//! permanently gone.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::NotifyError;
use crate::store::{Database, PushSubscription};

/// What a finished job pushes to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    /// Deep link back into the app.
    pub url: String,
}

impl PushPayload {
    pub fn results_ready(job_id: Uuid, query: &str) -> Self {
        Self {
            title: "SendCat: Results ready".to_string(),
            body: format!("Tap to view results for: {query}"),
            url: format!("/app?agent=1&jobId={job_id}"),
        }
    }
}

/// Transport seam for push delivery, so tests never touch the network
/// and the web-push wire details stay swappable.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn deliver(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
    ) -> Result<(), NotifyError>;
}

/// POSTs the payload as JSON to the subscription endpoint.
pub struct HttpPushTransport {
    client: reqwest::Client,
}

impl HttpPushTransport {
    pub fn new(timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Delivery {
                reason: format!("failed to build push client: {e}"),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PushTransport for HttpPushTransport {
    async fn deliver(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
    ) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&subscription.endpoint)
            .json(payload)
            .send()
            .await
            .map_err(|e| NotifyError::Delivery {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        // 404/410 from a push service means the subscription no longer
        // exists; anything else is treated as transient.
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
            return Err(NotifyError::Gone {
                endpoint: subscription.endpoint.clone(),
                status: status.as_u16(),
            });
        }

        Err(NotifyError::Delivery {
            reason: format!("push endpoint returned status {status}"),
        })
    }
}

/// Looks up the freshest subscription for a session and hands the payload
/// to the transport. Never returns an error.
pub struct Notifier {
    db: Arc<dyn Database>,
    transport: Arc<dyn PushTransport>,
}

impl Notifier {
    pub fn new(db: Arc<dyn Database>, transport: Arc<dyn PushTransport>) -> Self {
        Self { db, transport }
    }

    /// Tell the session's device that a job finished. Every failure path
    /// ends in a log line, not an error.
    pub async fn notify_results_ready(&self, session_id: &str, job_id: Uuid, query: &str) {
        let subscription = match self
            .db
            .latest_push_subscription_for_session(session_id)
            .await
        {
            Ok(Some(subscription)) => subscription,
            Ok(None) => {
                debug!(session_id, "No push subscription registered, skipping notification");
                return;
            }
            Err(e) => {
                warn!(session_id, "Push subscription lookup failed: {e}");
                return;
            }
        };

        let payload = PushPayload::results_ready(job_id, query);
        match self.transport.deliver(&subscription, &payload).await {
            Ok(()) => {
                debug!(session_id, endpoint = %subscription.endpoint, "Push notification delivered");
            }
            Err(e) => {
                warn!(
                    session_id,
                    endpoint = %subscription.endpoint,
                    "Push notification failed: {e}"
                );
                if e.is_gone() {
                    self.prune_subscription(&subscription.endpoint).await;
                }
            }
        }
    }

    async fn prune_subscription(&self, endpoint: &str) {
        match self.db.delete_push_subscription_by_endpoint(endpoint).await {
            Ok(true) => info!(endpoint, "Pruned dead push subscription"),
            Ok(false) => {}
            Err(e) => warn!(endpoint, "Failed to prune dead push subscription: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::store::LibSqlBackend;

    struct StubTransport {
        calls: AtomicUsize,
        delivered: Mutex<Vec<PushPayload>>,
        fail_with: Option<fn(&PushSubscription) -> NotifyError>,
    }

    impl StubTransport {
        fn ok() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delivered: Mutex::new(Vec::new()),
                fail_with: None,
            }
        }

        fn failing(fail_with: fn(&PushSubscription) -> NotifyError) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delivered: Mutex::new(Vec::new()),
                fail_with: Some(fail_with),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PushTransport for StubTransport {
        async fn deliver(
            &self,
            subscription: &PushSubscription,
            payload: &PushPayload,
        ) -> Result<(), NotifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(fail) = self.fail_with {
                return Err(fail(subscription));
            }
            self.delivered.lock().unwrap().push(payload.clone());
            Ok(())
        }
    }

    async fn db_with_subscription(session_id: &str, endpoint: &str) -> Arc<LibSqlBackend> {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        db.upsert_push_subscription(session_id, endpoint, "p256dh-key", "auth-key", None)
            .await
            .unwrap();
        db
    }

    #[test]
    fn payload_carries_the_deep_link() {
        let job_id = Uuid::new_v4();
        let payload = PushPayload::results_ready(job_id, "wireless earbuds");
        assert_eq!(payload.title, "SendCat: Results ready");
        assert_eq!(payload.body, "Tap to view results for: wireless earbuds");
        assert_eq!(payload.url, format!("/app?agent=1&jobId={job_id}"));
    }

    #[tokio::test]
    async fn delivers_to_the_registered_subscription() {
        let db = db_with_subscription("sess-1", "https://push.example/abc").await;
        let transport = Arc::new(StubTransport::ok());
        let notifier = Notifier::new(db, transport.clone());

        notifier
            .notify_results_ready("sess-1", Uuid::new_v4(), "usb hub")
            .await;

        assert_eq!(transport.calls(), 1);
        let delivered = transport.delivered.lock().unwrap();
        assert_eq!(delivered[0].body, "Tap to view results for: usb hub");
    }

    #[tokio::test]
    async fn no_subscription_means_no_delivery_attempt() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let transport = Arc::new(StubTransport::ok());
        let notifier = Notifier::new(db, transport.clone());

        notifier
            .notify_results_ready("sess-unknown", Uuid::new_v4(), "usb hub")
            .await;

        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn gone_endpoint_is_pruned() {
        let db = db_with_subscription("sess-1", "https://push.example/dead").await;
        let transport = Arc::new(StubTransport::failing(|sub| NotifyError::Gone {
            endpoint: sub.endpoint.clone(),
            status: 410,
        }));
        let notifier = Notifier::new(db.clone(), transport);

        notifier
            .notify_results_ready("sess-1", Uuid::new_v4(), "usb hub")
            .await;

        let remaining = db
            .latest_push_subscription_for_session("sess-1")
            .await
            .unwrap();
        assert!(remaining.is_none());
    }

    #[tokio::test]
    async fn transient_failures_leave_the_subscription_alone() {
        let db = db_with_subscription("sess-1", "https://push.example/flaky").await;
        let transport = Arc::new(StubTransport::failing(|_| NotifyError::Delivery {
            reason: "connection reset".to_string(),
        }));
        let notifier = Notifier::new(db.clone(), transport);

        notifier
            .notify_results_ready("sess-1", Uuid::new_v4(), "usb hub")
            .await;

        let remaining = db
            .latest_push_subscription_for_session("sess-1")
            .await
            .unwrap();
        assert!(remaining.is_some());
    }
}
