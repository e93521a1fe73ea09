//! Identity event publishing.
//!
//! Callers hand an event to a bounded queue and return immediately; a
//! single worker task drains the queue into an [`EventChannel`]. A full
//! queue or a failing channel costs the event, never the caller.

use std::sync::Arc;

use keel_core::clock::Clock;
use chrono::{DateTime, Utc};
use keel_core::models::event::{
    EventEnvelope, RECOVERY_CODE_TOPIC, RecoveryCodeIssued, USER_REGISTERED_TOPIC, UserRegistered,
};
use keel_core::models::user::User;
use keel_core::repository::EventChannel;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use serde::Serialize;
use tracing::{debug, error, warn};

#[derive(Clone)]
pub struct EventPublisher {
    tx: mpsc::Sender<EventEnvelope>,
    clock: Arc<dyn Clock>,
}

impl EventPublisher {
    /// Start the delivery worker. It exits once every publisher clone
    /// has been dropped and the queue is drained.
    pub fn spawn<C: EventChannel>(
        channel: C,
        capacity: usize,
        clock: Arc<dyn Clock>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<EventEnvelope>(capacity.max(1));
        let worker = tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                let topic = envelope.topic.clone();
                match channel.deliver(envelope).await {
                    Ok(()) => debug!(%topic, "Event delivered"),
                    Err(e) => error!(%topic, error = %e, "Event delivery failed"),
                }
            }
            debug!("Event worker stopped");
        });
        (Self { tx, clock }, worker)
    }

    pub fn publish_registered(&self, user: &User) {
        let event = UserRegistered {
            user_id: user.id,
            username: user.username.clone(),
            display_name: user.display_name.clone(),
            messenger_handle: user.messenger_handle.clone(),
        };
        self.publish(USER_REGISTERED_TOPIC, user, &event);
    }

    /// Hand a plain recovery code to the notification service.
    pub fn publish_recovery_code(&self, user: &User, code: &str, expires_at: DateTime<Utc>) {
        let event = RecoveryCodeIssued {
            user_id: user.id,
            username: user.username.clone(),
            messenger_handle: user.messenger_handle.clone(),
            code: code.to_string(),
            expires_at,
        };
        self.publish(RECOVERY_CODE_TOPIC, user, &event);
    }

    fn publish<E: Serialize>(&self, topic: &str, user: &User, event: &E) {
        let payload = match serde_json::to_value(event) {
            Ok(payload) => payload,
            Err(e) => {
                error!(user_id = %user.id, %topic, error = %e, "Could not encode event");
                return;
            }
        };
        self.enqueue(EventEnvelope {
            topic: topic.to_string(),
            payload,
            created_at: self.clock.now(),
        });
    }

    fn enqueue(&self, envelope: EventEnvelope) {
        match self.tx.try_send(envelope) {
            Ok(()) => {}
            Err(TrySendError::Full(envelope)) => {
                warn!(topic = %envelope.topic, "Event queue full, dropping event");
            }
            Err(TrySendError::Closed(envelope)) => {
                warn!(topic = %envelope.topic, "Event worker gone, dropping event");
            }
        }
    }
}
