// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Publisher
//!
//! The one entry point the rest of the application uses to put domain events
//! on the broker. Each call validates its arguments, stamps a fresh message,
//! and hands it to the retry pipeline which, attempt after attempt, asks the
//! connection guard for a channel and sends the message on it.

use crate::{
    channel::LapinConnector,
    config::RabbitMqConfig,
    connection::{ConnectionGuard, ConnectionState},
    errors::{AmqpError, PublishError},
    message::OutboundMessage,
    retry::RetryPolicy,
    topology::TopologyDescriptor,
    transport::Connector,
};
use async_trait::async_trait;
use opentelemetry::Context;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Publishes opaque, caller-serialized JSON payloads.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Delivers `body` to `exchange` with `routing_key`.
    ///
    /// Fails with `PublishError::Validation` when any argument is empty, and
    /// with an infrastructure error once the broker could not be reached
    /// within the retry budget.
    async fn publish(&self, exchange: &str, routing_key: &str, body: &str)
        -> Result<(), PublishError>;
}

/// RabbitMQ implementation of the Publisher trait.
pub struct RabbitMQPublisher {
    guard: ConnectionGuard,
    retry: RetryPolicy,
}

impl RabbitMQPublisher {
    /// Creates a new RabbitMQ publisher. No connection is opened until the
    /// first publish.
    pub fn new(
        connector: Arc<dyn Connector>,
        topology: &TopologyDescriptor,
        retry: RetryPolicy,
        confirms: bool,
    ) -> Arc<RabbitMQPublisher> {
        Arc::new(RabbitMQPublisher {
            guard: ConnectionGuard::new(connector, topology, confirms),
            retry,
        })
    }

    /// Creates a publisher talking to the broker described by `cfg`.
    pub fn from_config(cfg: &RabbitMqConfig) -> Arc<RabbitMQPublisher> {
        RabbitMQPublisher::new(
            Arc::new(LapinConnector::new(cfg.endpoint())),
            &cfg.topology(),
            cfg.retry_policy(),
            cfg.publisher_confirms,
        )
    }

    /// Same as `Publisher::publish`, stopping with `PublishError::Cancelled`
    /// as soon as `cancel` fires.
    pub async fn publish_cancellable(
        &self,
        cancel: &CancellationToken,
        exchange: &str,
        routing_key: &str,
        body: &str,
    ) -> Result<(), PublishError> {
        if self.guard.is_disposed() {
            return Err(PublishError::Disposed);
        }

        let msg = OutboundMessage::build(&Context::current(), exchange, routing_key, body)?;
        let msg = &msg;

        let result = self
            .retry
            .run(cancel, move |attempt| self.attempt(attempt, msg))
            .await
            .map_err(|err| match err {
                PublishError::Permanent(AmqpError::Disposed) => PublishError::Disposed,
                other => other,
            });

        match &result {
            Ok(()) => debug!(
                exchange,
                routing_key,
                message_id = %msg.message_id,
                "message published"
            ),
            Err(err) => error!(
                error = err.to_string(),
                exchange,
                routing_key,
                message_id = %msg.message_id,
                "failure to publish message"
            ),
        }

        result
    }

    /// Releases the broker connection. Every later publish fails with
    /// `PublishError::Disposed`.
    pub async fn shutdown(&self) {
        self.guard.shutdown().await
    }

    /// State of the connection shared by every publish call.
    pub fn connection_state(&self) -> ConnectionState {
        self.guard.state()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    async fn attempt(&self, attempt: u32, msg: &OutboundMessage) -> Result<(), AmqpError> {
        let lease = self.guard.ensure_channel().await?;

        if let Err(err) = lease.channel().publish(msg).await {
            if err.is_retryable() {
                self.guard.invalidate(&lease);
            }
            return Err(err);
        }

        if attempt > 1 {
            debug!(attempt, message_id = %msg.message_id, "published after retrying");
        }
        Ok(())
    }
}

#[async_trait]
impl Publisher for RabbitMQPublisher {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &str,
    ) -> Result<(), PublishError> {
        self.publish_cancellable(&CancellationToken::new(), exchange, routing_key, body)
            .await
    }
}
