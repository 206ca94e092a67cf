// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the RabbitMQ Publisher
//!
//! Two layers of errors live here. `AmqpError` describes what went wrong while
//! talking to the broker and carries a `FailureKind` that decides whether the
//! retry pipeline may try again. `PublishError` is what callers of the
//! publisher observe.

use lapin::protocol::{AMQPErrorKind, AMQPHardError};
use std::time::Duration;
use thiserror::Error;

/// Classification of a broker failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The broker could not be reached at all.
    Unreachable,
    /// The connection or channel was already closed.
    Closed,
    /// The broker interrupted the operation (forced close, negative confirm).
    Interrupted,
    /// The operation did not complete in time.
    Timeout,
    /// Low level socket failure.
    Io,
    /// The broker refused the request. Retrying will not help.
    Rejected,
}

impl FailureKind {
    /// Whether an operation failing with this kind may be attempted again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FailureKind::Rejected)
    }

    /// Classifies a `lapin` error.
    pub fn classify(err: &lapin::Error) -> FailureKind {
        match err {
            lapin::Error::IOError(_) => FailureKind::Io,
            lapin::Error::InvalidChannelState(_)
            | lapin::Error::InvalidConnectionState(_)
            | lapin::Error::InvalidChannel(_) => FailureKind::Closed,
            lapin::Error::MissingHeartbeatError => FailureKind::Timeout,
            lapin::Error::ProtocolError(amqp) => match amqp.kind() {
                AMQPErrorKind::Hard(AMQPHardError::CONNECTIONFORCED) => FailureKind::Interrupted,
                _ => FailureKind::Rejected,
            },
            _ => FailureKind::Rejected,
        }
    }
}

/// Represents errors that can occur while talking to the broker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect: {reason}")]
    ConnectionError { kind: FailureKind, reason: String },

    /// The connection attempt exceeded the configured timeout
    #[error("connection attempt timed out after {0:?}")]
    ConnectionTimeout(Duration),

    /// Error creating a channel from an established connection
    #[error("failure to create a channel: {reason}")]
    ChannelError { kind: FailureKind, reason: String },

    /// Error enabling publisher confirms on a fresh channel
    #[error("failure to enable publisher confirms: {reason}")]
    ConfirmSelectError { kind: FailureKind, reason: String },

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{name}`: {reason}")]
    DeclareExchangeError {
        name: String,
        kind: FailureKind,
        reason: String,
    },

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{name}`: {reason}")]
    DeclareQueueError {
        name: String,
        kind: FailureKind,
        reason: String,
    },

    /// Error binding a queue to an exchange
    #[error("failure to bind queue `{queue}` to exchange `{exchange}`: {reason}")]
    BindingExchangeToQueueError {
        exchange: String,
        queue: String,
        kind: FailureKind,
        reason: String,
    },

    /// Error publishing a message
    #[error("failure to publish: {reason}")]
    PublishingError { kind: FailureKind, reason: String },

    /// The broker answered the publisher confirm with a nack
    #[error("broker rejected the message `{0}` with a negative confirm")]
    PublishNacked(String),

    /// The connection guard has been shut down
    #[error("connection guard was disposed")]
    Disposed,
}

impl AmqpError {
    /// Returns the failure classification of this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            AmqpError::ConnectionError { kind, .. }
            | AmqpError::ChannelError { kind, .. }
            | AmqpError::ConfirmSelectError { kind, .. }
            | AmqpError::DeclareExchangeError { kind, .. }
            | AmqpError::DeclareQueueError { kind, .. }
            | AmqpError::BindingExchangeToQueueError { kind, .. }
            | AmqpError::PublishingError { kind, .. } => *kind,
            AmqpError::ConnectionTimeout(_) => FailureKind::Timeout,
            AmqpError::PublishNacked(_) => FailureKind::Interrupted,
            AmqpError::Disposed => FailureKind::Rejected,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Errors surfaced by the publisher to its callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The request was malformed. Nothing was sent and nothing was retried.
    #[error("invalid publish request: {0}")]
    Validation(String),

    /// Every allowed attempt failed with a retryable error.
    #[error("publish failed after {attempts} attempt(s): {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: AmqpError,
    },

    /// The broker failed in a way retrying cannot fix.
    #[error("publish failed: {0}")]
    Permanent(#[source] AmqpError),

    /// The publisher was shut down.
    #[error("publisher has been disposed")]
    Disposed,

    /// The caller cancelled the publish.
    #[error("publish cancelled")]
    Cancelled,
}

impl PublishError {
    /// True when the failure comes from broker infrastructure rather than the
    /// request itself, so callers may buffer and try again later.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            PublishError::Exhausted { .. } | PublishError::Permanent(_)
        )
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, PublishError::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::{ChannelState, ConnectionState};
    use std::{io, sync::Arc};

    #[test]
    fn classifies_lapin_errors() {
        let io_err = lapin::Error::IOError(Arc::new(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "reset",
        )));
        assert_eq!(FailureKind::classify(&io_err), FailureKind::Io);
        assert_eq!(
            FailureKind::classify(&lapin::Error::InvalidChannelState(ChannelState::Closed)),
            FailureKind::Closed
        );
        assert_eq!(
            FailureKind::classify(&lapin::Error::InvalidConnectionState(
                ConnectionState::Closed
            )),
            FailureKind::Closed
        );
        assert_eq!(
            FailureKind::classify(&lapin::Error::MissingHeartbeatError),
            FailureKind::Timeout
        );
        assert_eq!(
            FailureKind::classify(&lapin::Error::ChannelsLimitReached),
            FailureKind::Rejected
        );
    }

    #[test]
    fn only_rejected_is_permanent() {
        for kind in [
            FailureKind::Unreachable,
            FailureKind::Closed,
            FailureKind::Interrupted,
            FailureKind::Timeout,
            FailureKind::Io,
        ] {
            assert!(kind.is_retryable(), "{kind:?}");
        }
        assert!(!FailureKind::Rejected.is_retryable());
    }

    #[test]
    fn amqp_error_kinds() {
        assert!(AmqpError::ConnectionTimeout(Duration::from_secs(1)).is_retryable());
        assert!(AmqpError::PublishNacked("id".into()).is_retryable());
        assert!(!AmqpError::Disposed.is_retryable());
        let declare = AmqpError::DeclareExchangeError {
            name: "family-hub.events".into(),
            kind: FailureKind::Rejected,
            reason: "PRECONDITION_FAILED".into(),
        };
        assert!(!declare.is_retryable());
    }

    #[test]
    fn publish_error_categories() {
        let validation = PublishError::Validation("exchange must not be empty".into());
        assert!(validation.is_validation());
        assert!(!validation.is_infrastructure());

        let exhausted = PublishError::Exhausted {
            attempts: 3,
            source: AmqpError::ConnectionTimeout(Duration::from_secs(30)),
        };
        assert!(exhausted.is_infrastructure());
        assert!(PublishError::Permanent(AmqpError::Disposed).is_infrastructure());
        assert!(!PublishError::Disposed.is_infrastructure());
        assert!(!PublishError::Cancelled.is_infrastructure());
    }
}
