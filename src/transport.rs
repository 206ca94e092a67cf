// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Transport Abstraction
//!
//! The connection guard, the topology installer and the health probe only talk
//! to the broker through these traits. `channel::LapinConnector` is the
//! production implementation.

use crate::{
    errors::AmqpError,
    exchange::ExchangeDefinition,
    message::OutboundMessage,
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use std::sync::Arc;

/// Callback invoked when a connection drops unexpectedly.
pub type DropHook = Arc<dyn Fn() + Send + Sync>;

/// Opens connections to the broker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a new connection, honoring the endpoint's connection timeout.
    async fn connect(&self) -> Result<Arc<dyn AmqpConnection>, AmqpError>;
}

/// An open (or once open) broker connection.
#[async_trait]
pub trait AmqpConnection: Send + Sync {
    fn is_open(&self) -> bool;

    /// Opens a channel, switching it to confirm mode when `confirms` is set.
    async fn open_channel(&self, confirms: bool) -> Result<Arc<dyn AmqpChannel>, AmqpError>;

    /// Registers a hook fired when the connection drops without being closed
    /// by us.
    fn on_dropped(&self, hook: DropHook);

    async fn close(&self) -> Result<(), AmqpError>;
}

/// A channel on an `AmqpConnection`.
#[async_trait]
pub trait AmqpChannel: Send + Sync {
    fn is_open(&self) -> bool;

    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError>;

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError>;

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), AmqpError>;

    /// Sends the message. Resolves once the broker confirmed it when the
    /// channel is in confirm mode.
    async fn publish(&self, msg: &OutboundMessage) -> Result<(), AmqpError>;

    async fn close(&self) -> Result<(), AmqpError>;
}
