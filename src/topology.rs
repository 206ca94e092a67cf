// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Topology Management
//!
//! The publisher needs a small, fixed topology before its first message:
//!
//! - a durable **fanout** dead-letter exchange,
//! - a durable dead-letter queue bound to it with an empty routing key,
//! - a durable **topic** main exchange.
//!
//! `TopologyDescriptor` names those resources and `AmqpTopology` installs any
//! set of exchanges, queues and bindings on an open channel. Declarations are
//! idempotent on the broker side; the connection guard additionally makes sure
//! they run once per connection.

use crate::{
    errors::AmqpError,
    exchange::{ExchangeDefinition, ExchangeKind},
    queue::{QueueBinding, QueueDefinition},
    transport::AmqpChannel,
};
use async_trait::async_trait;
use tracing::debug;

/// Names of the resources the publisher depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyDescriptor {
    pub main_exchange: String,
    pub dead_letter_exchange: String,
    pub dead_letter_queue: String,
}

impl TopologyDescriptor {
    /// Builds the installable topology. Dead-letter resources come first so
    /// the dead-letter path is ready before anything can reach the main
    /// exchange.
    pub fn build(&self) -> AmqpTopology {
        AmqpTopology::new()
            .exchange(
                ExchangeDefinition::new(&self.dead_letter_exchange, ExchangeKind::Fanout)
                    .durable(),
            )
            .exchange(
                ExchangeDefinition::new(&self.main_exchange, ExchangeKind::Topic).durable(),
            )
            .queue(QueueDefinition::new(&self.dead_letter_queue).durable())
            .queue_binding(
                QueueBinding::new(&self.dead_letter_queue)
                    .exchange(&self.dead_letter_exchange)
                    .routing_key(""),
            )
    }
}

/// Trait defining the interface for topology management.
#[async_trait]
pub trait Topology {
    /// Adds an exchange definition to the topology.
    fn exchange(self, def: ExchangeDefinition) -> Self;

    /// Adds a queue definition to the topology.
    fn queue(self, def: QueueDefinition) -> Self;

    /// Adds a queue-to-exchange binding to the topology.
    fn queue_binding(self, binding: QueueBinding) -> Self;

    /// Installs the topology on the broker through `channel`.
    async fn install(&self, channel: &dyn AmqpChannel) -> Result<(), AmqpError>;
}

/// Ordered collection of exchanges, queues and bindings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AmqpTopology {
    pub(crate) exchanges: Vec<ExchangeDefinition>,
    pub(crate) queues: Vec<QueueDefinition>,
    pub(crate) queues_binding: Vec<QueueBinding>,
}

impl AmqpTopology {
    pub fn new() -> AmqpTopology {
        AmqpTopology::default()
    }
}

#[async_trait]
impl Topology for AmqpTopology {
    fn exchange(mut self, def: ExchangeDefinition) -> Self {
        self.exchanges.push(def);
        self
    }

    fn queue(mut self, def: QueueDefinition) -> Self {
        self.queues.push(def);
        self
    }

    fn queue_binding(mut self, binding: QueueBinding) -> Self {
        self.queues_binding.push(binding);
        self
    }

    /// Installs the topology.
    ///
    /// Exchanges are declared first, then queues, then bindings, each in
    /// insertion order. The first failure aborts the installation.
    async fn install(&self, channel: &dyn AmqpChannel) -> Result<(), AmqpError> {
        self.install_exchange(channel).await?;
        self.install_queue(channel).await?;
        self.binding_queues(channel).await
    }
}

impl AmqpTopology {
    async fn install_exchange(&self, channel: &dyn AmqpChannel) -> Result<(), AmqpError> {
        for exch in &self.exchanges {
            debug!("creating exchange: {}", exch.name);
            channel.declare_exchange(exch).await?;
            debug!("exchange: {} was created", exch.name);
        }

        Ok(())
    }

    async fn install_queue(&self, channel: &dyn AmqpChannel) -> Result<(), AmqpError> {
        for def in &self.queues {
            debug!("creating queue: {}", def.name);
            channel.declare_queue(def).await?;
            debug!("queue: {} was created", def.name);
        }

        Ok(())
    }

    async fn binding_queues(&self, channel: &dyn AmqpChannel) -> Result<(), AmqpError> {
        for binding in &self.queues_binding {
            debug!(
                "binding queue: {} to the exchange: {} with the key: {}",
                binding.queue_name, binding.exchange_name, binding.routing_key
            );
            channel.bind_queue(binding).await?;
        }

        debug!("queues were bound");

        Ok(())
    }
}
