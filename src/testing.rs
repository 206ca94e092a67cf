// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! In-memory broker implementing the transport traits, with scripted failures
//! and counters for every interaction.

use crate::{
    errors::{AmqpError, FailureKind},
    exchange::{ExchangeDefinition, ExchangeKind},
    message::OutboundMessage,
    queue::{QueueBinding, QueueDefinition},
    transport::{AmqpChannel, AmqpConnection, Connector, DropHook},
};
use async_trait::async_trait;
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Resource {
    Exchange(String, ExchangeKind),
    Queue(String),
    Binding(String, String, String),
}

#[derive(Clone, Default)]
pub(crate) struct FakeBroker {
    state: Arc<BrokerState>,
}

#[derive(Default)]
struct BrokerState {
    connect_attempts: AtomicU32,
    channels_opened: AtomicU32,
    publish_attempts: AtomicU32,
    connection_closes: AtomicU32,
    channel_closes: AtomicU32,
    connect_delay: Mutex<Duration>,
    declare_delay: Mutex<Duration>,
    publish_delay: Mutex<Duration>,
    connect_failures: Mutex<VecDeque<AmqpError>>,
    always_fail_connect: Mutex<Option<AmqpError>>,
    publish_failures: Mutex<VecDeque<AmqpError>>,
    declaration_failure: Mutex<Option<AmqpError>>,
    declarations: Mutex<Vec<Resource>>,
    resources: Mutex<Vec<Resource>>,
    published: Mutex<Vec<OutboundMessage>>,
    connections: Mutex<Vec<Arc<FakeConnection>>>,
}

pub(crate) fn unreachable() -> AmqpError {
    AmqpError::ConnectionError {
        kind: FailureKind::Unreachable,
        reason: "connection refused".to_owned(),
    }
}

pub(crate) fn channel_closed() -> AmqpError {
    AmqpError::PublishingError {
        kind: FailureKind::Closed,
        reason: "invalid channel state: Closed".to_owned(),
    }
}

impl FakeBroker {
    pub(crate) fn new() -> FakeBroker {
        FakeBroker::default()
    }

    pub(crate) fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }

    pub(crate) fn with_connect_delay(self, delay: Duration) -> FakeBroker {
        *self.state.connect_delay.lock().unwrap() = delay;
        self
    }

    pub(crate) fn with_declare_delay(self, delay: Duration) -> FakeBroker {
        *self.state.declare_delay.lock().unwrap() = delay;
        self
    }

    pub(crate) fn with_publish_delay(self, delay: Duration) -> FakeBroker {
        *self.state.publish_delay.lock().unwrap() = delay;
        self
    }

    pub(crate) fn fail_next_connects(&self, times: usize, err: AmqpError) {
        let mut failures = self.state.connect_failures.lock().unwrap();
        failures.extend(std::iter::repeat(err).take(times));
    }

    pub(crate) fn fail_connects_always(&self, err: AmqpError) {
        *self.state.always_fail_connect.lock().unwrap() = Some(err);
    }

    pub(crate) fn fail_next_publishes(&self, times: usize, err: AmqpError) {
        let mut failures = self.state.publish_failures.lock().unwrap();
        failures.extend(std::iter::repeat(err).take(times));
    }

    pub(crate) fn fail_declarations(&self, err: AmqpError) {
        *self.state.declaration_failure.lock().unwrap() = Some(err);
    }

    /// Drops every open connection as a broker restart would.
    pub(crate) fn drop_connections(&self) {
        let connections = self.state.connections.lock().unwrap().clone();
        for connection in connections {
            connection.drop_unexpectedly();
        }
    }

    /// Closes every channel while leaving connections open.
    pub(crate) fn close_channels(&self) {
        let connections = self.state.connections.lock().unwrap().clone();
        for connection in connections {
            for channel in connection.channels.lock().unwrap().iter() {
                channel.open.store(false, Ordering::SeqCst);
            }
        }
    }

    pub(crate) fn connect_attempts(&self) -> u32 {
        self.state.connect_attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn connections_opened(&self) -> usize {
        self.state.connections.lock().unwrap().len()
    }

    pub(crate) fn open_connections(&self) -> usize {
        self.state
            .connections
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.is_open())
            .count()
    }

    pub(crate) fn channels_opened(&self) -> u32 {
        self.state.channels_opened.load(Ordering::SeqCst)
    }

    pub(crate) fn publish_attempts(&self) -> u32 {
        self.state.publish_attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn connection_closes(&self) -> u32 {
        self.state.connection_closes.load(Ordering::SeqCst)
    }

    pub(crate) fn channel_closes(&self) -> u32 {
        self.state.channel_closes.load(Ordering::SeqCst)
    }

    pub(crate) fn declarations(&self) -> Vec<Resource> {
        self.state.declarations.lock().unwrap().clone()
    }

    pub(crate) fn resources(&self) -> Vec<Resource> {
        self.state.resources.lock().unwrap().clone()
    }

    pub(crate) fn published(&self) -> Vec<OutboundMessage> {
        self.state.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for FakeBroker {
    async fn connect(&self) -> Result<Arc<dyn AmqpConnection>, AmqpError> {
        self.state.connect_attempts.fetch_add(1, Ordering::SeqCst);

        pause(&self.state.connect_delay).await;

        if let Some(err) = self.state.always_fail_connect.lock().unwrap().clone() {
            return Err(err);
        }
        if let Some(err) = self.state.connect_failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        let connection = Arc::new(FakeConnection {
            open: Arc::new(AtomicBool::new(true)),
            hooks: Mutex::default(),
            channels: Mutex::default(),
            broker: self.state.clone(),
        });
        self.state.connections.lock().unwrap().push(connection.clone());

        Ok(connection)
    }
}

struct FakeConnection {
    open: Arc<AtomicBool>,
    hooks: Mutex<Vec<DropHook>>,
    channels: Mutex<Vec<Arc<FakeChannel>>>,
    broker: Arc<BrokerState>,
}

impl FakeConnection {
    fn drop_unexpectedly(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let hooks = self.hooks.lock().unwrap().clone();
            for hook in hooks {
                hook();
            }
        }
    }
}

#[async_trait]
impl AmqpConnection for FakeConnection {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn open_channel(&self, _confirms: bool) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        if !self.is_open() {
            return Err(AmqpError::ChannelError {
                kind: FailureKind::Closed,
                reason: "connection closed".to_owned(),
            });
        }
        self.broker.channels_opened.fetch_add(1, Ordering::SeqCst);

        let channel = Arc::new(FakeChannel {
            open: AtomicBool::new(true),
            connection_open: self.open.clone(),
            broker: self.broker.clone(),
        });
        self.channels.lock().unwrap().push(channel.clone());

        Ok(channel)
    }

    fn on_dropped(&self, hook: DropHook) {
        self.hooks.lock().unwrap().push(hook);
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.broker.connection_closes.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeChannel {
    open: AtomicBool,
    connection_open: Arc<AtomicBool>,
    broker: Arc<BrokerState>,
}

async fn pause(delay: &Mutex<Duration>) {
    let delay = *delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

impl FakeChannel {
    async fn declare(&self, resource: Resource) -> Result<(), AmqpError> {
        pause(&self.broker.declare_delay).await;
        if !self.is_open() {
            return Err(AmqpError::ChannelError {
                kind: FailureKind::Closed,
                reason: "channel closed".to_owned(),
            });
        }
        if let Some(err) = self.broker.declaration_failure.lock().unwrap().clone() {
            return Err(err);
        }

        self.broker.declarations.lock().unwrap().push(resource.clone());
        let mut resources = self.broker.resources.lock().unwrap();
        if !resources.contains(&resource) {
            resources.push(resource);
        }
        Ok(())
    }
}

#[async_trait]
impl AmqpChannel for FakeChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.connection_open.load(Ordering::SeqCst)
    }

    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        self.declare(Resource::Exchange(def.name.clone(), def.kind))
            .await
    }

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError> {
        self.declare(Resource::Queue(def.name.clone())).await
    }

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        self.declare(Resource::Binding(
            binding.queue_name.clone(),
            binding.exchange_name.clone(),
            binding.routing_key.clone(),
        ))
        .await
    }

    async fn publish(&self, msg: &OutboundMessage) -> Result<(), AmqpError> {
        self.broker.publish_attempts.fetch_add(1, Ordering::SeqCst);
        pause(&self.broker.publish_delay).await;
        if !self.is_open() {
            return Err(channel_closed());
        }
        if let Some(err) = self.broker.publish_failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        self.broker.published.lock().unwrap().push(msg.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.broker.channel_closes.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}
