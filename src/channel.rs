// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection and Channel Management
//!
//! `lapin` implementation of the transport traits. Connections are opened with
//! the configured endpoint and timeout, channels optionally run in confirm
//! mode, and every `lapin` failure is classified before it leaves this module.

use crate::{
    config::BrokerEndpoint,
    errors::{AmqpError, FailureKind},
    exchange::ExchangeDefinition,
    message::OutboundMessage,
    queue::{QueueBinding, QueueDefinition},
    transport::{AmqpChannel, AmqpConnection, Connector, DropHook},
};
use async_trait::async_trait;
use lapin::{
    options::{
        BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::{FieldTable, LongString, ShortString},
    uri::{AMQPAuthority, AMQPUri, AMQPUserInfo},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use std::sync::Arc;
use tracing::{debug, error, warn};

const REPLY_SUCCESS: u16 = 200;
const PERSISTENT_DELIVERY_MODE: u8 = 2;
const TRANSIENT_DELIVERY_MODE: u8 = 1;

/// Opens `lapin` connections to a single broker endpoint.
#[derive(Debug, Clone)]
pub struct LapinConnector {
    endpoint: BrokerEndpoint,
}

impl LapinConnector {
    pub fn new(endpoint: BrokerEndpoint) -> LapinConnector {
        LapinConnector { endpoint }
    }

    /// Builds the AMQP URI from the endpoint. Going through `AMQPUri` keeps
    /// credentials and vhosts such as `/` from needing percent-encoding.
    pub(crate) fn uri(&self) -> AMQPUri {
        AMQPUri {
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.endpoint.username.clone(),
                    password: self.endpoint.password.clone(),
                },
                host: self.endpoint.host.clone(),
                port: self.endpoint.port,
            },
            vhost: self.endpoint.vhost.clone(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Connector for LapinConnector {
    async fn connect(&self) -> Result<Arc<dyn AmqpConnection>, AmqpError> {
        debug!(
            host = self.endpoint.host,
            port = self.endpoint.port,
            vhost = self.endpoint.vhost,
            "creating amqp connection..."
        );
        let options = ConnectionProperties::default()
            .with_connection_name(LongString::from(self.endpoint.client_name.clone()));

        let timeout = self.endpoint.connection_timeout;
        let conn = match tokio::time::timeout(timeout, Connection::connect_uri(self.uri(), options))
            .await
        {
            Err(_) => {
                error!(timeout_ms = timeout.as_millis() as u64, "amqp connection timed out");
                Err(AmqpError::ConnectionTimeout(timeout))
            }
            Ok(Err(err)) => {
                error!(error = err.to_string(), "failure to connect");
                Err(AmqpError::ConnectionError {
                    kind: connect_failure_kind(&err),
                    reason: err.to_string(),
                })
            }
            Ok(Ok(c)) => Ok(c),
        }?;
        debug!("amqp connected");

        Ok(Arc::new(LapinConnection { conn }))
    }
}

/// A socket error while connecting means the broker could not be reached.
fn connect_failure_kind(err: &lapin::Error) -> FailureKind {
    match err {
        lapin::Error::IOError(_) => FailureKind::Unreachable,
        other => FailureKind::classify(other),
    }
}

struct LapinConnection {
    conn: Connection,
}

#[async_trait]
impl AmqpConnection for LapinConnection {
    fn is_open(&self) -> bool {
        self.conn.status().connected()
    }

    async fn open_channel(&self, confirms: bool) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        debug!("creating amqp channel...");
        let channel = match self.conn.create_channel().await {
            Ok(c) => Ok(c),
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError {
                    kind: FailureKind::classify(&err),
                    reason: err.to_string(),
                })
            }
        }?;

        if confirms {
            if let Err(err) = channel.confirm_select(ConfirmSelectOptions::default()).await {
                error!(error = err.to_string(), "error to enable publisher confirms");
                return Err(AmqpError::ConfirmSelectError {
                    kind: FailureKind::classify(&err),
                    reason: err.to_string(),
                });
            }
        }
        debug!(confirms, "channel created");

        Ok(Arc::new(LapinChannel { channel, confirms }))
    }

    fn on_dropped(&self, hook: DropHook) {
        self.conn.on_error(move |err| {
            warn!(error = err.to_string(), "amqp connection dropped");
            hook();
        });
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.conn
            .close(REPLY_SUCCESS, "publisher shutdown")
            .await
            .map_err(|err| AmqpError::ConnectionError {
                kind: FailureKind::classify(&err),
                reason: err.to_string(),
            })
    }
}

struct LapinChannel {
    channel: Channel,
    confirms: bool,
}

#[async_trait]
impl AmqpChannel for LapinChannel {
    fn is_open(&self) -> bool {
        self.channel.status().connected()
    }

    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        match self
            .channel
            .exchange_declare(
                &def.name,
                def.kind.into(),
                ExchangeDeclareOptions {
                    passive: false,
                    durable: def.durable,
                    auto_delete: false,
                    internal: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = def.name,
                    "error to declare the exchange"
                );
                Err(AmqpError::DeclareExchangeError {
                    name: def.name.clone(),
                    kind: FailureKind::classify(&err),
                    reason: err.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError> {
        match self
            .channel
            .queue_declare(
                &def.name,
                QueueDeclareOptions {
                    passive: false,
                    durable: def.durable,
                    exclusive: false,
                    auto_delete: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), name = def.name, "error to declare the queue");
                Err(AmqpError::DeclareQueueError {
                    name: def.name.clone(),
                    kind: FailureKind::classify(&err),
                    reason: err.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        match self
            .channel
            .queue_bind(
                &binding.queue_name,
                &binding.exchange_name,
                &binding.routing_key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to bind queue to exchange");
                Err(AmqpError::BindingExchangeToQueueError {
                    exchange: binding.exchange_name.clone(),
                    queue: binding.queue_name.clone(),
                    kind: FailureKind::classify(&err),
                    reason: err.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    async fn publish(&self, msg: &OutboundMessage) -> Result<(), AmqpError> {
        let delivery_mode = if msg.persistent {
            PERSISTENT_DELIVERY_MODE
        } else {
            TRANSIENT_DELIVERY_MODE
        };

        let confirm = match self
            .channel
            .basic_publish(
                &msg.exchange,
                &msg.routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                &msg.body,
                BasicProperties::default()
                    .with_content_type(ShortString::from(msg.content_type))
                    .with_message_id(ShortString::from(msg.message_id.to_string()))
                    .with_timestamp(msg.timestamp)
                    .with_delivery_mode(delivery_mode)
                    .with_headers(FieldTable::from(msg.headers.clone())),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                Err(AmqpError::PublishingError {
                    kind: FailureKind::classify(&err),
                    reason: err.to_string(),
                })
            }
            Ok(confirm) => Ok(confirm),
        }?;

        if !self.confirms {
            return Ok(());
        }

        match confirm.await {
            Ok(confirmation) if confirmation.is_nack() => {
                warn!(message_id = %msg.message_id, "broker nacked the message");
                Err(AmqpError::PublishNacked(msg.message_id.to_string()))
            }
            Ok(_) => Ok(()),
            Err(err) => {
                error!(error = err.to_string(), "error waiting for publisher confirm");
                Err(AmqpError::PublishingError {
                    kind: FailureKind::classify(&err),
                    reason: err.to_string(),
                })
            }
        }
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.channel
            .close(REPLY_SUCCESS, "publisher shutdown")
            .await
            .map_err(|err| AmqpError::ChannelError {
                kind: FailureKind::classify(&err),
                reason: err.to_string(),
            })
    }
}
