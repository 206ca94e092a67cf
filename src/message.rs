// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Outbound message built once per publish call.

use crate::{errors::PublishError, otel::RabbitMQTracePropagator};
use lapin::types::{AMQPValue, ShortString};
use opentelemetry::{global, Context};
use std::{
    collections::BTreeMap,
    time::{SystemTime, UNIX_EPOCH},
};
use uuid::Uuid;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A message ready to be sent. Every retry of one publish call sends this same
/// value, so the message id stays stable across attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub content_type: &'static str,
    pub message_id: Uuid,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    pub persistent: bool,
    pub headers: BTreeMap<ShortString, AMQPValue>,
}

impl OutboundMessage {
    /// Validates the request and stamps a fresh message.
    ///
    /// The trace context carried by `ctx` is injected into the headers.
    pub fn build(
        ctx: &Context,
        exchange: &str,
        routing_key: &str,
        body: &str,
    ) -> Result<OutboundMessage, PublishError> {
        if exchange.is_empty() {
            return Err(PublishError::Validation("exchange must not be empty".to_owned()));
        }
        if routing_key.is_empty() {
            return Err(PublishError::Validation(
                "routing key must not be empty".to_owned(),
            ));
        }
        if body.is_empty() {
            return Err(PublishError::Validation("body must not be empty".to_owned()));
        }

        let mut headers = BTreeMap::<ShortString, AMQPValue>::default();
        global::get_text_map_propagator(|propagator| {
            propagator.inject_context(ctx, &mut RabbitMQTracePropagator::new(&mut headers))
        });

        Ok(OutboundMessage {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            body: body.as_bytes().to_vec(),
            content_type: JSON_CONTENT_TYPE,
            message_id: Uuid::new_v4(),
            timestamp: unix_now(),
            persistent: true,
            headers,
        })
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}
