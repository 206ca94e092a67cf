// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Publishes a single event to the configured main exchange.
//!
//! Usage: `publish-event <routing-key> [json-body]`. Without a body a small
//! sample payload is sent.

use rabbitmq_publisher::{
    config::RabbitMqConfig,
    health::{BrokerHealth, BrokerHealthProbe},
    logging,
    publisher::{Publisher, RabbitMQPublisher},
};
use serde_json::json;
use std::process::ExitCode;
use tracing::{error, info};
use uuid::Uuid;

#[tokio::main]
async fn main() -> ExitCode {
    logging::init("info,rabbitmq_publisher=debug");

    let cfg = match RabbitMqConfig::load() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = err.to_string(), "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let mut args = std::env::args().skip(1);
    let routing_key = args.next().unwrap_or_else(|| "file.uploaded".to_owned());
    let body = args
        .next()
        .unwrap_or_else(|| json!({ "fileId": Uuid::new_v4().to_string() }).to_string());

    if let BrokerHealth::Unhealthy(reason) = BrokerHealthProbe::from_config(&cfg).check().await {
        info!(reason, "broker not reachable yet, publishing with retries");
    }

    let publisher = RabbitMQPublisher::from_config(&cfg);
    let result = publisher
        .publish(&cfg.main_exchange, &routing_key, &body)
        .await;
    publisher.shutdown().await;

    match result {
        Ok(()) => {
            info!(exchange = cfg.main_exchange, routing_key, "event published");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = err.to_string(), "event not published");
            ExitCode::FAILURE
        }
    }
}
