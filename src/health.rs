// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Health Probe
//!
//! Verifies broker reachability with its own short-lived connection so a
//! failing probe never disturbs the publisher's cached connection.

use crate::{
    channel::LapinConnector,
    config::{BrokerEndpoint, RabbitMqConfig},
    transport::Connector,
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

/// Upper bound on the probe's connection timeout.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of a broker health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerHealth {
    Healthy,
    Unhealthy(String),
}

pub struct BrokerHealthProbe {
    connector: Arc<dyn Connector>,
}

impl BrokerHealthProbe {
    /// Creates a probe opening its connections through `connector`.
    ///
    /// # Parameters
    /// * `connector` - Connector used only by the probe
    ///
    /// # Returns
    /// A new health probe
    pub fn new(connector: Arc<dyn Connector>) -> BrokerHealthProbe {
        BrokerHealthProbe { connector }
    }

    /// Probe against the configured endpoint, never waiting longer than
    /// `PROBE_TIMEOUT` for the connection.
    pub fn from_config(cfg: &RabbitMqConfig) -> BrokerHealthProbe {
        BrokerHealthProbe::new(Arc::new(LapinConnector::new(probe_endpoint(cfg))))
    }

    /// Opens a connection, closes it again and reports the outcome.
    ///
    /// # Returns
    /// `BrokerHealth::Healthy` when the connection opened, otherwise
    /// `BrokerHealth::Unhealthy` with the failure reason
    pub async fn check(&self) -> BrokerHealth {
        match self.connector.connect().await {
            Ok(connection) => {
                if let Err(err) = connection.close().await {
                    debug!(error = err.to_string(), "failure to close probe connection");
                }
                BrokerHealth::Healthy
            }
            Err(err) => {
                warn!(error = err.to_string(), "broker health probe failed");
                BrokerHealth::Unhealthy(err.to_string())
            }
        }
    }
}

fn probe_endpoint(cfg: &RabbitMqConfig) -> BrokerEndpoint {
    let mut endpoint = cfg.endpoint();
    endpoint.connection_timeout = endpoint.connection_timeout.min(PROBE_TIMEOUT);
    endpoint
}
