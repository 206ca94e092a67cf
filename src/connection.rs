// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection Guard
//!
//! Owns the single broker connection and channel shared by every publish call.
//!
//! Callers ask for a channel with `ensure_channel`. When the cached channel is
//! open it is handed out straight away. Otherwise the caller takes the
//! guard's single-permit semaphore, checks again (another caller may have just
//! reconnected), tears down whatever is stale, reconnects and declares the
//! topology once for the new connection.
//!
//! The semaphore is only held while (re)connecting or shutting down, never
//! while a message is being sent.

use crate::{
    errors::{AmqpError, FailureKind},
    topology::{AmqpTopology, Topology, TopologyDescriptor},
    transport::{AmqpChannel, AmqpConnection, Connector},
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Lifecycle of the shared connection, and of the channel on top of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Nothing was opened yet, or it was released by shutdown.
    Absent,
    Open,
    /// Opened once, then dropped or invalidated.
    Closed,
}

/// A channel handed out by the guard, tagged with the generation it belongs
/// to so a failure can only invalidate the channel it was observed on.
#[derive(Clone)]
pub struct ChannelLease {
    generation: u64,
    channel: Arc<dyn AmqpChannel>,
}

impl ChannelLease {
    pub fn channel(&self) -> &dyn AmqpChannel {
        self.channel.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Default)]
struct Link {
    connection: Option<Arc<dyn AmqpConnection>>,
    /// Topology flag of the current connection. The connection's drop hook
    /// resets it.
    topology_declared: Arc<AtomicBool>,
    channel: Option<Arc<dyn AmqpChannel>>,
    generation: u64,
    poisoned: bool,
}

impl Link {
    fn connection_state(&self) -> ConnectionState {
        match &self.connection {
            None => ConnectionState::Absent,
            Some(conn) if conn.is_open() && !self.poisoned => ConnectionState::Open,
            Some(_) => ConnectionState::Closed,
        }
    }

    fn channel_state(&self) -> ConnectionState {
        match &self.channel {
            None => ConnectionState::Absent,
            Some(channel)
                if channel.is_open() && self.connection_state() == ConnectionState::Open =>
            {
                ConnectionState::Open
            }
            Some(_) => ConnectionState::Closed,
        }
    }

    fn lease(&self) -> Option<ChannelLease> {
        if self.channel_state() != ConnectionState::Open {
            return None;
        }

        self.channel.as_ref().map(|channel| ChannelLease {
            generation: self.generation,
            channel: channel.clone(),
        })
    }
}

/// Shares one broker connection and channel between every publish call.
pub struct ConnectionGuard {
    shared: Arc<Shared>,
}

struct Shared {
    connector: Arc<dyn Connector>,
    topology: AmqpTopology,
    confirms: bool,
    link: Mutex<Link>,
    reconnect: Arc<Semaphore>,
    disposed: AtomicBool,
}

impl ConnectionGuard {
    /// Creates a guard. Nothing is opened until the first `ensure_channel`.
    ///
    /// # Parameters
    /// * `connector` - Opens connections to the broker
    /// * `topology` - Resources declared once per connection
    /// * `confirms` - Whether channels are switched to publisher-confirm mode
    ///
    /// # Returns
    /// A guard in the `Absent` state
    pub fn new(
        connector: Arc<dyn Connector>,
        topology: &TopologyDescriptor,
        confirms: bool,
    ) -> ConnectionGuard {
        ConnectionGuard {
            shared: Arc::new(Shared {
                connector,
                topology: topology.build(),
                confirms,
                link: Mutex::default(),
                reconnect: Arc::new(Semaphore::new(1)),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// State of the shared connection. An invalidated connection reports
    /// `Closed` until it is rebuilt.
    pub fn state(&self) -> ConnectionState {
        self.shared.lock_link().connection_state()
    }

    /// State of the shared channel; never `Open` on a connection that is not.
    pub fn channel_state(&self) -> ConnectionState {
        self.shared.lock_link().channel_state()
    }

    /// Whether the topology was declared on the current, open connection.
    pub fn topology_declared(&self) -> bool {
        let link = self.shared.lock_link();
        link.connection_state() == ConnectionState::Open
            && link.topology_declared.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Returns an open channel, reconnecting first when needed.
    ///
    /// The rebuild runs on its own task while holding the reconnect permit:
    /// a caller that stops waiting leaves it to finish, and the result is
    /// kept for the next caller.
    pub async fn ensure_channel(&self) -> Result<ChannelLease, AmqpError> {
        if self.is_disposed() {
            return Err(AmqpError::Disposed);
        }

        if let Some(lease) = self.shared.lock_link().lease() {
            return Ok(lease);
        }

        let permit = self
            .shared
            .reconnect
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AmqpError::Disposed)?;

        if self.is_disposed() {
            return Err(AmqpError::Disposed);
        }

        if let Some(lease) = self.shared.lock_link().lease() {
            debug!("channel was restored by a concurrent caller");
            return Ok(lease);
        }

        let shared = self.shared.clone();
        let rebuild = tokio::spawn(async move {
            let lease = shared.reconnect_locked().await;
            drop(permit);
            lease
        });

        rebuild.await.map_err(|err| {
            error!(error = err.to_string(), "amqp reconnect task failed");
            AmqpError::ConnectionError {
                kind: FailureKind::Interrupted,
                reason: err.to_string(),
            }
        })?
    }

    /// Marks the channel behind `lease` as unusable after a transient failure.
    /// A lease from an older generation is ignored.
    pub fn invalidate(&self, lease: &ChannelLease) {
        let mut link = self.shared.lock_link();
        if link.generation == lease.generation && link.channel.is_some() && !link.poisoned {
            debug!(generation = lease.generation, "invalidating amqp channel");
            link.poisoned = true;
        }
    }

    /// Releases the channel and connection. Idempotent; once called every
    /// `ensure_channel` fails with `AmqpError::Disposed`.
    pub async fn shutdown(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            debug!("connection guard already disposed");
            return;
        }

        // Waits for an in-flight reconnect to finish so nothing leaks.
        let permit = self.shared.reconnect.acquire().await;

        let (channel, connection) = {
            let mut link = self.shared.lock_link();
            (link.channel.take(), link.connection.take())
        };

        if let Some(channel) = channel {
            if let Err(err) = channel.close().await {
                warn!(error = err.to_string(), "failure to close amqp channel");
            }
        }
        if let Some(connection) = connection {
            if let Err(err) = connection.close().await {
                warn!(error = err.to_string(), "failure to close amqp connection");
            }
        }

        drop(permit);
        self.shared.reconnect.close();
        info!("amqp connection released");
    }
}

impl Shared {
    /// Rebuilds the channel, and the connection if it is gone. Must run
    /// while holding the reconnect permit.
    async fn reconnect_locked(&self) -> Result<ChannelLease, AmqpError> {
        let (stale_channel, stale_connection) = {
            let mut link = self.lock_link();
            let keep_connection = link.connection_state() == ConnectionState::Open;
            let poisoned = std::mem::take(&mut link.poisoned);
            let channel = link.channel.take();
            let connection = if keep_connection && !poisoned {
                None
            } else {
                link.connection.take()
            };
            (channel, connection)
        };

        if let Some(channel) = stale_channel {
            if let Err(err) = channel.close().await {
                debug!(error = err.to_string(), "failure to close stale channel");
            }
        }
        if let Some(connection) = stale_connection {
            if let Err(err) = connection.close().await {
                debug!(error = err.to_string(), "failure to close stale connection");
            }
        }

        let (connection, declared) = self.current_or_connect().await?;
        let channel = connection.open_channel(self.confirms).await?;

        if !declared.load(Ordering::Acquire) {
            if let Err(err) = self.topology.install(channel.as_ref()).await {
                if let Err(close_err) = channel.close().await {
                    debug!(error = close_err.to_string(), "failure to close channel");
                }
                return Err(err);
            }
            declared.store(true, Ordering::Release);
            info!("amqp topology declared");
        }

        let mut link = self.lock_link();
        link.generation += 1;
        link.channel = Some(channel.clone());
        debug!(generation = link.generation, "amqp channel ready");

        Ok(ChannelLease {
            generation: link.generation,
            channel,
        })
    }

    async fn current_or_connect(
        &self,
    ) -> Result<(Arc<dyn AmqpConnection>, Arc<AtomicBool>), AmqpError> {
        {
            let link = self.lock_link();
            if let Some(connection) = &link.connection {
                return Ok((connection.clone(), link.topology_declared.clone()));
            }
        }

        let connection = self.connector.connect().await?;
        let declared = Arc::new(AtomicBool::new(false));

        let flag = declared.clone();
        connection.on_dropped(Arc::new(move || {
            flag.store(false, Ordering::Release);
        }));

        let mut link = self.lock_link();
        link.connection = Some(connection.clone());
        link.topology_declared = declared.clone();
        info!("amqp connection established");

        Ok((connection, declared))
    }

    fn lock_link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
