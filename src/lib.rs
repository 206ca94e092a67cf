// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod otel;

#[cfg(test)]
mod testing;

pub mod channel;
pub mod config;
pub mod connection;
pub mod errors;
pub mod exchange;
pub mod health;
pub mod logging;
pub mod message;
pub mod publisher;
pub mod queue;
pub mod retry;
pub mod topology;
pub mod transport;
