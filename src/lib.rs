pub mod client;
pub mod core;

pub use client::{
    builder, drive, Backoff, EventHandler, ReconnectPolicy, Reconnector, Session, SessionBuilder,
    SessionStats,
};
pub use crate::core::{
    config::{ConfigError, ConnectionOptions, Credentials, Endpoint, StreamConfig},
    errors::StreamError,
    kernel::{Transport, TungsteniteTransport},
    types::*,
};
