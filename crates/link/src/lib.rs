//! Remote execution gateway for Ephys Link.
//!
//! This crate provides a trait-based gateway interface with an Ephys Link
//! (Socket.IO) client implementation.

#![warn(missing_docs)]

pub mod client;
pub mod config;
pub mod engineio;
pub mod gateway;

pub use client::EphysLinkClient;
pub use config::{LinkConfig, DEFAULT_HOST, DEFAULT_PORT};
pub use engineio::ProtocolError;
pub use gateway::{Gateway, GatewayError, JackhammerResponse, Result};
