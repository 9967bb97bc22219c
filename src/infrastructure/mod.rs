//! Infrastructure layer module
//!
//! This module contains all infrastructure adapters and external integrations:
//! - Configuration loading and validation
//! - Logging infrastructure
//! - HTTP health probing
//! - Local certificate authority and OS trust store
//! - Reverse proxy and TLS termination
//! - Hosts file management
//! - Control socket server and client
//!
//! Infrastructure implementations satisfy the port traits defined in the domain layer.

pub mod certs;
pub mod config;
pub mod control;
pub mod health;
pub mod hosts;
pub mod logging;
pub mod proxy;
