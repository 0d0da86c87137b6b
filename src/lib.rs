//! # aqara_lan_rs
//!
//! A Rust library for the Xiaomi Aqara gateway LAN protocol.
//!
//! This crate talks to Aqara/Mi gateways over UDP on the local network:
//! it discovers gateways via multicast, mirrors their sub-devices in an
//! in-memory registry, issues authenticated write commands, and hands
//! asynchronous state reports to application callbacks.
//!
//! ## Quick Start
//!
//! ```no_run
//! use aqara_lan_rs::{AqaraService, GatewayCredentials, ServiceConfig};
//! use serde_json::json;
//!
//! fn main() -> Result<(), aqara_lan_rs::Error> {
//!     let service = AqaraService::new(
//!         vec![GatewayCredentials::new("7811dcb28d61", "o9el4bdmb1pu0r8q")],
//!         ServiceConfig::default(),
//!     )?;
//!
//!     service.engine().on_message(|msg| println!("saw {}", msg.cmd));
//!     service.engine().on_ready(|_| println!("all devices synchronized"));
//!     service.start()?;
//!
//!     // ... later, from any thread:
//!     service.engine().write_gateway("7811dcb28d61", json!({"rgb": 0x64ffffffu32}))?;
//!     Ok(())
//! }
//! ```
//!
//! ## Protocol
//!
//! The gateway firmware enables LAN access via the Mi Home app, which also
//! reveals the per-gateway password. On start the service multicasts a
//! `whois` to `224.0.0.50:4321`; each gateway answers with an `iam`, the
//! engine requests its device id list and reads every device once, then
//! fires the ready observers. Reports, heartbeats and command acks keep the
//! registries current from then on. Writes carry a `key` derived from the
//! gateway's rotating token and the static password (see [`write_key`]).
//!
//! Transport is best-effort UDP: no delivery, ordering or retry guarantees
//! anywhere. Registry contents are a cache of live traffic and are rebuilt
//! from scratch on every start.

mod cipher;
mod config;
mod device;
mod device_map;
mod engine;
mod errors;
mod gateway;
mod message;
mod service;
mod transport;

// Re-export public API
pub use cipher::write_key;
pub use config::{
    DEFAULT_IV, GatewayCredentials, MULTICAST_ADDRESS, MULTICAST_PORT, SERVER_PORT, ServiceConfig,
};
pub use device::{Device, DeviceRegistry, DeviceUpdate};
pub use device_map::DeviceMap;
pub use engine::{MessageCallback, ProtocolEngine, ReadyCallback};
pub use errors::Error;
pub use gateway::{Gateway, GatewayRegistry, GatewayUpdate};
pub use message::{Command, GATEWAY_MODEL, Message};
pub use service::AqaraService;
pub use transport::{Transport, UdpTransport};
