//! productsync - event propagation between a product catalog and its
//! engagement replica.
//!
//! The catalog service owns products; the engagement service keeps a local
//! projection of them and records likes. Each side publishes change events to
//! the other's queue and applies the events it receives, so the two stores
//! converge without sharing a database.

pub mod bus;
pub mod config;
pub mod consumer;
pub mod envelope;
pub mod http;
pub mod projection;
pub mod publisher;
pub mod storage;
pub mod telemetry;
pub mod utils;
