//! Configuration for tally metric registries.
//!
//! A [`Config`] describes the identity of a registry, its reservoir settings, the listeners
//! events are delivered to and the logging setup. It is usually loaded from a YAML or JSON file:
//!
//! ```yaml
//! registry:
//!   namespace: shop
//!   application: checkout
//!   app_type: prod
//!   host: web1
//! reservoir:
//!   capacity: 100
//!   percentiles: [90, 99]
//! listeners:
//!   - type: kairos
//!     url: http://localhost:8080
//!     indexed: true
//! logging:
//!   level: info
//! ```
//!
//! [`Config::build_registry`] then creates the registry with all listeners attached.

#![warn(missing_docs)]

mod config;

pub use self::config::*;
