//! rcctl: topology administration for a hash-slot sharded key-value cluster.
//!
//! The library holds the engines behind the `rcctl` binary:
//!
//! - [`create`]: bootstrap a cluster from empty nodes
//! - [`add_node`]: introduce a node into a running cluster
//! - [`reshard`]: move slots between masters with the importing/migrating
//!   protocol
//! - [`del_node`]: remove a node from every membership table
//! - [`check`]: verify coverage, link health and cross-node agreement
//! - [`populate`]: seed test data
//!
//! Every engine talks to the cluster through [`client::Connector`], so it can
//! run against a real cluster ([`client::RedisConnector`]) or an in-memory
//! one in tests.

pub mod add_node;
pub mod check;
pub mod client;
pub mod config;
pub mod create;
pub mod del_node;
pub mod error;
pub mod outcome;
pub mod populate;
pub mod reshard;
pub mod slots;
pub mod topology;

pub use config::Config;
pub use error::{RcctlError, Result};
