//! emberdb server -- the command execution and data core: keyspace,
//! command registry, dispatcher, append-only durability, and the TCP/
//! embedded front doors onto it.
//!
//! Cluster replication, access control, and process lifecycle (config file
//! loading, TLS provisioning, module loading) are external collaborators
//! this crate defines seams for ([`cluster::Cluster`], [`cluster::Authorizer`])
//! but does not implement.

pub mod aof;
pub mod cluster;
pub mod command;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod embedded;
pub mod keyspace;
pub mod net;

pub use cluster::{Authorizer, Cluster};
pub use config::ServerConfig;
pub use connection::{ConnectionId, ConnectionRegistry};
pub use dispatcher::Dispatcher;
pub use embedded::Embedded;
pub use keyspace::Keyspace;

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {}
}
