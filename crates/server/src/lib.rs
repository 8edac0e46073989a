//! simpledb-server — TCP server for SimpleDB.
//!
//! Provides the line-oriented client protocol, leader/follower log
//! shipping, and the CAS-Paxos peer transport.

/// Line-protocol command parsing.
pub mod command;
/// Per-connection protocol handler.
pub mod connection;
/// Replication: wire framing, log shipping, and the Paxos peer service.
pub mod replication;
/// TCP acceptor and shared server state.
pub mod server;
