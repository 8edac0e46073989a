//! Replication over TCP.
//!
//! Two independent mechanisms share the binary message framing in
//! [`protocol`]:
//!
//! - **Log shipping** — a leader streams committed append-log records to
//!   connected followers, which apply them verbatim and serve reads.
//! - **CAS-Paxos transport** — per-round request/reply delivery to peer
//!   acceptors, with connect and I/O timeouts.

/// Follower side: connect to the leader and apply shipped records.
pub mod follower;
/// Leader side: replication listener streaming log records.
pub mod leader;
/// Paxos peer service and TCP transport.
pub mod paxos;
/// Binary-framed message codec shared by both mechanisms.
pub mod protocol;
