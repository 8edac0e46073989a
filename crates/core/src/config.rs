//! Global configuration constants.
//!
//! Defaults, limits, and tuning parameters live here as compile-time
//! constants; runtime overrides come from the server's CLI arguments.

/// Default TCP port for the client line protocol.
pub const DEFAULT_PORT: u16 = 7777;

/// Default port for the leader's log-shipping replication listener.
pub const DEFAULT_REPL_PORT: u16 = 7778;

/// Default port for the CAS-Paxos peer service.
pub const DEFAULT_PAXOS_PORT: u16 = 7779;

/// Default append-log file path.
pub const DEFAULT_LOG_PATH: &str = "simpledb.log";

/// Default vector dimension for a fresh store.
pub const DEFAULT_DIMENSION: usize = 128;

/// Maximum allowed vector dimension.
pub const MAX_DIMENSION: usize = 4096;

/// Maximum key length accepted in a log frame, in bytes.
pub const MAX_KEY_LEN: usize = 4096;

/// Maximum payload length accepted in a log frame, in bytes (16 MB).
///
/// A frame announcing more than this is treated as corrupt rather than
/// allocated, so a damaged length field cannot trigger a huge allocation.
pub const MAX_DATA_LEN: usize = 16 * 1024 * 1024;

/// Default number of bidirectional links per HNSW node on upper layers.
///
/// Layer 0 uses `2 * M`. Higher values improve recall but increase memory
/// and build time.
pub const HNSW_DEFAULT_M: usize = 16;

/// Default candidate list size during HNSW index construction.
pub const HNSW_DEFAULT_EF_CONSTRUCTION: usize = 200;

/// Default candidate list size during HNSW search.
///
/// Searches always use at least `k` regardless of this value.
pub const HNSW_DEFAULT_EF_SEARCH: usize = 50;

/// Maximum number of layers in the HNSW graph.
pub const HNSW_MAX_LAYERS: usize = 16;

/// Level generation factor `mL = 1 / ln 2`.
///
/// New nodes draw `floor(-ln(r) * mL)` for uniform `r` in (0, 1], giving a
/// geometric layer distribution.
pub const HNSW_LEVEL_FACTOR: f64 = 1.442_695_040_888_963_4;

/// Connect timeout for a single Paxos peer, in milliseconds.
pub const PAXOS_CONNECT_TIMEOUT_MS: u64 = 1000;

/// Read/write timeout on an established Paxos peer connection, in milliseconds.
pub const PAXOS_IO_TIMEOUT_MS: u64 = 2000;

/// Number of delivery attempts per Paxos peer per message.
pub const PAXOS_SEND_ATTEMPTS: u32 = 2;

/// Interval between leader polls for new log records to ship, in milliseconds.
pub const REPL_POLL_INTERVAL_MS: u64 = 100;

/// Maximum bytes of log records shipped in a single replication message.
pub const REPL_MAX_BATCH_BYTES: usize = 64 * 1024;

/// Idle leader polls between keepalive pings to a follower (~5s).
pub const REPL_PINGS_EVERY_POLLS: u32 = 50;

/// Delay before a follower retries a lost leader connection, in milliseconds.
pub const REPL_RECONNECT_DELAY_MS: u64 = 1000;
