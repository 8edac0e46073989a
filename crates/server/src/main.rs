use clap::{Parser, ValueEnum};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use simpledb_core::paxos::{CasPaxos, NoPeers, PaxosTransport};
use simpledb_core::storage::KvStore;
use simpledb_core::txn::TransactionManager;
use simpledb_core::{config, DistanceMetric, HnswConfig};
use simpledb_server::replication::paxos::{run_paxos_listener, TcpTransport};
use simpledb_server::replication::{follower, leader};
use simpledb_server::server::{AppState, Server};
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "simpledb", about = "Durable key-value and vector store")]
struct Args {
    /// Port for the client line protocol
    #[arg(long, default_value_t = config::DEFAULT_PORT)]
    port: u16,

    /// Append-log file path
    #[arg(long, default_value = config::DEFAULT_LOG_PATH)]
    log: PathBuf,

    /// Replication role
    #[arg(long, value_enum, default_value_t = Role::Leader)]
    role: Role,

    /// Leader replication address (host:port), required for followers
    #[arg(long)]
    leader: Option<String>,

    /// Port the leader's replication listener binds
    #[arg(long, default_value_t = config::DEFAULT_REPL_PORT)]
    repl_port: u16,

    /// Node id for CAS-Paxos (omit to disable the CAS command)
    #[arg(long)]
    node_id: Option<u32>,

    /// Comma-separated peer Paxos addresses (host:port,host:port)
    #[arg(long)]
    peers: Option<String>,

    /// Port the CAS-Paxos peer service binds
    #[arg(long, default_value_t = config::DEFAULT_PAXOS_PORT)]
    paxos_port: u16,

    /// Vector dimension of the store
    #[arg(long, default_value_t = config::DEFAULT_DIMENSION)]
    dimension: usize,

    /// Distance metric for vector search
    #[arg(long, value_enum, default_value_t = MetricArg::Euclidean)]
    metric: MetricArg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Role {
    Leader,
    Follower,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MetricArg {
    Euclidean,
    Cosine,
}

impl From<MetricArg> for DistanceMetric {
    fn from(arg: MetricArg) -> Self {
        match arg {
            MetricArg::Euclidean => DistanceMetric::Euclidean,
            MetricArg::Cosine => DistanceMetric::Cosine,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("simpledb_server=info".parse().expect("valid directive"))
                .add_directive("simpledb_core=info".parse().expect("valid directive")),
        )
        .init();

    let args = Args::parse();

    if args.port == 0 {
        eprintln!("Error: port must be > 0");
        std::process::exit(1);
    }
    if args.dimension == 0 || args.dimension > config::MAX_DIMENSION {
        eprintln!(
            "Error: dimension must be in 1..={}",
            config::MAX_DIMENSION
        );
        std::process::exit(1);
    }
    if args.role == Role::Follower && args.leader.is_none() {
        eprintln!("Error: --role follower requires --leader <host:port>");
        std::process::exit(1);
    }

    let hnsw_config = HnswConfig {
        metric: args.metric.into(),
        ..HnswConfig::default()
    };
    let store = Arc::new(KvStore::open(&args.log, args.dimension, hnsw_config)?);
    tracing::info!(
        "storage initialized (log: {:?}, {} live keys)",
        args.log,
        store.len()
    );
    let txns = Arc::new(TransactionManager::new(Arc::clone(&store)));

    // CAS-Paxos: enabled by --node-id; peers may be empty for a
    // single-node register.
    let paxos = match args.node_id {
        Some(node_id) => {
            let peers: Vec<String> = args
                .peers
                .as_deref()
                .unwrap_or("")
                .split(',')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            let transport: Arc<dyn PaxosTransport> = if peers.is_empty() {
                Arc::new(NoPeers)
            } else {
                Arc::new(TcpTransport::new(peers.clone()))
            };
            let engine = Arc::new(CasPaxos::new(node_id, transport));

            let listener = TcpListener::bind(("0.0.0.0", args.paxos_port))?;
            tracing::info!(
                "paxos node {} listening on port {} ({} peers)",
                node_id,
                args.paxos_port,
                peers.len()
            );
            let acceptor = engine.acceptor();
            thread::spawn(move || run_paxos_listener(listener, acceptor));
            Some(engine)
        }
        None => None,
    };

    // Replication role.
    let read_only = match args.role {
        Role::Leader => {
            let listener = TcpListener::bind(("0.0.0.0", args.repl_port))?;
            tracing::info!("replication listener on port {}", args.repl_port);
            let repl_store = Arc::clone(&store);
            thread::spawn(move || leader::run_replication_listener(listener, repl_store));
            false
        }
        Role::Follower => {
            let leader_addr = args.leader.clone().expect("checked above");
            tracing::info!("following leader at {}", leader_addr);
            let repl_store = Arc::clone(&store);
            thread::spawn(move || follower::run_follower(leader_addr, repl_store));
            true
        }
    };

    let state = Arc::new(AppState {
        store: Arc::clone(&store),
        txns,
        paxos,
        read_only,
    });
    let server = Server::bind(("0.0.0.0", args.port), state)?;
    tracing::info!(
        port = args.port,
        role = ?args.role,
        cas = args.node_id.is_some(),
        "simpledb ready"
    );
    thread::spawn(move || {
        if let Err(e) = server.run() {
            tracing::error!("server stopped: {}", e);
        }
    });

    // Block until SIGINT/SIGTERM, then flush and exit cleanly.
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    if let Some(signal) = signals.forever().next() {
        tracing::info!("received signal {}, shutting down", signal);
    }
    store.sync()?;
    tracing::info!("log flushed, goodbye");
    Ok(())
}
