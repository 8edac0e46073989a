//! TCP acceptor: one handler thread per client connection.

use crate::connection::Connection;
use simpledb_core::paxos::CasPaxos;
use simpledb_core::storage::KvStore;
use simpledb_core::txn::TransactionManager;
use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::Arc;
use std::thread;

/// State shared by every connection handler.
pub struct AppState {
    pub store: Arc<KvStore>,
    pub txns: Arc<TransactionManager>,
    /// CAS-Paxos engine; `None` disables the CAS command.
    pub paxos: Option<Arc<CasPaxos>>,
    /// Followers reject mutating commands.
    pub read_only: bool,
}

/// Listening socket plus the shared state handed to each connection.
pub struct Server {
    listener: TcpListener,
    state: Arc<AppState>,
}

impl Server {
    /// Bind the client listener.
    pub fn bind<A: ToSocketAddrs>(addr: A, state: Arc<AppState>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self { listener, state })
    }

    /// The bound address; useful when binding port 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever, spawning one handler thread each.
    pub fn run(&self) -> io::Result<()> {
        for stream in self.listener.incoming() {
            match stream {
                Ok(stream) => {
                    let peer = stream
                        .peer_addr()
                        .map(|a| a.to_string())
                        .unwrap_or_else(|_| "unknown".into());
                    tracing::debug!("connection from {}", peer);
                    let state = Arc::clone(&self.state);
                    thread::spawn(move || match Connection::new(stream, state) {
                        Ok(mut conn) => {
                            if let Err(e) = conn.run() {
                                tracing::debug!("connection {} ended: {}", peer, e);
                            }
                        }
                        Err(e) => tracing::warn!("connection {} setup failed: {}", peer, e),
                    });
                }
                Err(e) => tracing::warn!("accept failed: {}", e),
            }
        }
        Ok(())
    }
}
