//! Per-connection protocol handler.
//!
//! Greets with the banner, then processes one command per CRLF line (bare
//! LF accepted, CR stripped). A connection carries at most one open
//! transaction; single mutating or reading commands outside a transaction
//! auto-wrap in BEGIN/COMMIT. Closing the connection rolls an open
//! transaction back.

use crate::command::{self, Command};
use crate::server::AppState;
use simpledb_core::{Error, Payload};
use std::io::{self, BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::Arc;

const BANNER: &str = "SimpleDB v1.0 - Ready";

pub struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    state: Arc<AppState>,
    /// Open explicit transaction, if any.
    txn: Option<u64>,
}

impl Connection {
    pub fn new(stream: TcpStream, state: Arc<AppState>) -> io::Result<Self> {
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
            state,
            txn: None,
        })
    }

    /// Serve the connection until QUIT, an empty line, or disconnect.
    pub fn run(&mut self) -> io::Result<()> {
        self.write_line(BANNER)?;
        let result = self.serve();
        if let Some(txn) = self.txn.take() {
            tracing::debug!("rolling back open transaction {} on disconnect", txn);
            let _ = self.state.txns.rollback(txn);
        }
        result
    }

    fn serve(&mut self) -> io::Result<()> {
        loop {
            let line = match self.read_line()? {
                Some(line) => line,
                None => return Ok(()),
            };
            if line.is_empty() {
                return Ok(());
            }
            match command::parse(&line) {
                Ok(Command::Quit) => return Ok(()),
                Ok(cmd) => self.dispatch(cmd)?,
                Err(msg) => self.write_line(&format!("ERROR: {}", msg))?,
            }
        }
    }

    fn dispatch(&mut self, cmd: Command) -> io::Result<()> {
        match cmd {
            Command::Get { key } => self.handle_get(&key),
            Command::Set { key, value } => {
                self.handle_write(&key, Payload::Bytes(value.into_bytes()))
            }
            Command::Insert { key, vector } => self.handle_insert(&key, vector),
            Command::Delete { key } => self.handle_delete(&key),
            Command::Search { vector, k } => self.handle_search(&vector, k),
            Command::Begin => self.handle_begin(),
            Command::Commit => self.handle_commit(),
            Command::Rollback => self.handle_rollback(),
            Command::Cas {
                key,
                expected,
                value,
            } => self.handle_cas(&key, expected, value),
            Command::Quit => Ok(()),
        }
    }

    fn handle_get(&mut self, key: &str) -> io::Result<()> {
        let txns = &self.state.txns;
        let result = match self.txn {
            Some(txn) => txns.read(txn, key.as_bytes()),
            None => {
                let txn = txns.begin();
                let value = txns.read(txn, key.as_bytes());
                if let Err(e) = txns.commit(txn) {
                    tracing::warn!("auto-commit of read failed: {}", e);
                }
                value
            }
        };
        match result {
            Ok(payload) => self.write_line(&format!("OK {}", format_payload(&payload))),
            Err(Error::NotFound) => self.write_line("NOT_FOUND"),
            Err(e) => self.write_line(&format!("ERROR: {}", e)),
        }
    }

    fn handle_insert(&mut self, key: &str, vector: Vec<f32>) -> io::Result<()> {
        let dimension = self.state.store.dimension();
        if vector.len() != dimension {
            return self.write_line(&format!(
                "ERROR: dimension mismatch: expected {}, got {}",
                dimension,
                vector.len()
            ));
        }
        self.handle_write(key, Payload::Vector(vector))
    }

    fn handle_write(&mut self, key: &str, payload: Payload) -> io::Result<()> {
        if self.state.read_only {
            return self.write_line(&format!("ERROR: {}", Error::ReadOnly));
        }
        let txns = &self.state.txns;
        match self.txn {
            Some(txn) => match txns.write(txn, key.as_bytes(), payload) {
                Ok(()) => self.write_line("OK"),
                Err(e) => self.write_line(&format!("ERROR: {}", e)),
            },
            None => {
                let txn = txns.begin();
                let applied = txns
                    .write(txn, key.as_bytes(), payload.clone())
                    .and_then(|()| txns.commit(txn));
                match applied {
                    Ok(()) => {
                        self.seed_paxos_register(key, &payload);
                        self.write_line("OK")
                    }
                    Err(e) => {
                        let _ = txns.rollback(txn);
                        self.write_line(&format!("ERROR: {}", e))
                    }
                }
            }
        }
    }

    fn handle_delete(&mut self, key: &str) -> io::Result<()> {
        if self.state.read_only {
            return self.write_line(&format!("ERROR: {}", Error::ReadOnly));
        }
        let txns = &self.state.txns;
        let result = match self.txn {
            Some(txn) => txns.remove(txn, key.as_bytes()),
            None => {
                let txn = txns.begin();
                let removed = txns
                    .remove(txn, key.as_bytes())
                    .and_then(|()| txns.commit(txn));
                if removed.is_err() {
                    let _ = txns.rollback(txn);
                }
                removed
            }
        };
        match result {
            Ok(()) => self.write_line("OK"),
            Err(Error::NotFound) => self.write_line("ERROR: Delete failed"),
            Err(e) => self.write_line(&format!("ERROR: {}", e)),
        }
    }

    fn handle_search(&mut self, query: &[f32], k: usize) -> io::Result<()> {
        let dimension = self.state.store.dimension();
        if query.len() != dimension {
            return self.write_line(&format!(
                "ERROR: dimension mismatch: expected {}, got {}",
                dimension,
                query.len()
            ));
        }
        let results = self.state.txns.search(query, k);
        self.write_line(&format!("OK {} results", results.len()))?;
        for hit in results {
            self.write_line(&format!(
                "{} distance={:.6}",
                String::from_utf8_lossy(&hit.key),
                hit.distance
            ))?;
        }
        Ok(())
    }

    fn handle_begin(&mut self) -> io::Result<()> {
        if self.txn.is_some() {
            return self.write_line("ERROR: Already in transaction");
        }
        self.txn = Some(self.state.txns.begin());
        self.write_line("OK")
    }

    fn handle_commit(&mut self) -> io::Result<()> {
        let txn = match self.txn.take() {
            Some(txn) => txn,
            None => return self.write_line("ERROR: Not in transaction"),
        };
        match self.state.txns.commit(txn) {
            Ok(()) => self.write_line("OK"),
            Err(e) => {
                tracing::warn!("commit of txn {} failed: {}", txn, e);
                self.write_line("ERROR: Commit failed")
            }
        }
    }

    fn handle_rollback(&mut self) -> io::Result<()> {
        let txn = match self.txn.take() {
            Some(txn) => txn,
            None => return self.write_line("ERROR: Not in transaction"),
        };
        match self.state.txns.rollback(txn) {
            Ok(()) => self.write_line("OK"),
            Err(_) => self.write_line("ERROR: Rollback failed"),
        }
    }

    fn handle_cas(
        &mut self,
        key: &str,
        expected: Option<String>,
        value: String,
    ) -> io::Result<()> {
        if self.txn.is_some() {
            return self.write_line("ERROR: CAS not allowed in transaction");
        }
        if self.state.read_only {
            return self.write_line(&format!("ERROR: {}", Error::ReadOnly));
        }
        let engine = match &self.state.paxos {
            Some(engine) => Arc::clone(engine),
            None => return self.write_line("ERROR: CAS not enabled"),
        };

        let expected_bytes = expected.as_deref().map(str::as_bytes);
        match engine.cas(key.as_bytes(), expected_bytes, value.as_bytes()) {
            Ok(()) => {
                // Make the chosen value visible to GET through the store.
                let txns = &self.state.txns;
                let txn = txns.begin();
                let applied = txns
                    .write(txn, key.as_bytes(), Payload::Bytes(value.into_bytes()))
                    .and_then(|()| txns.commit(txn));
                if let Err(e) = applied {
                    let _ = txns.rollback(txn);
                    tracing::warn!("chosen CAS value could not be applied locally: {}", e);
                }
                self.write_line("OK")
            }
            Err(e @ (Error::CasFailed(_) | Error::NoQuorum { .. } | Error::Preempted { .. })) => {
                tracing::debug!("cas on '{}' failed: {}", key, e);
                self.write_line("ERROR: CAS failed")
            }
            Err(e) => self.write_line(&format!("ERROR: {}", e)),
        }
    }

    /// Keep the Paxos register in step with auto-committed byte writes so a
    /// later CAS precondition can match what GET returns.
    fn seed_paxos_register(&self, key: &str, payload: &Payload) {
        if let (Some(engine), Payload::Bytes(value)) = (&self.state.paxos, payload) {
            if let Err(e) = engine.set(key.as_bytes(), value) {
                tracing::warn!("paxos register seed for '{}' failed: {}", key, e);
            }
        }
    }

    /// Read one line, accepting CRLF or bare LF and stripping CR bytes.
    /// Returns `None` on disconnect.
    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut buf = Vec::new();
        let n = self.reader.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        buf.retain(|&b| b != b'\n' && b != b'\r');
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\r\n")?;
        self.writer.flush()
    }
}

/// Render a payload for an `OK <value>` reply.
fn format_payload(payload: &Payload) -> String {
    match payload {
        Payload::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        Payload::Vector(values) => {
            let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
            format!("[{}]", parts.join(","))
        }
    }
}
