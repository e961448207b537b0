//! In-process RESP server for tests
//!
//! Listens on an ephemeral localhost port and understands `PING`, `SET`
//! and `GET`. Failure injection:
//! - `fail_next_pings(n)`: the next `n` PINGs get an error reply
//! - `set_fail_pings(true)`: every PING gets an error reply
//! - `set_moved_to(Some("host:port"))`: `SET`/`GET` answer `MOVED`
//! - `set_refuse(true)`: accepted connections are closed immediately

use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::resp::{self, RespValue};
use crate::{lock, Result, StoreError};

const POLL: Duration = Duration::from_millis(5);
const MOVED_SLOT: u16 = 866;

#[derive(Debug, Default)]
struct Shared {
    data: Mutex<HashMap<String, String>>,
    fail_next_pings: AtomicUsize,
    fail_pings: AtomicBool,
    moved_to: Mutex<Option<String>>,
    refuse: AtomicBool,
    stopped: AtomicBool,
    connections: AtomicUsize,
    pings: AtomicUsize,
}

/// Mock datastore server
#[derive(Debug)]
pub struct MockStoreServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
    acceptor: Option<JoinHandle<()>>,
}

impl MockStoreServer {
    /// Bind `127.0.0.1:0` and start accepting
    pub fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .map_err(|e| StoreError::io("127.0.0.1:0", e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| StoreError::io("127.0.0.1:0", e))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| StoreError::io(addr.to_string(), e))?;

        let shared = Arc::new(Shared::default());
        let accept_shared = shared.clone();
        let acceptor = thread::Builder::new()
            .name(format!("mock-store-{}", addr.port()))
            .spawn(move || accept_loop(listener, accept_shared))
            .map_err(|source| StoreError::Spawn {
                name: "mock-store".into(),
                source,
            })?;

        debug!(addr = %addr, "Mock store server started");
        Ok(Self {
            addr,
            shared,
            acceptor: Some(acceptor),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn fail_next_pings(&self, count: usize) {
        self.shared.fail_next_pings.store(count, Ordering::SeqCst);
    }

    pub fn set_fail_pings(&self, fail: bool) {
        self.shared.fail_pings.store(fail, Ordering::SeqCst);
    }

    pub fn set_moved_to(&self, target: Option<String>) {
        *lock(&self.shared.moved_to) = target;
    }

    pub fn set_refuse(&self, refuse: bool) {
        self.shared.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Stored value for `key`
    pub fn value(&self, key: &str) -> Option<String> {
        lock(&self.shared.data).get(key).cloned()
    }

    /// Seed a value
    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        lock(&self.shared.data).insert(key.into(), value.into());
    }

    pub fn keys(&self) -> Vec<String> {
        lock(&self.shared.data).keys().cloned().collect()
    }

    /// Connections accepted so far (refused ones included)
    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// PINGs received so far
    pub fn pings(&self) -> usize {
        self.shared.pings.load(Ordering::SeqCst)
    }

    pub fn stop(&mut self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        if let Some(handle) = self.acceptor.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MockStoreServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    while !shared.stopped.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                shared.connections.fetch_add(1, Ordering::SeqCst);
                if shared.refuse.load(Ordering::SeqCst) {
                    drop(stream);
                    continue;
                }
                let conn_shared = shared.clone();
                let _ = thread::Builder::new()
                    .name("mock-store-conn".into())
                    .spawn(move || serve(stream, conn_shared));
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(POLL),
            Err(_) => thread::sleep(POLL),
        }
    }
}

fn serve(mut stream: TcpStream, shared: Arc<Shared>) {
    if stream.set_nonblocking(false).is_err()
        || stream.set_read_timeout(Some(POLL * 10)).is_err()
    {
        return;
    }
    let mut buf = BytesMut::new();
    let mut chunk = [0u8; 4096];
    let mut out = BytesMut::new();

    while !shared.stopped.load(Ordering::SeqCst) {
        loop {
            match resp::decode(&mut buf) {
                Ok(Some(request)) => {
                    reply(&shared, request).write_to(&mut out);
                }
                Ok(None) => break,
                Err(_) => return,
            }
        }
        if !out.is_empty() {
            if stream.write_all(&out).is_err() {
                return;
            }
            out.clear();
        }

        match stream.read(&mut chunk) {
            Ok(0) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(_) => return,
        }
    }
}

fn reply(shared: &Shared, request: RespValue) -> RespValue {
    let args: Vec<String> = match request {
        RespValue::Array(Some(items)) => items.iter().filter_map(RespValue::as_text).collect(),
        _ => return RespValue::Error("ERR expected command array".into()),
    };
    let Some(command) = args.first() else {
        return RespValue::Error("ERR empty command".into());
    };

    match command.to_ascii_uppercase().as_str() {
        "PING" => {
            shared.pings.fetch_add(1, Ordering::SeqCst);
            let pending = shared.fail_next_pings.load(Ordering::SeqCst);
            if pending > 0 {
                shared.fail_next_pings.store(pending - 1, Ordering::SeqCst);
                return RespValue::Error("ERR injected ping failure".into());
            }
            if shared.fail_pings.load(Ordering::SeqCst) {
                return RespValue::Error("ERR injected ping failure".into());
            }
            RespValue::Simple("PONG".into())
        }
        "SET" | "GET" => {
            if let Some(target) = lock(&shared.moved_to).clone() {
                return RespValue::Error(format!("MOVED {MOVED_SLOT} {target}"));
            }
            if command.eq_ignore_ascii_case("SET") {
                match (args.get(1), args.get(2)) {
                    (Some(key), Some(value)) => {
                        lock(&shared.data).insert(key.clone(), value.clone());
                        RespValue::Simple("OK".into())
                    }
                    _ => RespValue::Error("ERR wrong number of arguments for 'set'".into()),
                }
            } else {
                match args.get(1) {
                    Some(key) => RespValue::Bulk(
                        lock(&shared.data)
                            .get(key)
                            .map(|v| Bytes::copy_from_slice(v.as_bytes())),
                    ),
                    None => RespValue::Error("ERR wrong number of arguments for 'get'".into()),
                }
            }
        }
        other => RespValue::Error(format!("ERR unknown command '{other}'")),
    }
}
