//! In-process RESP server for integration tests
//!
//! Speaks enough of the protocol for the cache client: strings with expiry,
//! sets, hashes, lists, SCAN with MATCH/COUNT, MULTI/EXEC and INFO. Per-command
//! delays, an EXEC abort switch and a way to drop every client connection
//! let tests provoke slow or failed paths.

#![allow(dead_code)]

use bytes::{Bytes, BytesMut};
use cachewire::protocol::{RespDecoder, RespEncoder};
use cachewire::{CacheConfig, RespValue};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

#[derive(Default)]
struct State {
    strings: HashMap<String, Bytes>,
    sets: HashMap<String, BTreeSet<String>>,
    hashes: HashMap<String, BTreeMap<String, Bytes>>,
    lists: HashMap<String, VecDeque<Bytes>>,
    expiry: HashMap<String, Instant>,

    password: Option<String>,
    delays: HashMap<String, Duration>,
    abort_exec: bool,
    used_memory: u64,
    max_memory: u64,
    log: Vec<Vec<String>>,
    connections: usize,
}

#[derive(Default)]
struct Session {
    authed: bool,
    queued: Option<Vec<Vec<Bytes>>>,
}

fn text(b: &Bytes) -> String {
    String::from_utf8_lossy(b).into_owned()
}

fn int(b: &Bytes) -> i64 {
    text(b).parse().unwrap_or(0)
}

fn ok() -> RespValue {
    RespValue::SimpleString("OK".to_string())
}

fn bulk(s: impl Into<String>) -> RespValue {
    RespValue::BulkString(Bytes::from(s.into()))
}

fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match (pattern.first(), text.first()) {
        (None, None) => true,
        (Some(b'*'), _) => {
            glob_match(&pattern[1..], text) || (!text.is_empty() && glob_match(pattern, &text[1..]))
        }
        (Some(b'?'), Some(_)) => glob_match(&pattern[1..], &text[1..]),
        (Some(p), Some(t)) if p == t => glob_match(&pattern[1..], &text[1..]),
        _ => false,
    }
}

impl State {
    fn purge_expired(&mut self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .expiry
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            self.remove(&key);
        }
    }

    fn exists(&self, key: &str) -> bool {
        self.strings.contains_key(key)
            || self.sets.contains_key(key)
            || self.hashes.contains_key(key)
            || self.lists.contains_key(key)
    }

    fn remove(&mut self, key: &str) -> bool {
        self.expiry.remove(key);
        self.strings.remove(key).is_some()
            | self.sets.remove(key).is_some()
            | self.hashes.remove(key).is_some()
            | self.lists.remove(key).is_some()
    }

    fn all_keys(&self) -> Vec<String> {
        let mut keys: BTreeSet<String> = BTreeSet::new();
        keys.extend(self.strings.keys().cloned());
        keys.extend(self.sets.keys().cloned());
        keys.extend(self.hashes.keys().cloned());
        keys.extend(self.lists.keys().cloned());
        keys.into_iter().collect()
    }

    fn handle(&mut self, session: &mut Session, args: Vec<Bytes>) -> RespValue {
        let name = text(&args[0]).to_uppercase();
        self.log.push(args.iter().map(text).collect());

        if self.password.is_some() && !session.authed && name != "AUTH" {
            return RespValue::Error("NOAUTH Authentication required.".to_string());
        }

        if let Some(queued) = session.queued.as_mut() {
            if !matches!(name.as_str(), "EXEC" | "DISCARD" | "MULTI" | "WATCH") {
                queued.push(args);
                return RespValue::SimpleString("QUEUED".to_string());
            }
        }

        match name.as_str() {
            "AUTH" => {
                let given = args.last().map(text);
                if given.is_some() && given == self.password {
                    session.authed = true;
                    ok()
                } else {
                    RespValue::Error("WRONGPASS invalid username-password pair".to_string())
                }
            }
            "SELECT" | "WATCH" | "UNWATCH" => ok(),
            "PING" => match args.get(1) {
                Some(msg) => RespValue::BulkString(msg.clone()),
                None => RespValue::SimpleString("PONG".to_string()),
            },
            "INFO" => bulk(format!(
                "# Memory\r\nused_memory:{}\r\nmaxmemory:{}\r\n",
                self.used_memory, self.max_memory
            )),
            "MULTI" => {
                session.queued = Some(Vec::new());
                ok()
            }
            "DISCARD" => {
                session.queued = None;
                ok()
            }
            "EXEC" => match session.queued.take() {
                None => RespValue::Error("ERR EXEC without MULTI".to_string()),
                Some(_) if self.abort_exec => {
                    self.abort_exec = false;
                    RespValue::Null
                }
                Some(queued) => {
                    RespValue::Array(queued.into_iter().map(|c| self.execute(c)).collect())
                }
            },
            _ => self.execute(args),
        }
    }

    fn execute(&mut self, args: Vec<Bytes>) -> RespValue {
        self.purge_expired();
        let name = text(&args[0]).to_uppercase();
        let key = args.get(1).map(text).unwrap_or_default();

        match name.as_str() {
            "GET" => self
                .strings
                .get(&key)
                .map_or(RespValue::Null, |v| RespValue::BulkString(v.clone())),
            "SET" => {
                self.remove(&key);
                self.strings.insert(key, args[2].clone());
                ok()
            }
            "SETEX" => {
                self.remove(&key);
                let secs = int(&args[2]) as u64;
                self.strings.insert(key.clone(), args[3].clone());
                self.expiry
                    .insert(key, Instant::now() + Duration::from_secs(secs));
                ok()
            }
            "DEL" => {
                let removed = args[1..].iter().filter(|k| self.remove(&text(k))).count();
                RespValue::Integer(removed as i64)
            }
            "EXISTS" => {
                let found = args[1..].iter().filter(|k| self.exists(&text(k))).count();
                RespValue::Integer(found as i64)
            }
            "EXPIRE" => {
                if self.exists(&key) {
                    let secs = int(&args[2]) as u64;
                    self.expiry
                        .insert(key, Instant::now() + Duration::from_secs(secs));
                    RespValue::Integer(1)
                } else {
                    RespValue::Integer(0)
                }
            }
            "TTL" => {
                if !self.exists(&key) {
                    RespValue::Integer(-2)
                } else if let Some(at) = self.expiry.get(&key) {
                    let left = at.saturating_duration_since(Instant::now());
                    RespValue::Integer(left.as_millis().div_ceil(1000) as i64)
                } else {
                    RespValue::Integer(-1)
                }
            }
            "SADD" => {
                let set = self.sets.entry(key).or_default();
                let added = args[2..].iter().filter(|m| set.insert(text(m))).count();
                RespValue::Integer(added as i64)
            }
            "SREM" => {
                let Some(set) = self.sets.get_mut(&key) else {
                    return RespValue::Integer(0);
                };
                let removed = args[2..].iter().filter(|m| set.remove(&text(m))).count();
                if set.is_empty() {
                    self.sets.remove(&key);
                }
                RespValue::Integer(removed as i64)
            }
            "SMEMBERS" => RespValue::Array(
                self.sets
                    .get(&key)
                    .map(|s| s.iter().map(|m| bulk(m.clone())).collect())
                    .unwrap_or_default(),
            ),
            "SCARD" => RespValue::Integer(self.sets.get(&key).map_or(0, |s| s.len() as i64)),
            "HSET" => {
                let hash = self.hashes.entry(key).or_default();
                let added = args[2..]
                    .chunks(2)
                    .filter(|pair| hash.insert(text(&pair[0]), pair[1].clone()).is_none())
                    .count();
                RespValue::Integer(added as i64)
            }
            "HGET" => self
                .hashes
                .get(&key)
                .and_then(|h| h.get(&text(&args[2])))
                .map_or(RespValue::Null, |v| RespValue::BulkString(v.clone())),
            "HGETALL" => RespValue::Array(
                self.hashes
                    .get(&key)
                    .map(|h| {
                        h.iter()
                            .flat_map(|(f, v)| [bulk(f.clone()), RespValue::BulkString(v.clone())])
                            .collect()
                    })
                    .unwrap_or_default(),
            ),
            "HDEL" => {
                let Some(hash) = self.hashes.get_mut(&key) else {
                    return RespValue::Integer(0);
                };
                let removed = args[2..]
                    .iter()
                    .filter(|f| hash.remove(&text(f)).is_some())
                    .count();
                RespValue::Integer(removed as i64)
            }
            "RPUSH" | "LPUSH" => {
                let list = self.lists.entry(key).or_default();
                for value in &args[2..] {
                    if name == "RPUSH" {
                        list.push_back(value.clone());
                    } else {
                        list.push_front(value.clone());
                    }
                }
                RespValue::Integer(list.len() as i64)
            }
            "LRANGE" => {
                let Some(list) = self.lists.get(&key) else {
                    return RespValue::Array(Vec::new());
                };
                let len = list.len() as i64;
                let norm = |i: i64| if i < 0 { len + i } else { i };
                let start = norm(int(&args[2])).max(0);
                let stop = norm(int(&args[3])).min(len - 1);
                if start > stop {
                    return RespValue::Array(Vec::new());
                }
                RespValue::Array(
                    list.iter()
                        .skip(start as usize)
                        .take((stop - start + 1) as usize)
                        .map(|v| RespValue::BulkString(v.clone()))
                        .collect(),
                )
            }
            "LLEN" => RespValue::Integer(self.lists.get(&key).map_or(0, |l| l.len() as i64)),
            "SCAN" => {
                let cursor = int(&args[1]) as usize;
                let mut pattern = None;
                let mut count = 10;
                let mut opts = args[2..].chunks(2);
                while let Some([flag, value]) = opts.next() {
                    match text(flag).to_uppercase().as_str() {
                        "MATCH" => pattern = Some(text(value)),
                        "COUNT" => count = int(value) as usize,
                        _ => {}
                    }
                }
                let keys = self.all_keys();
                let end = (cursor + count.max(1)).min(keys.len());
                let page: Vec<RespValue> = keys[cursor.min(end)..end]
                    .iter()
                    .filter(|k| {
                        pattern
                            .as_deref()
                            .map_or(true, |p| glob_match(p.as_bytes(), k.as_bytes()))
                    })
                    .map(|k| bulk(k.clone()))
                    .collect();
                let next = if end >= keys.len() { 0 } else { end };
                RespValue::Array(vec![bulk(next.to_string()), RespValue::Array(page)])
            }
            "EVAL" => {
                let numkeys = int(&args[2]) as usize;
                RespValue::Array(
                    args[3..3 + numkeys]
                        .iter()
                        .map(|k| RespValue::BulkString(k.clone()))
                        .collect(),
                )
            }
            other => RespValue::Error(format!("ERR unknown command '{}'", other)),
        }
    }
}

fn command_args(frame: RespValue) -> Option<Vec<Bytes>> {
    let RespValue::Array(items) = frame else {
        return None;
    };
    items
        .into_iter()
        .map(|item| match item {
            RespValue::BulkString(b) => Some(b),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()
        .filter(|args| !args.is_empty())
}

async fn serve(mut stream: TcpStream, state: Arc<Mutex<State>>, kick: Arc<Notify>) {
    let mut buf = BytesMut::with_capacity(4096);
    let mut decoder = RespDecoder::new();
    let mut session = Session::default();

    loop {
        loop {
            let frame = match decoder.decode(&mut buf) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(_) => return,
            };
            let Some(args) = command_args(frame) else {
                return;
            };

            let name = text(&args[0]).to_uppercase();
            let delay = state.lock().unwrap().delays.get(&name).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let reply = state.lock().unwrap().handle(&mut session, args);
            let mut out = BytesMut::new();
            RespEncoder::encode(&reply, &mut out);
            if stream.write_all(&out).await.is_err() {
                return;
            }
        }
        tokio::select! {
            read = stream.read_buf(&mut buf) => match read {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            },
            _ = kick.notified() => return,
        }
    }
}

/// A running fake server; stops when dropped
pub struct FakeServer {
    addr: SocketAddr,
    state: Arc<Mutex<State>>,
    kick: Arc<Notify>,
    task: JoinHandle<()>,
}

impl FakeServer {
    pub async fn start() -> Self {
        Self::start_with(State::default()).await
    }

    pub async fn start_with_password(password: &str) -> Self {
        Self::start_with(State {
            password: Some(password.to_string()),
            ..State::default()
        })
        .await
    }

    async fn start_with(state: State) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(state));

        let kick = Arc::new(Notify::new());

        let accept_state = state.clone();
        let accept_kick = kick.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_state.lock().unwrap().connections += 1;
                tokio::spawn(serve(stream, accept_state.clone(), accept_kick.clone()));
            }
        });
        Self {
            addr,
            state,
            kick,
            task,
        }
    }

    /// Client configuration pointing at this server with small pool and timeouts
    pub fn config(&self) -> CacheConfig {
        let mut config = CacheConfig::new("127.0.0.1", self.addr.port())
            .with_pool_size(2)
            .with_retry(3, Duration::from_millis(10))
            .with_connect_timeout(Duration::from_secs(2))
            .with_operation_timeout(Duration::from_secs(2));
        config.pool.acquire_timeout = Duration::from_secs(2);
        config.tcp_keepalive = None;
        config
    }

    pub fn set_delay(&self, command: &str, delay: Duration) {
        self.state
            .lock()
            .unwrap()
            .delays
            .insert(command.to_uppercase(), delay);
    }

    pub fn clear_delays(&self) {
        self.state.lock().unwrap().delays.clear();
    }

    pub fn set_memory(&self, used: u64, max: u64) {
        let mut state = self.state.lock().unwrap();
        state.used_memory = used;
        state.max_memory = max;
    }

    pub fn abort_next_exec(&self) {
        self.state.lock().unwrap().abort_exec = true;
    }

    /// Every command received so far, as lossy strings
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn command_names(&self) -> Vec<String> {
        self.commands().into_iter().map(|c| c[0].to_uppercase()).collect()
    }

    pub fn clear_log(&self) {
        self.state.lock().unwrap().log.clear();
    }

    /// Every live key, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut state = self.state.lock().unwrap();
        state.purge_expired();
        state.all_keys()
    }

    pub fn raw_get(&self, key: &str) -> Option<Bytes> {
        self.state.lock().unwrap().strings.get(key).cloned()
    }

    pub fn raw_set(&self, key: &str, value: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .strings
            .insert(key.to_string(), Bytes::copy_from_slice(value));
    }

    pub fn members(&self, key: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Close every client connection that is waiting for a request
    pub fn drop_connections(&self) {
        self.kick.notify_waiters();
    }

    /// Connections accepted so far
    pub fn connections(&self) -> usize {
        self.state.lock().unwrap().connections
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
