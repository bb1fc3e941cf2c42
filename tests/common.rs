#![allow(dead_code)]

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex, MutexGuard,
    },
    time::Duration,
};

use rust_etcd_v2_utils::{
    error::{ApiError, ErrorKind, EtcdError},
    kv::{DeleteOptions, KvStore, ReadOptions, WatchOptions, WriteOptions},
    result::{Action, EtcdResult, Node},
    Client, ClientConfig, Revision,
};
use tokio::{sync::watch, time::Instant};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn get_etcd_client() -> Client {
    Client::new(ClientConfig::default().with_hosts(["127.0.0.1:2379"]))
        .expect("failed to create etcd client")
}

pub fn random_str(len: usize) -> String {
    use rand::{distributions::Alphanumeric, thread_rng, Rng};
    let mut rng = thread_rng();
    (&mut rng)
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

struct Entry {
    value: String,
    created_index: Revision,
    modified_index: Revision,
    expires_at: Option<Instant>,
}

impl Entry {
    fn node(&self, key: &str) -> Node {
        Node {
            key: key.to_string(),
            value: Some(self.value.clone()),
            ttl: self.expires_at.map(|at| {
                at.saturating_duration_since(Instant::now()).as_secs() as i64
            }),
            created_index: self.created_index,
            modified_index: self.modified_index,
            ..Default::default()
        }
    }
}

struct Event {
    index: Revision,
    action: Action,
    node: Node,
    prev_node: Option<Node>,
}

#[derive(Default)]
struct Inner {
    index: Revision,
    entries: BTreeMap<String, Entry>,
    dirs: BTreeSet<String>,
    history: Vec<Event>,
}

fn api_error(kind: ErrorKind, key: &str) -> EtcdError {
    EtcdError::Api(ApiError::new(kind, kind.to_string()).with_cause(key))
}

fn parent_dirs(key: &str) -> Vec<String> {
    let mut dirs = vec![];
    let mut current = key;
    while let Some(pos) = current.rfind('/') {
        current = &current[..pos];
        if current.is_empty() {
            break;
        }
        dirs.push(current.to_string());
    }
    dirs
}

fn is_under(key: &str, dir: &str) -> bool {
    key.len() > dir.len() && key.starts_with(dir) && key.as_bytes()[dir.len()] == b'/'
}

impl Inner {
    fn result(&self, action: Action, node: Node, prev_node: Option<Node>) -> EtcdResult {
        EtcdResult {
            action,
            node,
            prev_node,
            new_key: false,
            etcd_index: self.index,
            raft_index: self.index,
            raft_term: 1,
        }
    }

    fn record(&mut self, action: Action, node: Node, prev_node: Option<Node>) {
        self.history.push(Event {
            index: self.index,
            action,
            node,
            prev_node,
        });
    }

    fn purge_expired(&mut self) -> bool {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at.is_some_and(|at| at <= now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            if let Some(entry) = self.entries.remove(key) {
                self.index += 1;
                let prev = entry.node(key);
                let node = Node {
                    key: key.clone(),
                    created_index: entry.created_index,
                    modified_index: self.index,
                    ..Default::default()
                };
                self.record(Action::Expire, node, Some(prev));
            }
        }
        !expired.is_empty()
    }

    fn dir_node(&self, dir: &str, recursive: bool, depth: usize) -> Node {
        let mut children: BTreeSet<String> = BTreeSet::new();
        for key in self.entries.keys().chain(self.dirs.iter()) {
            if is_under(key, dir) {
                let rest = &key[dir.len() + 1..];
                let name = rest.split('/').next().unwrap_or(rest);
                children.insert(format!("{dir}/{name}"));
            }
        }
        let nodes = if depth == 0 || recursive {
            children
                .iter()
                .map(|child| match self.entries.get(child) {
                    Some(entry) => entry.node(child),
                    None if recursive => self.dir_node(child, true, depth + 1),
                    None => Node {
                        key: child.clone(),
                        dir: true,
                        ..Default::default()
                    },
                })
                .collect()
        } else {
            vec![]
        };
        Node {
            key: dir.to_string(),
            dir: true,
            nodes,
            ..Default::default()
        }
    }

    fn expiry(ttl: Option<u64>) -> Option<Instant> {
        ttl.map(|ttl| Instant::now() + Duration::from_secs(ttl))
    }
}

///
/// In-process [`KvStore`] with etcd v2 semantics: one global index, in-order append keys, TTLs driven by the
/// tokio clock and one-shot watches over the event history.
///
pub struct MemoryStore {
    inner: Mutex<Inner>,
    changes: watch::Sender<Revision>,
    lose_next_append_response: AtomicBool,
    transient_watch_failures: AtomicUsize,
    next_watch_error: Mutex<Option<EtcdError>>,
    delete_before_next_watch: AtomicBool,
    watch_calls: Mutex<Vec<String>>,
    completed_watches: Mutex<Vec<String>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: Mutex::new(Inner::default()),
            changes,
            lose_next_append_response: AtomicBool::new(false),
            transient_watch_failures: AtomicUsize::new(0),
            next_watch_error: Mutex::new(None),
            delete_before_next_watch: AtomicBool::new(false),
            watch_calls: Mutex::new(vec![]),
            completed_watches: Mutex::new(vec![]),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        let mut inner = self.inner.lock().unwrap();
        if inner.purge_expired() {
            self.changes.send_replace(inner.index);
        }
        inner
    }

    fn notify(&self, index: Revision) {
        self.changes.send_replace(index);
    }

    ///
    /// The next append is committed but its response is reported as lost.
    ///
    pub fn lose_next_append_response(&self) {
        self.lose_next_append_response.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_watches(&self, n: usize) {
        self.transient_watch_failures.store(n, Ordering::SeqCst);
    }

    ///
    /// The next watch fails with `err` without looking at the history.
    ///
    pub fn fail_next_watch_with(&self, err: EtcdError) {
        *self.next_watch_error.lock().unwrap() = Some(err);
    }

    ///
    /// The next watch deletes its key right before it starts waiting.
    ///
    pub fn delete_before_next_watch(&self) {
        self.delete_before_next_watch.store(true, Ordering::SeqCst);
    }

    pub fn watch_calls(&self) -> Vec<String> {
        self.watch_calls.lock().unwrap().clone()
    }

    pub fn completed_watches(&self) -> Vec<String> {
        self.completed_watches.lock().unwrap().clone()
    }

    pub fn keys_under(&self, dir: &str) -> Vec<String> {
        let inner = self.inner();
        inner
            .entries
            .keys()
            .filter(|k| is_under(k, dir))
            .cloned()
            .collect()
    }

    pub fn value_of(&self, key: &str) -> Option<String> {
        self.inner().entries.get(key).map(|e| e.value.clone())
    }

    ///
    /// Re-checks TTLs, e.g. after advancing the paused clock.
    ///
    pub fn expire_now(&self) {
        drop(self.inner());
    }

    fn find_event(&self, key: &str, from: Revision, recursive: bool) -> Option<EtcdResult> {
        let inner = self.inner();
        inner
            .history
            .iter()
            .find(|event| {
                event.index >= from
                    && (event.node.key == key || (recursive && is_under(&event.node.key, key)))
            })
            .map(|event| inner.result(event.action, event.node.clone(), event.prev_node.clone()))
    }
}

#[async_trait::async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str, opts: ReadOptions) -> Result<EtcdResult, EtcdError> {
        let inner = self.inner();
        if let Some(entry) = inner.entries.get(key) {
            return Ok(inner.result(Action::Get, entry.node(key), None));
        }
        if inner.dirs.contains(key) {
            let node = inner.dir_node(key, opts.recursive, 0);
            return Ok(inner.result(Action::Get, node, None));
        }
        Err(api_error(ErrorKind::KeyNotFound, key))
    }

    async fn write(
        &self,
        key: &str,
        value: &str,
        opts: WriteOptions,
    ) -> Result<EtcdResult, EtcdError> {
        let mut inner = self.inner();
        if opts.dir {
            inner.index += 1;
            inner.dirs.insert(key.to_string());
            for dir in parent_dirs(key) {
                inner.dirs.insert(dir);
            }
            let node = Node {
                key: key.to_string(),
                dir: true,
                created_index: inner.index,
                modified_index: inner.index,
                ..Default::default()
            };
            let index = inner.index;
            inner.record(Action::Set, node.clone(), None);
            let result = inner.result(Action::Set, node, None);
            drop(inner);
            self.notify(index);
            return Ok(result);
        }

        if opts.append {
            if inner.entries.contains_key(key) {
                return Err(api_error(ErrorKind::NotADirectory, key));
            }
            inner.index += 1;
            let index = inner.index;
            let child = format!("{key}/{index:020}");
            inner.dirs.insert(key.to_string());
            for dir in parent_dirs(key) {
                inner.dirs.insert(dir);
            }
            let entry = Entry {
                value: value.to_string(),
                created_index: index,
                modified_index: index,
                expires_at: Inner::expiry(opts.ttl),
            };
            let node = entry.node(&child);
            inner.entries.insert(child, entry);
            inner.record(Action::Create, node.clone(), None);
            let mut result = inner.result(Action::Create, node, None);
            result.new_key = true;
            drop(inner);
            self.notify(index);
            if self.lose_next_append_response.swap(false, Ordering::SeqCst) {
                return Err(EtcdError::Transport("response lost".to_string()));
            }
            return Ok(result);
        }

        if inner.dirs.contains(key) {
            return Err(api_error(ErrorKind::NotAFile, key));
        }
        let existing = inner.entries.get(key);
        match (opts.prev_exist, existing) {
            (Some(false), Some(_)) => return Err(api_error(ErrorKind::AlreadyExists, key)),
            (Some(true), None) => return Err(api_error(ErrorKind::KeyNotFound, key)),
            _ => {}
        }
        if opts.prev_value.is_some() || opts.prev_index.is_some() {
            let Some(entry) = existing else {
                return Err(api_error(ErrorKind::KeyNotFound, key));
            };
            if opts.prev_value.as_deref().is_some_and(|v| v != entry.value)
                || opts.prev_index.is_some_and(|i| i != entry.modified_index)
            {
                return Err(api_error(ErrorKind::CompareFailed, key));
            }
        }
        let action = if opts.prev_value.is_some() || opts.prev_index.is_some() {
            Action::CompareAndSwap
        } else if opts.prev_exist == Some(true) {
            Action::Update
        } else if opts.prev_exist == Some(false) {
            Action::Create
        } else {
            Action::Set
        };
        let prev_node = existing.map(|e| e.node(key));
        let created_index = existing.map(|e| e.created_index);
        inner.index += 1;
        let index = inner.index;
        for dir in parent_dirs(key) {
            inner.dirs.insert(dir);
        }
        let entry = Entry {
            value: value.to_string(),
            created_index: created_index.unwrap_or(index),
            modified_index: index,
            expires_at: Inner::expiry(opts.ttl),
        };
        let node = entry.node(key);
        inner.entries.insert(key.to_string(), entry);
        inner.record(action, node.clone(), prev_node.clone());
        let mut result = inner.result(action, node, prev_node);
        result.new_key = created_index.is_none();
        drop(inner);
        self.notify(index);
        Ok(result)
    }

    async fn delete(&self, key: &str, opts: DeleteOptions) -> Result<EtcdResult, EtcdError> {
        let mut inner = self.inner();
        if !inner.entries.contains_key(key) {
            if inner.dirs.contains(key) && (opts.recursive || opts.dir) {
                inner.index += 1;
                let index = inner.index;
                inner.entries.retain(|k, _| !is_under(k, key));
                inner.dirs.retain(|d| d != key && !is_under(d, key));
                let node = Node {
                    key: key.to_string(),
                    dir: true,
                    modified_index: index,
                    ..Default::default()
                };
                inner.record(Action::Delete, node.clone(), None);
                let result = inner.result(Action::Delete, node, None);
                drop(inner);
                self.notify(index);
                return Ok(result);
            }
            return Err(api_error(ErrorKind::KeyNotFound, key));
        }
        let entry = &inner.entries[key];
        if opts.prev_value.as_deref().is_some_and(|v| v != entry.value)
            || opts.prev_index.is_some_and(|i| i != entry.modified_index)
        {
            return Err(api_error(ErrorKind::CompareFailed, key));
        }
        let action = if opts.prev_value.is_some() || opts.prev_index.is_some() {
            Action::CompareAndDelete
        } else {
            Action::Delete
        };
        let prev_node = entry.node(key);
        let created_index = entry.created_index;
        inner.entries.remove(key);
        inner.index += 1;
        let index = inner.index;
        let node = Node {
            key: key.to_string(),
            created_index,
            modified_index: index,
            ..Default::default()
        };
        inner.record(action, node.clone(), Some(prev_node.clone()));
        let result = inner.result(action, node, Some(prev_node));
        drop(inner);
        self.notify(index);
        Ok(result)
    }

    async fn watch(&self, key: &str, opts: WatchOptions) -> Result<EtcdResult, EtcdError> {
        self.watch_calls.lock().unwrap().push(key.to_string());
        if !key.starts_with('/') {
            return Err(EtcdError::InvalidRequest(format!(
                "the key {key} is relative, it must start with /"
            )));
        }
        let failures = self.transient_watch_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.transient_watch_failures
                .store(failures - 1, Ordering::SeqCst);
            return Err(EtcdError::Api(ApiError::new(
                ErrorKind::WatcherCleared,
                "watcher is cleared due to etcd recovery",
            )));
        }
        let injected = self.next_watch_error.lock().unwrap().take();
        if let Some(err) = injected {
            return Err(err);
        }
        if self.delete_before_next_watch.swap(false, Ordering::SeqCst) {
            self.delete(key, DeleteOptions::new()).await?;
        }
        let mut changes = self.changes.subscribe();
        let from = match opts.wait_index {
            Some(index) => index,
            None => self.inner().index + 1,
        };
        loop {
            if let Some(result) = self.find_event(key, from, opts.recursive) {
                self.completed_watches.lock().unwrap().push(key.to_string());
                return Ok(result);
            }
            // Wake up periodically so TTL expiry is observed under a paused clock too.
            let _ = tokio::time::timeout(Duration::from_millis(100), changes.changed()).await;
        }
    }
}
