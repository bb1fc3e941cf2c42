use {
    crate::{
        error::{ErrorKind, EtcdError},
        kv::{DeleteOptions, KvStore, ReadOptions, WatchOptions, WriteOptions},
        lease::LeaseKeeper,
        retry::{is_transient, unbounded_backoff},
        Revision,
    },
    rand::{distributions::Alphanumeric, Rng},
    std::future::Future,
    tracing::{debug, info, warn},
};

pub const LOCK_PREFIX: &str = "/_locks";

///
/// Where a [`Lock`] handle believes it stands.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unattempted,
    /// Our entry is written, the queue position is not known yet.
    Pending,
    Held,
    Waiting,
    Released,
}

fn participant_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

///
/// Outcome of ranking our entry among the lock's queue.
///
struct Ranking {
    /// Key that currently owns the lock.
    locker: String,
    /// Entry right before ours, `None` when we are the locker.
    predecessor: Option<String>,
    /// Store index the listing was taken at.
    index: Revision,
}

///
/// Distributed mutual exclusion over any [`KvStore`].
///
/// Each participant appends a sequential entry under `/_locks/<name>` whose value is its random participant id.
/// The entry sorted first owns the lock, every other participant watches only the entry right before its own,
/// so releasing the lock wakes a single waiter and the lock is granted in creation order.
///
/// The participant id makes acquisition safe to retry: an append whose response was lost is found again by
/// looking for the id among the existing entries instead of being written twice.
///
/// A `Lock` is not internally synchronized, hence `&mut self` on every operation.
///
/// ```no_run
/// use rust_etcd_v2_utils::{client::Client, config::ClientConfig, lock::Lock};
///
/// # async fn run() -> Result<(), rust_etcd_v2_utils::error::EtcdError> {
/// let client = Client::new(ClientConfig::default())?;
/// let mut lock = Lock::new(client, "build");
/// if lock.acquire(true, Some(60)).await? {
///     // critical section
///     lock.release().await?;
/// }
/// # Ok(())
/// # }
/// ```
///
pub struct Lock<S> {
    store: S,
    name: String,
    path: String,
    uuid: String,
    sequence: Option<String>,
    state: LockState,
}

impl<S> Lock<S>
where
    S: KvStore,
{
    pub fn new(store: S, name: impl Into<String>) -> Self {
        let name = name.into();
        let path = format!("{LOCK_PREFIX}/{name}");
        let uuid = participant_id();
        debug!("initiating lock for {path} with uuid {uuid}");
        Self {
            store,
            name,
            path,
            uuid,
            sequence: None,
            state: LockState::Unattempted,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn sequence(&self) -> Option<&str> {
        self.sequence.as_deref()
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    ///
    /// Cached ownership, without asking the store. See [`Lock::is_acquired`].
    ///
    pub fn is_taken(&self) -> bool {
        self.state == LockState::Held
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn lock_key(&self) -> Result<String, EtcdError> {
        match &self.sequence {
            Some(sequence) => Ok(format!("{}/{}", self.path, sequence)),
            None => Err(EtcdError::InvalidRequest("no sequence present".to_string())),
        }
    }

    fn set_sequence(&mut self, key: &str) {
        let sequence = key
            .strip_prefix(self.path.as_str())
            .unwrap_or(key)
            .trim_start_matches('/');
        self.sequence = Some(sequence.to_string());
    }

    ///
    /// Adopts the participant id of another handle, e.g. one that belonged to a crashed process.
    ///
    /// Fails and keeps the current id when no entry of this lock carries `uuid`.
    ///
    pub async fn set_uuid(&mut self, uuid: impl Into<String>) -> Result<(), EtcdError> {
        let old_uuid = std::mem::replace(&mut self.uuid, uuid.into());
        let old_sequence = self.sequence.take();
        if !self.find_lock().await? {
            warn!("the hand-set uuid was not found, refusing");
            self.uuid = old_uuid;
            self.sequence = old_sequence;
            return Err(EtcdError::InvalidRequest("nonexistent uuid".to_string()));
        }
        Ok(())
    }

    ///
    /// Confirms against the store that a lock we believe we hold is still ours.
    ///
    /// Clears the cached ownership when the entry vanished, e.g. because its TTL expired.
    ///
    pub async fn is_acquired(&mut self) -> Result<bool, EtcdError> {
        if self.state != LockState::Held {
            debug!("lock not taken");
            return Ok(false);
        }
        let lock_key = self.lock_key()?;
        match self.store.get(&lock_key, ReadOptions::new()).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_key_not_found() => {
                warn!("lock was supposedly taken, but we cannot find it");
                self.state = LockState::Released;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    ///
    /// Acquires the lock.
    ///
    /// With `blocking` the call returns only once the lock is ours; without it, it returns `false` right away when
    /// another participant is ahead in the queue (our entry stays queued).
    ///
    /// `lock_ttl` is the lease of our entry in seconds, `None` or `Some(0)` for an entry that never expires.
    ///
    /// A blocking acquire never times out by itself: wrap it in [`tokio::time::timeout`] or drop the future to give up.
    ///
    pub async fn acquire(&mut self, blocking: bool, lock_ttl: Option<u64>) -> Result<bool, EtcdError> {
        let lock_ttl = lock_ttl.filter(|ttl| *ttl > 0);
        let mut found = self.find_lock().await?;
        if let (true, Some(ttl)) = (found, lock_ttl) {
            // Renew our entry instead of queueing a second one, but never resurrect it once gone.
            let lock_key = self.lock_key()?;
            let renew = WriteOptions::new()
                .with_ttl(ttl)
                .with_prev_exist(true)
                .with_prev_value(self.uuid.as_str());
            match self.store.write(&lock_key, &self.uuid, renew).await {
                Ok(_) => debug!("lock key {lock_key} renewed for {ttl}s"),
                Err(e) if e.is_key_not_found() || e.is_compare_failed() => {
                    warn!("lock key {lock_key} vanished before renewal, queueing again");
                    self.sequence = None;
                    found = false;
                }
                Err(e) => return Err(e),
            }
        }
        if !found {
            debug!("lock not found, writing it to {}", self.path);
            let mut opts = WriteOptions::new().with_append();
            opts.ttl = lock_ttl;
            let result = self.store.write(&self.path, &self.uuid, opts).await?;
            self.set_sequence(result.key());
            debug!(
                "lock key {} written, sequence is {:?}",
                result.key(),
                self.sequence
            );
        }
        self.state = LockState::Pending;
        self.acquired(blocking).await
    }

    ///
    /// Releases the lock.
    ///
    /// Releasing a lock whose entry is already gone is not an error, and the handle is always left not holding
    /// the lock.
    ///
    pub async fn release(&mut self) -> Result<(), EtcdError> {
        let result = self.delete_entry().await;
        self.state = LockState::Released;
        result
    }

    async fn delete_entry(&mut self) -> Result<(), EtcdError> {
        if self.sequence.is_none() && !self.find_lock().await? {
            info!("no entry for {} with uuid {}, nothing to release", self.path, self.uuid);
            return Ok(());
        }
        let lock_key = self.lock_key()?;
        debug!("releasing existing lock {lock_key}");
        match self.store.delete(&lock_key, DeleteOptions::new()).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_key_not_found() => {
                info!("lock {lock_key} not found, nothing to release");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    ///
    /// Runs `f` while holding the lock: blocking acquire with a permanent entry, then release.
    ///
    /// The lock is released whatever `f` returns, and the release error, if any, is returned only when `f` succeeded.
    ///
    pub async fn scope<T, E, F, Fut>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<EtcdError>,
    {
        self.acquire(true, None).await?;
        let output = f().await;
        let released = self.release().await;
        let value = output?;
        released?;
        Ok(value)
    }

    ///
    /// Keeps our entry alive by refreshing its TTL in the background until the returned keeper is dropped.
    ///
    pub fn keep_alive(&self, ttl: u64) -> Result<LeaseKeeper, EtcdError>
    where
        S: Clone + 'static,
    {
        let lock_key = self.lock_key()?;
        Ok(LeaseKeeper::spawn(
            self.store.clone(),
            lock_key,
            self.uuid.clone(),
            ttl,
        ))
    }

    async fn find_lock(&mut self) -> Result<bool, EtcdError> {
        if self.sequence.is_some() {
            let lock_key = self.lock_key()?;
            return match self.store.get(&lock_key, ReadOptions::new()).await {
                Ok(result) => {
                    self.uuid = result.value().unwrap_or_default().to_string();
                    Ok(true)
                }
                Err(e) if e.is_key_not_found() => Ok(false),
                Err(e) => Err(e),
            };
        }
        let listing = match self
            .store
            .get(&self.path, ReadOptions::new().with_recursive())
            .await
        {
            Ok(listing) => listing,
            Err(e) if e.is_key_not_found() => return Ok(false),
            Err(e) => return Err(e),
        };
        let found = listing
            .leaves()
            .find(|node| !node.dir && node.value.as_deref() == Some(self.uuid.as_str()))
            .map(|node| node.key.clone());
        match found {
            Some(key) => {
                self.set_sequence(&key);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ranking(&mut self) -> Result<Ranking, EtcdError> {
        let listing = match self
            .store
            .get(&self.path, ReadOptions::new().with_recursive())
            .await
        {
            Ok(listing) => listing,
            Err(e) if e.is_key_not_found() => {
                return Err(EtcdError::LockExpired(format!(
                    "lock directory {} not found",
                    self.path
                )))
            }
            Err(e) => return Err(e),
        };
        if self.sequence.is_none() {
            self.find_lock().await?;
        }
        let mut keys: Vec<&str> = listing
            .leaves()
            .filter(|node| !node.dir)
            .map(|node| node.key.as_str())
            .collect();
        keys.sort_unstable();
        debug!("lock keys found: {keys:?}");

        let lock_key = self.lock_key().map_err(|_| {
            EtcdError::LockExpired(format!("no entry of ours under {}", self.path))
        })?;
        let Some(position) = keys.iter().position(|key| *key == lock_key) else {
            // Most probably our entry expired.
            return Err(EtcdError::LockExpired(format!("{lock_key} not found")));
        };
        let locker = keys[0].to_string();
        let predecessor = if position == 0 {
            debug!("no key before our one, we are the locker");
            None
        } else {
            debug!("locker: {locker}, key to watch: {}", keys[position - 1]);
            Some(keys[position - 1].to_string())
        };
        Ok(Ranking {
            locker,
            predecessor,
            index: listing.etcd_index,
        })
    }

    async fn acquired(&mut self, blocking: bool) -> Result<bool, EtcdError> {
        loop {
            let ranking = self.ranking().await?;
            let Some(watch_key) = ranking.predecessor else {
                debug!("lock acquired!");
                self.state = LockState::Held;
                return Ok(true);
            };
            self.state = LockState::Waiting;
            if !blocking {
                return Ok(false);
            }
            debug!(
                "lock held by {}, now watching {watch_key}",
                ranking.locker
            );
            self.wait_for_change(&watch_key, ranking.index).await?;
            // The queue may have moved by more than one slot, rank again from scratch.
        }
    }

    async fn wait_for_change(&self, watch_key: &str, listed_at: Revision) -> Result<(), EtcdError> {
        let mut opts = WatchOptions::new();
        if listed_at > 0 {
            opts = opts.with_wait_index(listed_at + 1);
        }
        let mut backoff = unbounded_backoff();
        loop {
            match self.store.watch(watch_key, opts.clone()).await {
                Ok(result) => {
                    debug!("detected variation for {}: {:?}", result.key(), result.action);
                    return Ok(());
                }
                Err(e) if e.is_key_not_found() => {
                    debug!("key {watch_key} not present anymore, moving on");
                    return Ok(());
                }
                // Our listing is older than the store's event history, a fresh ranking supersedes it.
                Err(e) if e.kind() == Some(ErrorKind::EventIndexCleared) => {
                    debug!("history cleared past index {listed_at}, ranking again");
                    return Ok(());
                }
                Err(e) if is_transient(&e) => {
                    warn!("watch on {watch_key} failed, retrying: {e}");
                    if let Some(delay) = backoff.next() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}
