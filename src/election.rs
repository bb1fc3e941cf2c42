use {
    crate::{
        error::EtcdError,
        kv::{DeleteOptions, KvStore, ReadOptions, WriteOptions},
    },
    tracing::{debug, info},
};

pub const ELECTION_PREFIX: &str = "/_leaders";

///
/// Leader election where a single key holds the identity of the current leader.
///
/// There is no queue: candidates race to create the key and the losers retry [`LeaderElection::campaign`]
/// later, typically after the leader's TTL.
///
pub struct LeaderElection<S> {
    store: S,
}

impl<S> LeaderElection<S>
where
    S: KvStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn path(name: &str) -> String {
        format!("{ELECTION_PREFIX}/{}", name.trim_start_matches('/'))
    }

    ///
    /// Tries to become (or stay) leader of `name` for `ttl` seconds.
    ///
    /// Returns `true` if `candidate` is the leader when the call returns.
    ///
    pub async fn campaign(&self, name: &str, candidate: &str, ttl: u64) -> Result<bool, EtcdError> {
        let path = Self::path(name);
        let create = WriteOptions::new().with_ttl(ttl).with_prev_exist(false);
        match self.store.write(&path, candidate, create).await {
            Ok(_) => {
                info!("{candidate} elected leader of {path}");
                return Ok(true);
            }
            Err(e) if e.is_already_exists() => {}
            Err(e) => return Err(e),
        }
        let refresh = WriteOptions::new()
            .with_ttl(ttl)
            .with_prev_value(candidate);
        match self.store.write(&path, candidate, refresh).await {
            Ok(_) => {
                debug!("{candidate} still leader of {path}");
                Ok(true)
            }
            // Held by someone else, or it just expired: either way we are not leader now.
            Err(e) if e.is_compare_failed() || e.is_key_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn leader(&self, name: &str) -> Result<Option<String>, EtcdError> {
        match self.store.get(&Self::path(name), ReadOptions::new()).await {
            Ok(result) => Ok(result.value().map(str::to_string)),
            Err(e) if e.is_key_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    ///
    /// Gives up leadership. Returns `false` when `candidate` was not the leader.
    ///
    pub async fn resign(&self, name: &str, candidate: &str) -> Result<bool, EtcdError> {
        let path = Self::path(name);
        let opts = DeleteOptions::new().with_prev_value(candidate);
        match self.store.delete(&path, opts).await {
            Ok(_) => {
                info!("{candidate} resigned from {path}");
                Ok(true)
            }
            Err(e) if e.is_compare_failed() || e.is_key_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}
