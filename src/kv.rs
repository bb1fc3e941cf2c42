use {
    crate::{error::EtcdError, result::EtcdResult, Revision},
    std::sync::Arc,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadOptions {
    pub recursive: bool,
    pub sorted: bool,
    pub quorum: bool,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recursive(mut self) -> Self {
        self.recursive = true;
        self
    }

    pub fn with_sorted(mut self) -> Self {
        self.sorted = true;
        self
    }

    pub fn with_quorum(mut self) -> Self {
        self.quorum = true;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Lease in seconds; `None` writes a permanent entry.
    pub ttl: Option<u64>,
    pub dir: bool,
    /// Create a store-assigned, in-order child key under the given directory.
    pub append: bool,
    pub prev_value: Option<String>,
    pub prev_index: Option<Revision>,
    pub prev_exist: Option<bool>,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_dir(mut self) -> Self {
        self.dir = true;
        self
    }

    pub fn with_append(mut self) -> Self {
        self.append = true;
        self
    }

    pub fn with_prev_value(mut self, prev_value: impl Into<String>) -> Self {
        self.prev_value = Some(prev_value.into());
        self
    }

    pub fn with_prev_index(mut self, prev_index: Revision) -> Self {
        self.prev_index = Some(prev_index);
        self
    }

    pub fn with_prev_exist(mut self, prev_exist: bool) -> Self {
        self.prev_exist = Some(prev_exist);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    pub recursive: bool,
    pub dir: bool,
    pub prev_value: Option<String>,
    pub prev_index: Option<Revision>,
}

impl DeleteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recursive(mut self) -> Self {
        self.recursive = true;
        self
    }

    pub fn with_dir(mut self) -> Self {
        self.dir = true;
        self
    }

    pub fn with_prev_value(mut self, prev_value: impl Into<String>) -> Self {
        self.prev_value = Some(prev_value.into());
        self
    }

    pub fn with_prev_index(mut self, prev_index: Revision) -> Self {
        self.prev_index = Some(prev_index);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// Return the first mutation at or after this index instead of the next one.
    pub wait_index: Option<Revision>,
    pub recursive: bool,
}

impl WatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_wait_index(mut self, index: Revision) -> Self {
        self.wait_index = Some(index);
        self
    }

    pub fn with_recursive(mut self) -> Self {
        self.recursive = true;
        self
    }
}

///
/// The narrow key-value capability the coordination recipes are built on.
///
/// [`crate::client::Client`] implements it over the etcd v2 HTTP API, but [`crate::lock::Lock`],
/// [`crate::election::LeaderElection`], [`crate::lease::LeaseKeeper`] and [`crate::watcher::Subscription`]
/// only ever see this trait.
///
#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str, opts: ReadOptions) -> Result<EtcdResult, EtcdError>;

    async fn write(
        &self,
        key: &str,
        value: &str,
        opts: WriteOptions,
    ) -> Result<EtcdResult, EtcdError>;

    async fn delete(&self, key: &str, opts: DeleteOptions) -> Result<EtcdResult, EtcdError>;

    ///
    /// Blocks until the next mutation at (or under, when recursive) `key`.
    ///
    async fn watch(&self, key: &str, opts: WatchOptions) -> Result<EtcdResult, EtcdError>;
}

#[async_trait::async_trait]
impl<T> KvStore for Arc<T>
where
    T: KvStore + ?Sized,
{
    async fn get(&self, key: &str, opts: ReadOptions) -> Result<EtcdResult, EtcdError> {
        (**self).get(key, opts).await
    }

    async fn write(
        &self,
        key: &str,
        value: &str,
        opts: WriteOptions,
    ) -> Result<EtcdResult, EtcdError> {
        (**self).write(key, value, opts).await
    }

    async fn delete(&self, key: &str, opts: DeleteOptions) -> Result<EtcdResult, EtcdError> {
        (**self).delete(key, opts).await
    }

    async fn watch(&self, key: &str, opts: WatchOptions) -> Result<EtcdResult, EtcdError> {
        (**self).watch(key, opts).await
    }
}
