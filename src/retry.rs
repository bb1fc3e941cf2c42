use {
    crate::error::{EtcdError, ErrorKind},
    retry::delay::Exponential,
    std::{future::Future, time::Duration},
    tracing::{error, warn},
};

// Upper bound between two attempts of an unbounded retry loop.
pub(crate) const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

///
/// Whether `err` is caused by "outside" forces (a leader election, a watcher flushed by a server restart,
/// a broken connection) and the same operation can be safely retried.
///
/// Consistency errors such as [`EtcdError::ClusterIdChanged`] or [`ErrorKind::EventIndexCleared`]
/// are never transient: retrying them would silently change the semantics of the operation.
///
pub fn is_transient(err: &EtcdError) -> bool {
    match err {
        EtcdError::Transport(_) => true,
        EtcdError::Api(api) => match api.kind {
            ErrorKind::RaftInternal => true,
            ErrorKind::LeaderElection => true,
            ErrorKind::WatcherCleared => true,
            ErrorKind::KeyNotFound => false,
            ErrorKind::CompareFailed => false,
            ErrorKind::NotAFile => false,
            ErrorKind::NotADirectory => false,
            ErrorKind::AlreadyExists => false,
            ErrorKind::RootReadOnly => false,
            ErrorKind::DirectoryNotEmpty => false,
            ErrorKind::Unauthorized => false,
            ErrorKind::InvalidField => false,
            ErrorKind::EventIndexCleared => false,
            ErrorKind::Unknown => false,
        },
        EtcdError::InvalidRequest(_) => false,
        EtcdError::ConnectionFailed(_) => false,
        EtcdError::ClusterIdChanged { .. } => false,
        EtcdError::LockExpired(_) => false,
        EtcdError::Cancelled => false,
        EtcdError::Decode(_) => false,
        EtcdError::Config(_) => false,
    }
}

///
/// Never-ending backoff: 10ms, 100ms, 1s, then [`MAX_RETRY_DELAY`] forever.
///
pub fn unbounded_backoff() -> impl Iterator<Item = Duration> {
    Exponential::from_millis_with_factor(10, 10.0).map(|d| d.min(MAX_RETRY_DELAY))
}

///
/// Retry a store operation on transient errors, three times with exponential backoff.
///
/// Examples
///
/// ```no_run
/// use rust_etcd_v2_utils::{client::Client, config::ClientConfig, retry::retry_etcd};
///
/// # async fn run() {
/// let client = Client::new(ClientConfig::default()).expect("client");
///
/// let result = retry_etcd(|| {
///     let client = client.clone();
///     async move { client.get("/my_key").await }
/// })
/// .await;
/// # }
/// ```
///
pub async fn retry_etcd<T, F, Fut>(f: F) -> Result<T, EtcdError>
where
    Fut: Future<Output = Result<T, EtcdError>>,
    F: FnMut() -> Fut,
{
    let retry_strategy = Exponential::from_millis_with_factor(10, 10.0).take(3);
    retry_etcd_with_strategy(retry_strategy, f).await
}

pub async fn retry_etcd_with_strategy<T, F, Fut>(
    retry_strategy: impl IntoIterator<Item = Duration>,
    mut f: F,
) -> Result<T, EtcdError>
where
    Fut: Future<Output = Result<T, EtcdError>>,
    F: FnMut() -> Fut,
{
    let mut retry_strategy = retry_strategy.into_iter();
    loop {
        match f().await {
            Ok(o) => return Ok(o),
            Err(e) => {
                if is_transient(&e) {
                    warn!("failed due to transient state {:?}", e);
                    match retry_strategy.next() {
                        Some(duration) => {
                            tokio::time::sleep(duration).await;
                        }
                        None => return Err(e),
                    }
                } else {
                    error!("failed due to non-transient state: {:?}", e);
                    return Err(e);
                }
            }
        }
    }
}
