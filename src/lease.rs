use {
    crate::{kv::KvStore, kv::WriteOptions, retry::retry_etcd},
    std::time::Duration,
    tokio::{
        sync::{broadcast, oneshot},
        task::JoinHandle,
        time::{Instant, MissedTickBehavior},
    },
    tracing::{error, trace, warn},
};

// Jiffy is interval between system timer interrupts, typically 10ms for linux systems.
const AT_LEAST_10_JIFFIES: Duration = Duration::from_millis(100);

///
/// Keeps a TTL'd key alive until it is dropped.
///
/// The keeper refreshes the key every `ttl / 2` with a conditional write that only succeeds while the key still holds
/// the value it was created with. When the key is gone or was overwritten, the keeper notifies
/// every [`LeaseExpiredNotify`] and stops.
///
/// Dropping the keeper stops the refresh task but leaves the key to expire on its own.
///
pub struct LeaseKeeper {
    key: String,
    ttl: u64,
    // Let this field dead, because when drop it will trigger the refresh task to stop.
    #[allow(dead_code)]
    tx_terminate: oneshot::Sender<()>,
    rx_lease_expire: broadcast::Receiver<()>,
    handle: JoinHandle<()>,
}

///
/// Notify when the lease has expired.
///
pub struct LeaseExpiredNotify {
    inner: broadcast::Receiver<()>,
}

impl LeaseExpiredNotify {
    ///
    /// Wait until the lease has expired or its keeper stopped.
    ///
    pub async fn recv(mut self) {
        let _ = self.inner.recv().await;
    }
}

impl Clone for LeaseExpiredNotify {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.resubscribe(),
        }
    }
}

impl LeaseKeeper {
    pub fn spawn<S>(store: S, key: impl Into<String>, value: impl Into<String>, ttl: u64) -> Self
    where
        S: KvStore + 'static,
    {
        let key = key.into();
        let value = value.into();
        let (tx_terminate, mut rx_terminate) = oneshot::channel::<()>();
        let (tx_lease_expire, rx_lease_expire) = broadcast::channel(1);
        let period = (Duration::from_secs(ttl) / 2).max(AT_LEAST_10_JIFFIES);

        let key2 = key.clone();
        let handle = tokio::spawn(async move {
            let key = key2;
            let opts = WriteOptions::new()
                .with_ttl(ttl)
                .with_prev_exist(true)
                .with_prev_value(value.as_str());
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut rx_terminate => {
                        trace!("lease keeper for {key} terminated");
                        break;
                    }
                    _ = interval.tick() => {}
                }
                let (store, key, value, opts) = (&store, key.as_str(), value.as_str(), &opts);
                let result = retry_etcd(move || store.write(key, value, opts.clone())).await;
                match result {
                    Ok(_) => trace!("refreshed {key} for {ttl}s"),
                    Err(e) if e.is_key_not_found() || e.is_compare_failed() => {
                        warn!("lease of {key} lost: {e}");
                        let _ = tx_lease_expire.send(());
                        break;
                    }
                    Err(e) => {
                        error!("failed to refresh {key}, will retry on next tick: {e}");
                    }
                }
            }
        });

        Self {
            key,
            ttl,
            tx_terminate,
            rx_lease_expire,
            handle,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn ttl(&self) -> u64 {
        self.ttl
    }

    pub fn get_lease_expire_notify(&self) -> LeaseExpiredNotify {
        LeaseExpiredNotify {
            inner: self.rx_lease_expire.resubscribe(),
        }
    }

    ///
    /// Whether the refresh task stopped, i.e. the lease was lost.
    ///
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
