use {
    crate::{
        error::EtcdError,
        kv::{KvStore, WatchOptions},
        result::EtcdResult,
        retry::{is_transient, unbounded_backoff, MAX_RETRY_DELAY},
    },
    futures::Stream,
    std::{
        pin::Pin,
        task::{Context, Poll},
    },
    tokio::{sync::{mpsc, oneshot}, task::JoinHandle},
    tokio_stream::{wrappers::ReceiverStream, StreamExt},
    tracing::{debug, error, warn},
};

///
/// An endless sequence of mutations of a key (or of a subtree, when recursive).
///
/// Each event moves the watch index to `modified_index + 1`, so no mutation is skipped between two pulls.
/// Transient failures are retried in the background; a fatal error (e.g. the requested index was compacted away)
/// is delivered once and ends the stream.
///
/// Cancelling the subscription aborts the in-flight watch request and ends the stream with [`EtcdError::Cancelled`].
/// Dropping it stops the background task.
///
/// ```no_run
/// use rust_etcd_v2_utils::{client::Client, config::ClientConfig, kv::WatchOptions, watcher::Subscription};
///
/// # async fn run() -> Result<(), rust_etcd_v2_utils::error::EtcdError> {
/// let client = Client::new(ClientConfig::default())?;
/// let mut subscription = Subscription::spawn(client, "/config", WatchOptions::new().with_recursive());
/// while let Some(event) = subscription.recv().await {
///     let event = event?;
///     println!("{} is now {:?}", event.key(), event.value());
/// }
/// # Ok(())
/// # }
/// ```
///
pub struct Subscription {
    rx: ReceiverStream<Result<EtcdResult, EtcdError>>,
    tx_cancel: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn spawn<S>(store: S, key: impl Into<String>, opts: WatchOptions) -> Self
    where
        S: KvStore + 'static,
    {
        let key: String = key.into();
        // A single slot: the pump is at most one event ahead of the consumer.
        let (tx, rx) = mpsc::channel(1);
        let (tx_cancel, mut rx_cancel) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let mut opts = opts;
            let mut backoff = unbounded_backoff();
            loop {
                let result = tokio::select! {
                    _ = &mut rx_cancel => break,
                    result = store.watch(&key, opts.clone()) => result,
                };
                let event = match result {
                    Ok(event) => {
                        opts.wait_index = Some(event.modified_index() + 1);
                        backoff = unbounded_backoff();
                        Ok(event)
                    }
                    Err(e) if is_transient(&e) => {
                        warn!("watch on {key} failed, retrying: {e}");
                        let delay = backoff.next().unwrap_or(MAX_RETRY_DELAY);
                        tokio::select! {
                            _ = &mut rx_cancel => break,
                            _ = tokio::time::sleep(delay) => continue,
                        }
                    }
                    Err(e) => {
                        error!("watch on {key} failed: {e}");
                        Err(e)
                    }
                };
                let fatal = event.is_err();
                tokio::select! {
                    _ = &mut rx_cancel => break,
                    sent = tx.send(event) => {
                        if sent.is_err() {
                            warn!("closed watch event receiver for {key}");
                            return;
                        }
                    }
                }
                if fatal {
                    return;
                }
            }
            debug!("subscription on {key} cancelled");
            let _ = tx.send(Err(EtcdError::Cancelled)).await;
        });
        Self {
            rx: ReceiverStream::new(rx),
            tx_cancel: Some(tx_cancel),
            handle,
        }
    }

    ///
    /// Waits for the next mutation. Returns `None` once the subscription ended.
    ///
    pub async fn recv(&mut self) -> Option<Result<EtcdResult, EtcdError>> {
        self.rx.next().await
    }

    ///
    /// Stops the subscription. An event already buffered is still delivered, followed by [`EtcdError::Cancelled`].
    ///
    pub fn cancel(&mut self) {
        if let Some(tx_cancel) = self.tx_cancel.take() {
            let _ = tx_cancel.send(());
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl Stream for Subscription {
    type Item = Result<EtcdResult, EtcdError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_next(cx)
    }
}
