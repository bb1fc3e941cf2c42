use {
    crate::{
        config::ClientConfig,
        error::EtcdError,
        executor::RequestExecutor,
        kv::{DeleteOptions, KvStore, ReadOptions, WatchOptions, WriteOptions},
        result::{EtcdResult, Node},
        transport::{HttpResponse, Method, ReqwestTransport, Transport},
    },
    serde::Deserialize,
    std::{collections::HashMap, sync::Arc, time::Duration},
    tracing::debug,
};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Member {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "peerURLs", default)]
    pub peer_urls: Vec<String>,
    #[serde(rename = "clientURLs", default)]
    pub client_urls: Vec<String>,
}

#[derive(Deserialize)]
struct MembersResponse {
    members: Vec<Member>,
}

#[derive(Deserialize)]
struct LeaderStats {
    leader: String,
}

fn flag(value: bool) -> String {
    let s = if value { "true" } else { "false" };
    s.to_string()
}

fn sanitize_key(key: &str) -> String {
    if key.starts_with('/') {
        key.to_string()
    } else {
        format!("/{key}")
    }
}

fn header_u64(response: &HttpResponse, name: &str) -> u64 {
    response
        .header(name)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

///
/// etcd v2 HTTP client.
///
/// Cloning is cheap: clones share the same connection pool and server state.
///
/// ```no_run
/// use rust_etcd_v2_utils::{client::Client, config::ClientConfig, kv::WriteOptions};
///
/// # async fn run() -> Result<(), rust_etcd_v2_utils::error::EtcdError> {
/// let config = ClientConfig::default()
///     .with_hosts(["127.0.0.1:2379", "127.0.0.1:22379", "127.0.0.1:32379"])
///     .with_allow_reconnect(true);
/// let client = Client::new(config)?;
/// client.write("/foo", "bar", WriteOptions::new().with_ttl(60)).await?;
/// assert_eq!(client.get("/foo").await?.value(), Some("bar"));
/// # Ok(())
/// # }
/// ```
///
#[derive(Clone)]
pub struct Client {
    executor: Arc<RequestExecutor>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self, EtcdError> {
        let transport = ReqwestTransport::new(&config)?;
        Self::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, EtcdError> {
        debug!("new etcd client created for {:?}", config.hosts);
        let executor = RequestExecutor::new(&config, transport)?;
        Ok(Self {
            executor: Arc::new(executor),
        })
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    pub fn base_uri(&self) -> String {
        self.executor.base_uri()
    }

    pub fn key_endpoint(&self) -> String {
        format!("{}/keys", self.executor.version_prefix())
    }

    fn result_from_response(response: HttpResponse) -> Result<EtcdResult, EtcdError> {
        let mut result = EtcdResult::from_json(&response.body)?;
        result.new_key = response.status == 201;
        result.etcd_index = header_u64(&response, "x-etcd-index");
        result.raft_index = header_u64(&response, "x-raft-index");
        result.raft_term = header_u64(&response, "x-raft-term");
        Ok(result)
    }

    async fn keys_request(
        &self,
        key: &str,
        method: Method,
        params: Vec<(String, String)>,
        timeout: Option<Duration>,
    ) -> Result<EtcdResult, EtcdError> {
        let path = format!("{}{}", self.key_endpoint(), sanitize_key(key));
        let response = self.executor.execute(&path, method, params, timeout).await?;
        Self::result_from_response(response)
    }

    pub async fn read(&self, key: &str, opts: ReadOptions) -> Result<EtcdResult, EtcdError> {
        debug!("issuing read for key {key} with {opts:?}");
        let mut params = vec![];
        if opts.recursive {
            params.push(("recursive".to_string(), flag(true)));
        }
        if opts.sorted {
            params.push(("sorted".to_string(), flag(true)));
        }
        if opts.quorum {
            params.push(("quorum".to_string(), flag(true)));
        }
        self.keys_request(key, Method::Get, params, None).await
    }

    pub async fn get(&self, key: &str) -> Result<EtcdResult, EtcdError> {
        self.read(key, ReadOptions::default()).await
    }

    pub async fn contains(&self, key: &str) -> Result<bool, EtcdError> {
        match self.get(key).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_key_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    ///
    /// Writes the value of a key, possibly as an atomic compare-and-swap.
    ///
    pub async fn write(
        &self,
        key: &str,
        value: &str,
        opts: WriteOptions,
    ) -> Result<EtcdResult, EtcdError> {
        debug!(
            "writing to key {key} ttl={:?} dir={} append={}",
            opts.ttl, opts.dir, opts.append
        );
        let mut params = vec![];
        if opts.dir {
            if !value.is_empty() {
                return Err(EtcdError::InvalidRequest(
                    "cannot create a directory with a value".to_string(),
                ));
            }
            params.push(("dir".to_string(), flag(true)));
        } else {
            params.push(("value".to_string(), value.to_string()));
        }
        if let Some(ttl) = opts.ttl {
            params.push(("ttl".to_string(), ttl.to_string()));
        }
        if let Some(prev_value) = opts.prev_value {
            params.push(("prevValue".to_string(), prev_value));
        }
        if let Some(prev_index) = opts.prev_index {
            params.push(("prevIndex".to_string(), prev_index.to_string()));
        }
        if let Some(prev_exist) = opts.prev_exist {
            params.push(("prevExist".to_string(), flag(prev_exist)));
        }
        let method = if opts.append { Method::Post } else { Method::Put };
        self.keys_request(key, method, params, None).await
    }

    pub async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<u64>,
    ) -> Result<EtcdResult, EtcdError> {
        let opts = WriteOptions {
            ttl,
            ..Default::default()
        };
        self.write(key, value, opts).await
    }

    ///
    /// Sets `key` to `value` only if its current value is `prev_value`, failing with `CompareFailed` otherwise.
    ///
    pub async fn test_and_set(
        &self,
        key: &str,
        value: &str,
        prev_value: &str,
        ttl: Option<u64>,
    ) -> Result<EtcdResult, EtcdError> {
        let opts = WriteOptions {
            ttl,
            prev_value: Some(prev_value.to_string()),
            ..Default::default()
        };
        self.write(key, value, opts).await
    }

    ///
    /// Writes back a node previously read, failing if it was modified in between.
    ///
    pub async fn update(&self, node: &Node) -> Result<EtcdResult, EtcdError> {
        debug!("updating {} to {:?}", node.key, node.value);
        let mut opts = WriteOptions::new().with_prev_exist(true);
        opts.dir = node.dir;
        opts.ttl = node.ttl.and_then(|ttl| u64::try_from(ttl).ok());
        if !node.dir {
            // prevIndex on a directory is a NotAFile error.
            opts.prev_index = Some(node.modified_index);
        }
        self.write(&node.key, node.value.as_deref().unwrap_or(""), opts)
            .await
    }

    pub async fn delete(&self, key: &str, opts: DeleteOptions) -> Result<EtcdResult, EtcdError> {
        debug!("deleting {key} with {opts:?}");
        let mut params = vec![];
        if opts.recursive {
            params.push(("recursive".to_string(), flag(true)));
        }
        if opts.dir {
            params.push(("dir".to_string(), flag(true)));
        }
        if let Some(prev_value) = opts.prev_value {
            params.push(("prevValue".to_string(), prev_value));
        }
        if let Some(prev_index) = opts.prev_index {
            params.push(("prevIndex".to_string(), prev_index.to_string()));
        }
        self.keys_request(key, Method::Delete, params, None).await
    }

    ///
    /// Deletes `key` and returns the node as it was before deletion.
    ///
    pub async fn pop(&self, key: &str, opts: DeleteOptions) -> Result<Option<Node>, EtcdError> {
        Ok(self.delete(key, opts).await?.prev_node)
    }

    ///
    /// Long-polls `key` until its next mutation. The request has no read timeout.
    ///
    pub async fn watch(&self, key: &str, opts: WatchOptions) -> Result<EtcdResult, EtcdError> {
        debug!("about to wait on key {key}, index {:?}", opts.wait_index);
        let mut params = vec![("wait".to_string(), flag(true))];
        if let Some(index) = opts.wait_index {
            params.push(("waitIndex".to_string(), index.to_string()));
        }
        if opts.recursive {
            params.push(("recursive".to_string(), flag(true)));
        }
        self.keys_request(key, Method::Get, params, Some(Duration::ZERO))
            .await
    }

    pub async fn machines(&self) -> Result<Vec<String>, EtcdError> {
        self.executor.machines().await
    }

    pub async fn members(&self) -> Result<HashMap<String, Member>, EtcdError> {
        let path = format!("{}/members", self.executor.version_prefix());
        let response = self.executor.execute(&path, Method::Get, vec![], None).await?;
        let members: MembersResponse = serde_json::from_slice(&response.body)?;
        Ok(members
            .members
            .into_iter()
            .map(|m| (m.id.clone(), m))
            .collect())
    }

    pub async fn leader(&self) -> Result<Member, EtcdError> {
        let stats: LeaderStats = serde_json::from_value(self.stats_of("leader").await?)?;
        self.members()
            .await?
            .remove(&stats.leader)
            .ok_or_else(|| EtcdError::Decode(format!("unknown leader id {}", stats.leader)))
    }

    pub async fn stats(&self) -> Result<serde_json::Value, EtcdError> {
        self.stats_of("self").await
    }

    pub async fn leader_stats(&self) -> Result<serde_json::Value, EtcdError> {
        self.stats_of("leader").await
    }

    pub async fn store_stats(&self) -> Result<serde_json::Value, EtcdError> {
        self.stats_of("store").await
    }

    async fn stats_of(&self, what: &str) -> Result<serde_json::Value, EtcdError> {
        let path = format!("{}/stats/{what}", self.executor.version_prefix());
        let response = self.executor.execute(&path, Method::Get, vec![], None).await?;
        serde_json::from_slice(&response.body)
            .map_err(|e| EtcdError::Decode(format!("cannot parse json data in the response: {e}")))
    }
}

#[async_trait::async_trait]
impl KvStore for Client {
    async fn get(&self, key: &str, opts: ReadOptions) -> Result<EtcdResult, EtcdError> {
        self.read(key, opts).await
    }

    async fn write(
        &self,
        key: &str,
        value: &str,
        opts: WriteOptions,
    ) -> Result<EtcdResult, EtcdError> {
        Client::write(self, key, value, opts).await
    }

    async fn delete(&self, key: &str, opts: DeleteOptions) -> Result<EtcdResult, EtcdError> {
        Client::delete(self, key, opts).await
    }

    async fn watch(&self, key: &str, opts: WatchOptions) -> Result<EtcdResult, EtcdError> {
        Client::watch(self, key, opts).await
    }
}
