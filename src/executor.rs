use {
    crate::{
        config::ClientConfig,
        error::{ApiError, EtcdError},
        transport::{HttpRequest, HttpResponse, Method, Transport, TransportError},
    },
    std::{
        sync::{Arc, Mutex, MutexGuard, PoisonError},
        time::Duration,
    },
    tracing::{debug, error, info},
};

pub const CLUSTER_ID_HEADER: &str = "x-etcd-cluster-id";

struct ServerState {
    preferred: String,
    alternates: Vec<String>,
    cluster_id: Option<String>,
    machines_loaded: bool,
}

impl ServerState {
    fn replace_alternates(&mut self, machines: Vec<String>) {
        let mut alternates: Vec<String> = Vec::with_capacity(machines.len());
        for machine in machines {
            if machine != self.preferred && !alternates.contains(&machine) {
                alternates.push(machine);
            }
        }
        self.alternates = alternates;
    }
}

///
/// Executes single requests against a multi-node cluster.
///
/// The executor keeps a preferred server and a cache of alternate members. When the preferred server is unreachable
/// and reconnection is allowed, it pops an alternate, retries there and, once a response arrives, refreshes the
/// alternate cache from the cluster's member list.
///
/// Every response carrying a cluster identity header is checked against the pinned identity. A mismatch fails the call
/// with [`EtcdError::ClusterIdChanged`] exactly once: the new identity is pinned before the error is returned.
///
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    version_prefix: String,
    read_timeout: Option<Duration>,
    allow_reconnect: bool,
    use_proxies: bool,
    state: Mutex<ServerState>,
}

impl RequestExecutor {
    pub fn new(config: &ClientConfig, transport: Arc<dyn Transport>) -> Result<Self, EtcdError> {
        config.validate()?;
        let mut uris = config.server_uris();
        let preferred = uris.remove(0);
        let mut state = ServerState {
            preferred,
            alternates: vec![],
            cluster_id: config.expected_cluster_id.clone(),
            // Without proxies the real member list is fetched before the first request.
            machines_loaded: !config.allow_reconnect || config.use_proxies,
        };
        state.replace_alternates(uris);
        debug!(
            "request executor initialised on {} with alternates {:?}",
            state.preferred, state.alternates
        );
        Ok(Self {
            transport,
            version_prefix: config.version_prefix.clone(),
            read_timeout: config.read_timeout(),
            allow_reconnect: config.allow_reconnect,
            use_proxies: config.use_proxies,
            state: Mutex::new(state),
        })
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn version_prefix(&self) -> &str {
        &self.version_prefix
    }

    pub fn base_uri(&self) -> String {
        self.state().preferred.clone()
    }

    pub fn alternate_servers(&self) -> Vec<String> {
        self.state().alternates.clone()
    }

    pub fn cluster_id(&self) -> Option<String> {
        self.state().cluster_id.clone()
    }

    fn next_server(&self) -> Result<String, EtcdError> {
        let mut state = self.state();
        match state.alternates.pop() {
            Some(machine) => {
                info!("selected new etcd server {machine}");
                state.preferred = machine.clone();
                Ok(machine)
            }
            None => {
                error!("machines cache is empty, no machines to try");
                Err(EtcdError::ConnectionFailed(
                    "no more machines in the cluster".to_string(),
                ))
            }
        }
    }

    fn check_cluster_id(&self, response: &HttpResponse) -> Result<(), EtcdError> {
        let Some(current) = response.header(CLUSTER_ID_HEADER) else {
            return Ok(());
        };
        let mut state = self.state();
        let previous = state.cluster_id.replace(current.to_string());
        match previous {
            Some(previous) if previous != current => Err(EtcdError::ClusterIdChanged {
                previous,
                current: current.to_string(),
            }),
            _ => Ok(()),
        }
    }

    ///
    /// Members of the cluster as advertised by the current server.
    ///
    /// This bypasses [`RequestExecutor::execute`] so it can be called while a failover is in progress.
    /// Unreachable servers are skipped in favour of the next alternate.
    ///
    pub async fn machines(&self) -> Result<Vec<String>, EtcdError> {
        loop {
            let base = self.base_uri();
            let request = HttpRequest {
                method: Method::Get,
                url: format!("{base}{}/machines", self.version_prefix),
                params: vec![],
                timeout: self.read_timeout,
            };
            match self.transport.send(request).await {
                Ok(response) => {
                    let response = handle_server_response(response)?;
                    let body = String::from_utf8_lossy(&response.body);
                    let machines: Vec<String> = body
                        .split(',')
                        .map(str::trim)
                        .filter(|m| !m.is_empty())
                        .map(str::to_string)
                        .collect();
                    debug!("retrieved list of machines: {machines:?}");
                    return Ok(machines);
                }
                Err(TransportError::Unreachable(e)) => {
                    error!("failed to get list of machines from {base}: {e}");
                    if self.next_server().is_err() {
                        return Err(EtcdError::ConnectionFailed(
                            "could not get the list of servers, maybe you provided the wrong host(s) to connect to?"
                                .to_string(),
                        ));
                    }
                }
                Err(TransportError::Other(e)) => return Err(EtcdError::Transport(e)),
            }
        }
    }

    async fn update_machines(&self) -> Result<(), EtcdError> {
        let machines = self.machines().await?;
        let mut state = self.state();
        state.replace_alternates(machines);
        state.machines_loaded = true;
        Ok(())
    }

    ///
    /// Executes one request.
    ///
    /// `timeout` of `None` uses the configured read timeout, `Some(Duration::ZERO)` disables it.
    /// Only successful (200/201) responses are returned, every other status is decoded into an [`EtcdError::Api`].
    ///
    pub async fn execute(
        &self,
        path: &str,
        method: Method,
        params: Vec<(String, String)>,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse, EtcdError> {
        if !path.starts_with('/') {
            return Err(EtcdError::InvalidRequest(format!(
                "path does not start with /: {path}"
            )));
        }
        let needs_machines = !self.state().machines_loaded;
        if needs_machines {
            self.update_machines().await?;
        }
        let timeout = match timeout {
            Some(t) if t.is_zero() => None,
            Some(t) => Some(t),
            None => self.read_timeout,
        };

        let mut failed_over = false;
        let response = loop {
            let base = self.base_uri();
            let request = HttpRequest {
                method,
                url: format!("{base}{path}"),
                params: params.clone(),
                timeout,
            };
            match self.transport.send(request).await {
                Ok(response) => break response,
                Err(TransportError::Unreachable(e)) => {
                    error!("request to server {base} failed: {e}");
                    if !self.allow_reconnect {
                        debug!("reconnection disabled, giving up");
                        return Err(EtcdError::ConnectionFailed(format!(
                            "connection to etcd failed due to {e}"
                        )));
                    }
                    info!("reconnection allowed, looking for another server");
                    self.next_server()?;
                    failed_over = true;
                }
                Err(TransportError::Other(e)) => {
                    error!("unexpected request failure on {base}: {e}");
                    return Err(EtcdError::Transport(e));
                }
            }
        };

        self.check_cluster_id(&response)?;

        if failed_over {
            if self.use_proxies {
                let mut state = self.state();
                let preferred = state.preferred.clone();
                state.alternates.retain(|m| *m != preferred);
            } else {
                // The cluster may have changed since the member list was last fetched.
                let machines = self.machines().await?;
                self.state().replace_alternates(machines);
            }
        }
        handle_server_response(response)
    }
}

fn handle_server_response(response: HttpResponse) -> Result<HttpResponse, EtcdError> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(ApiError::from_body(&response.body).into())
    }
}
