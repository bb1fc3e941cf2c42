use {
    crate::error::EtcdError,
    config::{Config, Environment, File},
    serde::Deserialize,
    std::time::Duration,
};

///
/// Connection settings for [`crate::client::Client`].
///
/// Settings can be built in code with the `with_*` methods or loaded with [`ClientConfig::load`].
///
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// `host:port` pairs. The first one is the preferred server.
    pub hosts: Vec<String>,
    pub protocol: String,
    pub version_prefix: String,
    /// Seconds to wait for a response, `0` disables the timeout.
    pub read_timeout: u64,
    pub allow_redirect: bool,
    /// Fail over to another cluster member when the current one does not respond.
    pub allow_reconnect: bool,
    /// `hosts` are proxies: never replace them with the cluster's advertised member list.
    pub use_proxies: bool,
    /// Pin the cluster identity up front instead of learning it from the first response.
    pub expected_cluster_id: Option<String>,
    pub per_host_pool_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hosts: vec!["127.0.0.1:4001".to_string()],
            protocol: "http".to_string(),
            version_prefix: "/v2".to_string(),
            read_timeout: 60,
            allow_redirect: true,
            allow_reconnect: false,
            use_proxies: false,
            expected_cluster_id: None,
            per_host_pool_size: 10,
        }
    }
}

impl ClientConfig {
    ///
    /// Loads the configuration from, by increasing priority:
    ///     - the defaults
    ///     - the optional TOML file at `path`
    ///     - `ETCD_*` environment variables (e.g. `ETCD_ALLOW_RECONNECT=true`, `ETCD_HOSTS=a:1,b:2`)
    ///
    pub fn load(path: Option<&str>) -> Result<Self, EtcdError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(true));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix("ETCD")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("hosts"),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn with_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    pub fn with_version_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.version_prefix = prefix.into();
        self
    }

    pub fn with_read_timeout(mut self, secs: u64) -> Self {
        self.read_timeout = secs;
        self
    }

    pub fn with_allow_reconnect(mut self, allow: bool) -> Self {
        self.allow_reconnect = allow;
        self
    }

    pub fn with_use_proxies(mut self, use_proxies: bool) -> Self {
        self.use_proxies = use_proxies;
        self
    }

    pub fn with_expected_cluster_id(mut self, id: impl Into<String>) -> Self {
        self.expected_cluster_id = Some(id.into());
        self
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout > 0).then(|| Duration::from_secs(self.read_timeout))
    }

    ///
    /// Server URIs in configuration order, e.g. `http://127.0.0.1:4001`.
    ///
    pub fn server_uris(&self) -> Vec<String> {
        self.hosts
            .iter()
            .map(|host| format!("{}://{}", self.protocol, host.trim_end_matches('/')))
            .collect()
    }

    pub fn validate(&self) -> Result<(), EtcdError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(EtcdError::Config(format!(
                "unsupported protocol {}",
                self.protocol
            )));
        }
        if self.hosts.is_empty() {
            return Err(EtcdError::Config("no host to connect to".to_string()));
        }
        if self.hosts.len() > 1 && !self.allow_reconnect {
            return Err(EtcdError::Config(
                "a list of hosts to connect to was given, but reconnection not allowed".to_string(),
            ));
        }
        Ok(())
    }
}
