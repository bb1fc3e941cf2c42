use {serde::Deserialize, std::fmt, thiserror::Error};

///
/// Closed set of etcd v2 error kinds.
///
/// See <https://github.com/etcd-io/etcd/blob/release-2.3/Documentation/errorcode.md>.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    KeyNotFound,
    CompareFailed,
    NotAFile,
    NotADirectory,
    AlreadyExists,
    RootReadOnly,
    DirectoryNotEmpty,
    Unauthorized,
    InvalidField,
    RaftInternal,
    LeaderElection,
    WatcherCleared,
    EventIndexCleared,
    Unknown,
}

impl ErrorKind {
    pub const fn from_code(code: u32) -> Self {
        match code {
            100 => Self::KeyNotFound,
            101 => Self::CompareFailed,
            102 => Self::NotAFile,
            104 => Self::NotADirectory,
            105 => Self::AlreadyExists,
            107 => Self::RootReadOnly,
            108 => Self::DirectoryNotEmpty,
            110 => Self::Unauthorized,
            200..=210 => Self::InvalidField,
            300 => Self::RaftInternal,
            301 => Self::LeaderElection,
            400 => Self::WatcherCleared,
            401 => Self::EventIndexCleared,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::KeyNotFound => "KeyNotFound",
            Self::CompareFailed => "CompareFailed",
            Self::NotAFile => "NotAFile",
            Self::NotADirectory => "NotADirectory",
            Self::AlreadyExists => "AlreadyExists",
            Self::RootReadOnly => "RootReadOnly",
            Self::DirectoryNotEmpty => "DirectoryNotEmpty",
            Self::Unauthorized => "Unauthorized",
            Self::InvalidField => "InvalidField",
            Self::RaftInternal => "RaftInternal",
            Self::LeaderElection => "LeaderElection",
            Self::WatcherCleared => "WatcherCleared",
            Self::EventIndexCleared => "EventIndexCleared",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

///
/// An error the store itself reported in its JSON error payload.
///
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} ({code}): {message} : {}", .cause.as_deref().unwrap_or(""))]
pub struct ApiError {
    pub kind: ErrorKind,
    pub code: u32,
    pub message: String,
    pub cause: Option<String>,
    pub index: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorPayload {
    error_code: u32,
    #[serde(default)]
    message: String,
    #[serde(default)]
    cause: Option<String>,
    #[serde(default)]
    index: Option<u64>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let code = match kind {
            ErrorKind::KeyNotFound => 100,
            ErrorKind::CompareFailed => 101,
            ErrorKind::NotAFile => 102,
            ErrorKind::NotADirectory => 104,
            ErrorKind::AlreadyExists => 105,
            ErrorKind::RootReadOnly => 107,
            ErrorKind::DirectoryNotEmpty => 108,
            ErrorKind::Unauthorized => 110,
            ErrorKind::InvalidField => 200,
            ErrorKind::RaftInternal => 300,
            ErrorKind::LeaderElection => 301,
            ErrorKind::WatcherCleared => 400,
            ErrorKind::EventIndexCleared => 401,
            ErrorKind::Unknown => 0,
        };
        Self {
            kind,
            code,
            message: message.into(),
            cause: None,
            index: None,
        }
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    ///
    /// Decodes a non-2xx response body.
    ///
    /// A body that is not a well-formed error payload still produces an error, of kind [`ErrorKind::Unknown`].
    ///
    pub fn from_body(body: &[u8]) -> Self {
        match serde_json::from_slice::<ErrorPayload>(body) {
            Ok(payload) => Self {
                kind: ErrorKind::from_code(payload.error_code),
                code: payload.error_code,
                message: payload.message,
                cause: payload.cause,
                index: payload.index,
            },
            Err(_) => Self::new(ErrorKind::Unknown, "Bad response")
                .with_cause(String::from_utf8_lossy(body).into_owned()),
        }
    }
}

#[derive(Debug, Error)]
pub enum EtcdError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("connection to etcd failed: {0}")]
    ConnectionFailed(String),
    #[error("the UUID of the cluster changed from {previous} to {current}")]
    ClusterIdChanged { previous: String, current: String },
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("lock expired: {0}")]
    LockExpired(String),
    #[error("watch cancelled")]
    Cancelled,
    #[error("unable to decode server response: {0}")]
    Decode(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl EtcdError {
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Api(api) => Some(api.kind),
            _ => None,
        }
    }

    pub fn is_key_not_found(&self) -> bool {
        self.kind() == Some(ErrorKind::KeyNotFound)
    }

    pub fn is_compare_failed(&self) -> bool {
        self.kind() == Some(ErrorKind::CompareFailed)
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind() == Some(ErrorKind::AlreadyExists)
    }
}

impl From<config::ConfigError> for EtcdError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<serde_json::Error> for EtcdError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}
