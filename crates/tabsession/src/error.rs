use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A tab, window or graph node is absent from metadata or the graph.
    NotFound,
    /// A recovery descriptor breaks the tab/record co-occurrence rule.
    InvalidParameters,
    /// An async recovery step (fetch, hierarchy, reconstruct) failed.
    RecoveryFailure,
    /// The ancestor walk did not terminate at a root tab.
    CycleOrDanglingParent,
    /// The callout queue is running; state mutations must wait.
    Busy,
    Other,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::InvalidParameters => "invalid parameters",
            ErrorKind::RecoveryFailure => "recovery failure",
            ErrorKind::CycleOrDanglingParent => "cycle or dangling parent",
            ErrorKind::Busy => "busy",
            ErrorKind::Other => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    msg: String,
}

impl Error {
    pub fn msg<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Other, msg)
    }

    pub fn new<M: Into<String>>(kind: ErrorKind, msg: M) -> Self {
        Self {
            kind,
            msg: msg.into(),
        }
    }

    pub fn not_found<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }

    pub fn invalid_parameters<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::InvalidParameters, msg)
    }

    pub fn recovery<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::RecoveryFailure, msg)
    }

    pub fn cycle<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::CycleOrDanglingParent, msg)
    }

    pub fn busy<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Busy, msg)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.msg
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ErrorKind::Other => write!(f, "{}", self.msg),
            kind => write!(f, "{}: {}", kind.as_str(), self.msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::msg(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::msg(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::msg(err.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::msg(format!("invalid url: {err}"))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::recovery(format!("HTTP request failed: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
