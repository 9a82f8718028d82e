use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("unknown proxy type: {0} (expected http, socks4 or socks5)")]
    UnknownType(String),

    #[error("unsupported proxy scheme in {0}")]
    UnsupportedScheme(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("proxy file {0} has no usable entries")]
    Empty(PathBuf),
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ScriptError {
    #[error("script not found: {0}")]
    NotFound(String),

    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("script has no instructions")]
    Empty,

    #[error("script exceeds {max} steps")]
    TooLong { max: usize },

    #[error("script name must not be empty")]
    InvalidName,
}

impl ScriptError {
    /// 1-based line the error refers to, 0 when not line-specific.
    pub fn line(&self) -> usize {
        match self {
            Self::Parse { line, .. } => *line,
            _ => 0,
        }
    }
}
