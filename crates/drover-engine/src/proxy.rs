//! Proxy endpoint normalization, round-robin assignment and list files.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::warn;

use crate::error::ProxyError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProxyScheme {
    Http,
    Https,
    Socks4,
    Socks4a,
    Socks5,
    Socks5h,
}

impl ProxyScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Socks4 => "socks4",
            Self::Socks4a => "socks4a",
            Self::Socks5 => "socks5",
            Self::Socks5h => "socks5h",
        }
    }

    /// Plain socks4 cannot resolve hostnames remotely; always dial 4a instead.
    fn upgraded(self) -> Self {
        match self {
            Self::Socks4 => Self::Socks4a,
            other => other,
        }
    }
}

impl fmt::Display for ProxyScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProxyScheme {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            "socks4" => Ok(Self::Socks4),
            "socks4a" => Ok(Self::Socks4a),
            "socks5" => Ok(Self::Socks5),
            "socks5h" => Ok(Self::Socks5h),
            _ => Err(ProxyError::UnsupportedScheme(s.to_string())),
        }
    }
}

/// The proxy list types an operator may load from disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProxyListKind {
    Http,
    Socks4,
    Socks5,
}

impl ProxyListKind {
    pub fn parse(kind: &str) -> Result<Self, ProxyError> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "socks4" => Ok(Self::Socks4),
            "socks5" => Ok(Self::Socks5),
            _ => Err(ProxyError::UnknownType(kind.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        self.scheme().as_str()
    }

    pub fn scheme(self) -> ProxyScheme {
        match self {
            Self::Http => ProxyScheme::Http,
            Self::Socks4 => ProxyScheme::Socks4,
            Self::Socks5 => ProxyScheme::Socks5,
        }
    }

    /// `<dir>/<kind>.txt`
    pub fn file_in(self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.txt", self.as_str()))
    }
}

/// Normalize one endpoint: prefix `default` when no scheme is given and
/// upgrade `socks4://` to `socks4a://`.
pub fn normalize(raw: &str, default: ProxyScheme) -> Result<String, ProxyError> {
    let raw = raw.trim();
    let (scheme, rest) = match raw.split_once("://") {
        Some((scheme, rest)) => (scheme.parse::<ProxyScheme>()?, rest),
        None => (default, raw),
    };
    if rest.is_empty() {
        return Err(ProxyError::UnsupportedScheme(raw.to_string()));
    }
    Ok(format!("{}://{}", scheme.upgraded(), rest))
}

/// Normalize a list, dropping blank lines and entries that fail to parse.
pub fn normalize_all<'a>(
    entries: impl IntoIterator<Item = &'a str>,
    default: ProxyScheme,
) -> Vec<String> {
    entries
        .into_iter()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| match normalize(line, default) {
            Ok(endpoint) => Some(endpoint),
            Err(e) => {
                warn!(entry = line, error = %e, "skipping proxy entry");
                None
            }
        })
        .collect()
}

/// Read `<dir>/<kind>.txt`. An empty result is an error so the caller keeps
/// its previous list.
pub async fn load_list(dir: &Path, kind: ProxyListKind) -> Result<Vec<String>, ProxyError> {
    let path = kind.file_in(dir);
    let content = tokio::fs::read_to_string(&path)
        .await
        .map_err(|source| ProxyError::Io {
            path: path.clone(),
            source,
        })?;
    let list = normalize_all(content.lines(), kind.scheme());
    if list.is_empty() {
        return Err(ProxyError::Empty(path));
    }
    Ok(list)
}

/// Ordered endpoints, assigned round-robin by agent ordinal.
#[derive(Clone, Debug, Default)]
pub struct ProxyPool {
    endpoints: Vec<String>,
}

impl ProxyPool {
    /// Endpoints without a scheme default to socks5.
    pub fn from_list(list: &[String]) -> Self {
        Self {
            endpoints: normalize_all(list.iter().map(String::as_str), ProxyScheme::Socks5),
        }
    }

    pub fn assign(&self, ordinal: usize) -> Option<&str> {
        if self.endpoints.is_empty() {
            return None;
        }
        Some(&self.endpoints[ordinal % self.endpoints.len()])
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_and_upgrades_socks4() {
        let pool = ProxyPool::from_list(&[
            "1.2.3.4:1080".to_string(),
            "socks4://5.6.7.8:1080".to_string(),
        ]);
        assert_eq!(
            pool.endpoints(),
            &["socks5://1.2.3.4:1080", "socks4a://5.6.7.8:1080"]
        );
    }

    #[test]
    fn normalize_keeps_explicit_scheme() {
        assert_eq!(
            normalize("http://9.9.9.9:3128", ProxyScheme::Socks5).unwrap(),
            "http://9.9.9.9:3128"
        );
        assert_eq!(
            normalize("SOCKS4A://h:1", ProxyScheme::Http).unwrap(),
            "socks4a://h:1"
        );
        assert!(normalize("ftp://h:21", ProxyScheme::Http).is_err());
        assert!(normalize("socks5://", ProxyScheme::Http).is_err());
    }

    #[test]
    fn round_robin_assignment() {
        let pool = ProxyPool::from_list(&["a:1".to_string(), "b:2".to_string()]);
        assert_eq!(pool.assign(0), Some("socks5://a:1"));
        assert_eq!(pool.assign(1), Some("socks5://b:2"));
        assert_eq!(pool.assign(2), Some("socks5://a:1"));
        assert_eq!(ProxyPool::default().assign(3), None);
    }

    #[test]
    fn normalize_all_skips_blank_and_bad_lines() {
        let list = normalize_all(
            ["", "  1.1.1.1:80 ", "# comment", "gopher://x:1", "socks4://2.2.2.2:1"],
            ProxyScheme::Http,
        );
        assert_eq!(list, vec!["http://1.1.1.1:80", "socks4a://2.2.2.2:1"]);
    }

    #[test]
    fn list_kind_parsing() {
        assert_eq!(ProxyListKind::parse("SOCKS5").unwrap(), ProxyListKind::Socks5);
        assert!(matches!(
            ProxyListKind::parse("../etc/passwd"),
            Err(ProxyError::UnknownType(_))
        ));
        assert!(ProxyListKind::Http
            .file_in(Path::new("/data"))
            .ends_with("http.txt"));
    }

    #[tokio::test]
    async fn load_list_from_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("socks4.txt"), "1.2.3.4:1080\n\n5.6.7.8:1081\n").unwrap();

        let list = load_list(dir.path(), ProxyListKind::Socks4).await.unwrap();
        assert_eq!(list, vec!["socks4a://1.2.3.4:1080", "socks4a://5.6.7.8:1081"]);
    }

    #[tokio::test]
    async fn load_list_empty_or_missing_is_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("http.txt"), "\n  \n").unwrap();

        assert!(matches!(
            load_list(dir.path(), ProxyListKind::Http).await,
            Err(ProxyError::Empty(_))
        ));
        assert!(matches!(
            load_list(dir.path(), ProxyListKind::Socks5).await,
            Err(ProxyError::Io { .. })
        ));
    }
}
