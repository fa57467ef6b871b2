/// Key used to group sources by origin for per-host connection caps.
///
/// URIs are normalised down to `(scheme, host, port)`. A URI that does not
/// parse is its own group, so it never shares a cap with anything else.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostKey {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl HostKey {
    pub fn from_uri(uri: &str) -> Self {
        match url::Url::parse(uri) {
            Ok(parsed) => Self {
                scheme: parsed.scheme().to_string(),
                host: parsed.host_str().unwrap_or_default().to_ascii_lowercase(),
                port: parsed.port_or_known_default().unwrap_or(0),
            },
            Err(_) => Self {
                scheme: String::new(),
                host: uri.to_string(),
                port: 0,
            },
        }
    }
}

impl std::fmt::Display for HostKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.scheme, self.host, self.port)
    }
}
