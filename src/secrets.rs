//! Per-URL HTTP secrets.
//!
//! The host's secret manager is an external collaborator; operators only
//! consume it through [`SecretProvider`]. A matched secret can contribute a
//! bearer token, extra request headers, and a proxy override for the
//! request being built.

use std::collections::HashMap;

/// Secret material scoped to a URL prefix.
#[derive(Debug, Clone, Default)]
pub struct HttpSecret {
    /// Folded into an `Authorization: Bearer …` header.
    pub bearer_token: Option<String>,
    /// Merged into request headers (request-level values win).
    pub extra_http_headers: HashMap<String, String>,
    /// Proxy override for matching URLs.
    pub http_proxy: Option<String>,
    pub http_proxy_username: Option<String>,
    pub http_proxy_password: Option<String>,
}

pub trait SecretProvider: Send + Sync {
    /// Return the secret whose scope matches `url`, if any.
    fn lookup(&self, url: &str) -> Option<HttpSecret>;
}

/// Provider that never matches. The default for operators constructed
/// without a secret source.
#[derive(Debug, Default)]
pub struct NoSecrets;

impl SecretProvider for NoSecrets {
    fn lookup(&self, _url: &str) -> Option<HttpSecret> {
        None
    }
}

/// In-memory provider matching the longest registered URL prefix.
#[derive(Debug, Default)]
pub struct StaticSecrets {
    scopes: Vec<(String, HttpSecret)>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, scope: impl Into<String>, secret: HttpSecret) {
        self.scopes.push((scope.into(), secret));
    }
}

impl SecretProvider for StaticSecrets {
    fn lookup(&self, url: &str) -> Option<HttpSecret> {
        self.scopes
            .iter()
            .filter(|(scope, _)| url.starts_with(scope.as_str()))
            .max_by_key(|(scope, _)| scope.len())
            .map(|(_, secret)| secret.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_prefix_wins() {
        let mut secrets = StaticSecrets::new();
        let mut a = HttpSecret::default();
        a.bearer_token = Some("broad".into());
        let mut b = HttpSecret::default();
        b.bearer_token = Some("narrow".into());
        secrets.add("https://api.example.com/", a);
        secrets.add("https://api.example.com/v2/", b);

        let hit = secrets.lookup("https://api.example.com/v2/items").unwrap();
        assert_eq!(hit.bearer_token.as_deref(), Some("narrow"));

        let hit = secrets.lookup("https://api.example.com/v1/items").unwrap();
        assert_eq!(hit.bearer_token.as_deref(), Some("broad"));

        assert!(secrets.lookup("https://other.example.com/").is_none());
    }
}
