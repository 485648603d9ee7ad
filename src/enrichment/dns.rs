//! DNS resolution capability used by provider fallback chains

use async_trait::async_trait;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

/// Hostname to IPv4 addresses. Absence is an empty list, never an error:
/// callers fall back to their pre-resolution outcome when nothing comes back.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn resolve_v4(&self, host: &str) -> Vec<String>;
}

/// System resolver backed by trust-dns
pub struct SystemResolver {
    resolver: TokioAsyncResolver,
}

impl SystemResolver {
    pub fn new() -> Self {
        let resolver =
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        Self { resolver }
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve_v4(&self, host: &str) -> Vec<String> {
        match self.resolver.lookup_ip(host).await {
            Ok(response) => response
                .iter()
                .filter_map(|ip| match ip {
                    std::net::IpAddr::V4(v4) => Some(v4.to_string()),
                    std::net::IpAddr::V6(_) => None,
                })
                .collect(),
            Err(e) => {
                tracing::debug!(host, error = %e, "DNS resolution failed");
                Vec::new()
            }
        }
    }
}
