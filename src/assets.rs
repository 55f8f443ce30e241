use crate::config::Config;
use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use mime::Mime;
use reqwest::{StatusCode, header};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::lookup_host;
use tracing::debug;
use url::{Host, Url};

/// Single-attempt HTTP fetcher for the remote images a card is built from.
#[derive(Clone)]
pub struct AssetFetcher {
    client: reqwest::Client,
    fetch_timeout: Duration,
    max_bytes: usize,
    allow_http: bool,
    allow_private_networks: bool,
}

/// A validated URL plus, for domain hosts, the public addresses the request
/// must be pinned to.
struct ResolvedUrl {
    parsed: Url,
    pinned: Option<(String, Vec<SocketAddr>)>,
}

#[derive(Debug, Error)]
pub enum AssetFetchError {
    #[error("invalid asset uri")]
    InvalidUri,
    #[error("asset fetch blocked")]
    Blocked,
    #[error("asset fetch timed out from {url}")]
    Timeout { url: String },
    #[error("asset fetch failed from {url}")]
    Network { url: String },
    #[error("asset fetch failed from {url}: {status}")]
    NonSuccessStatus { status: StatusCode, url: String },
    #[error("asset too large")]
    TooLarge,
    #[error("asset from {url} is {content_type}, not an image")]
    NotAnImage { content_type: String, url: String },
}

impl AssetFetchError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidUri => "invalid_uri",
            Self::Blocked => "blocked",
            Self::Timeout { .. } => "timeout",
            Self::Network { .. } => "network",
            Self::NonSuccessStatus { .. } => "status",
            Self::TooLarge => "too_large",
            Self::NotAnImage { .. } => "content_type",
        }
    }
}

/// Outcome of the concurrent feature/logo fetch. Each side fails independently.
#[derive(Debug)]
pub struct FetchedAssets {
    pub feature: Option<Result<Bytes, AssetFetchError>>,
    pub logo: Result<Bytes, AssetFetchError>,
    pub elapsed: Duration,
}

impl AssetFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let client = client_builder(config.fetch_timeout, config.allow_private_networks)
            .build()
            .context("build reqwest client")?;
        Ok(Self {
            client,
            fetch_timeout: config.fetch_timeout,
            max_bytes: config.max_asset_bytes,
            allow_http: config.allow_http,
            allow_private_networks: config.allow_private_networks,
        })
    }

    pub async fn fetch(&self, url: &str) -> Result<Bytes, AssetFetchError> {
        let resolved = self.validate_url(url).await?;
        let client = match &resolved.pinned {
            Some((host, addrs)) => self.client_with_resolve(host, addrs, url)?,
            None => self.client.clone(),
        };
        let mut response = client
            .get(resolved.parsed)
            .send()
            .await
            .map_err(|err| classify_reqwest_error(&err, url))?;
        if !response.status().is_success() {
            return Err(AssetFetchError::NonSuccessStatus {
                status: response.status(),
                url: url.to_string(),
            });
        }
        if let Some(length) = response.content_length() {
            if length > self.max_bytes as u64 {
                return Err(AssetFetchError::TooLarge);
            }
        }
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<Mime>().ok());
        if let Some(parsed) = content_type.as_ref() {
            if parsed.type_() == mime::TEXT {
                return Err(AssetFetchError::NotAnImage {
                    content_type: parsed.essence_str().to_string(),
                    url: url.to_string(),
                });
            }
        }
        let mut buffer = BytesMut::with_capacity(std::cmp::min(self.max_bytes, 64 * 1024));
        let mut total = 0usize;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|err| classify_reqwest_error(&err, url))?
        {
            total = total.saturating_add(chunk.len());
            if total > self.max_bytes {
                return Err(AssetFetchError::TooLarge);
            }
            buffer.extend_from_slice(&chunk);
        }
        debug!(
            url = %url,
            size = total,
            content_type = content_type.as_ref().map(|parsed| parsed.essence_str()),
            "fetched asset"
        );
        Ok(buffer.freeze())
    }

    /// Fetches the feature image (when the article has one) and the logo
    /// concurrently; neither waits on the other's result.
    pub async fn fetch_pair(&self, feature_url: Option<&str>, logo_url: &str) -> FetchedAssets {
        let started = Instant::now();
        let feature = async {
            match feature_url {
                Some(url) => Some(self.fetch(url).await),
                None => None,
            }
        };
        let (feature, logo) = tokio::join!(feature, self.fetch(logo_url));
        FetchedAssets {
            feature,
            logo,
            elapsed: started.elapsed(),
        }
    }

    async fn validate_url(&self, url: &str) -> Result<ResolvedUrl, AssetFetchError> {
        let parsed = Url::parse(url).map_err(|_| AssetFetchError::InvalidUri)?;
        match parsed.scheme() {
            "https" => {}
            "http" if self.allow_http => {}
            "http" => return Err(AssetFetchError::Blocked),
            _ => return Err(AssetFetchError::InvalidUri),
        }
        let pinned = self.resolve_public_host(&parsed).await?;
        Ok(ResolvedUrl { parsed, pinned })
    }

    /// Rejects loopback, private and link-local targets unless private
    /// networks are allowed. Domain hosts resolve to their public addresses.
    async fn resolve_public_host(
        &self,
        url: &Url,
    ) -> Result<Option<(String, Vec<SocketAddr>)>, AssetFetchError> {
        let host = match url.host() {
            Some(host) => host,
            None => return Err(AssetFetchError::InvalidUri),
        };
        if self.allow_private_networks {
            return Ok(None);
        }
        let domain = match host {
            Host::Ipv4(addr) if is_private_ip(IpAddr::V4(addr)) => {
                return Err(AssetFetchError::Blocked);
            }
            Host::Ipv6(addr) if is_private_ip(IpAddr::V6(addr)) => {
                return Err(AssetFetchError::Blocked);
            }
            Host::Ipv4(_) | Host::Ipv6(_) => return Ok(None),
            Host::Domain(domain) => domain.trim_end_matches('.'),
        };
        if domain.eq_ignore_ascii_case("localhost") || domain.ends_with(".localhost") {
            return Err(AssetFetchError::Blocked);
        }
        let port = url.port_or_known_default().unwrap_or(443);
        let mut addrs: Vec<SocketAddr> = lookup_host((domain, port))
            .await
            .map_err(|_| AssetFetchError::Network {
                url: url.as_str().to_string(),
            })?
            .collect();
        addrs.retain(|addr| !is_private_ip(addr.ip()));
        if addrs.is_empty() {
            return Err(AssetFetchError::Blocked);
        }
        Ok(Some((domain.to_string(), addrs)))
    }

    fn client_with_resolve(
        &self,
        host: &str,
        addrs: &[SocketAddr],
        url: &str,
    ) -> Result<reqwest::Client, AssetFetchError> {
        client_builder(self.fetch_timeout, false)
            .resolve_to_addrs(host, addrs)
            .build()
            .map_err(|_| AssetFetchError::Network {
                url: url.to_string(),
            })
    }
}

// Redirects are only followed when private targets are allowed; a redirect
// would otherwise skip the address check.
fn client_builder(timeout: Duration, follow_redirects: bool) -> reqwest::ClientBuilder {
    let redirect = if follow_redirects {
        reqwest::redirect::Policy::limited(3)
    } else {
        reqwest::redirect::Policy::none()
    };
    reqwest::Client::builder()
        .timeout(timeout)
        .redirect(redirect)
        .user_agent(concat!("og-renderer/", env!("CARGO_PKG_VERSION")))
}

fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => is_private_v4(addr),
        IpAddr::V6(addr) => {
            if addr.is_loopback() || addr.is_unspecified() {
                return true;
            }
            if let Some(v4) = addr.to_ipv4() {
                return is_private_v4(v4);
            }
            addr.is_unicast_link_local()
                || addr.is_unique_local()
                || addr.is_multicast()
        }
    }
}

fn is_private_v4(addr: Ipv4Addr) -> bool {
    let [a, b, _, _] = addr.octets();
    addr.is_private()
        || addr.is_loopback()
        || addr.is_link_local()
        || addr.is_broadcast()
        || addr.is_multicast()
        || a == 0
        || (a == 100 && (b & 0b1100_0000) == 0b0100_0000)
}

fn classify_reqwest_error(err: &reqwest::Error, url: &str) -> AssetFetchError {
    if err.is_timeout() {
        AssetFetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        AssetFetchError::Network {
            url: url.to_string(),
        }
    }
}
