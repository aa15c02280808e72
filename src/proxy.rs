//! Network identity management via the Tor control protocol
//!
//! [`TorRotator`] asks a local Tor daemon for a fresh circuit (`SIGNAL
//! NEWNYM`) over its control port and verifies the new exit address through
//! the SOCKS proxy. [`NoProxyRotator`] is the direct-connection stand-in used
//! when the proxy is disabled.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::config::ProxyConfig;
use crate::error::{Error, Result};

/// How long a looked-up exit address stays fresh before re-querying
const IDENTITY_CACHE_TTL: Duration = Duration::from_secs(60);

/// How many NEWNYM round-trips to attempt before giving up
const ROTATE_ATTEMPTS: u32 = 3;

const IDENTITY_PROBE_URL: &str = "https://api.ipify.org";

/// Seam for swapping out identity management in tests and direct-connection
/// deployments.
#[async_trait]
pub trait IdentityRotator: Send + Sync {
    /// The public address current traffic exits from, if determinable.
    async fn current_identity(&self) -> Option<IpAddr>;

    /// Acquire a fresh network identity. Returns the new exit address when
    /// the rotation can be verified.
    async fn rotate(&self) -> Result<Option<IpAddr>>;

    /// Whether traffic is actually being proxied right now.
    async fn is_active(&self) -> bool;
}

#[derive(Debug, Default)]
struct IdentityCache {
    address: Option<IpAddr>,
    looked_up: Option<Instant>,
}

/// Rotates circuits through a local Tor daemon.
#[derive(Debug)]
pub struct TorRotator {
    config: ProxyConfig,
    proxied_client: reqwest::Client,
    direct_client: reqwest::Client,
    cache: Mutex<IdentityCache>,
}

impl TorRotator {
    /// Build a rotator from proxy configuration.
    ///
    /// Fails if the SOCKS URL is not something reqwest can parse as a proxy.
    pub fn new(config: ProxyConfig) -> Result<Self> {
        let proxy = reqwest::Proxy::all(&config.socks_url).map_err(|source| Error::Config {
            message: format!("invalid SOCKS proxy URL: {source}"),
            key: Some("proxy.socks_url".to_string()),
        })?;
        let proxied_client = reqwest::Client::builder()
            .proxy(proxy)
            .timeout(Duration::from_secs(15))
            .build()?;
        let direct_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            config,
            proxied_client,
            direct_client,
            cache: Mutex::new(IdentityCache::default()),
        })
    }

    /// One AUTHENTICATE + SIGNAL NEWNYM exchange with the control port.
    async fn signal_newnym(&self) -> Result<()> {
        let address = (self.config.control_host.as_str(), self.config.control_port);
        let stream = TcpStream::connect(address).await.map_err(|source| {
            Error::ProxyControl(format!(
                "cannot reach control port {}:{}: {source}",
                self.config.control_host, self.config.control_port
            ))
        })?;
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let auth = match &self.config.control_password {
            Some(password) => format!("AUTHENTICATE \"{password}\"\r\n"),
            None => "AUTHENTICATE\r\n".to_string(),
        };
        write_half.write_all(auth.as_bytes()).await?;
        expect_250(lines.next_line().await?, "AUTHENTICATE")?;

        write_half.write_all(b"SIGNAL NEWNYM\r\n").await?;
        expect_250(lines.next_line().await?, "SIGNAL NEWNYM")?;

        write_half.write_all(b"QUIT\r\n").await?;
        Ok(())
    }

    /// Ask an address-echo service what our exit address is, via the proxy.
    async fn lookup_exit_address(&self) -> Option<IpAddr> {
        let response = self
            .proxied_client
            .get(IDENTITY_PROBE_URL)
            .send()
            .await
            .ok()?;
        let body = response.text().await.ok()?;
        body.trim().parse().ok()
    }

    async fn lookup_direct_address(&self) -> Option<IpAddr> {
        let response = self
            .direct_client
            .get(IDENTITY_PROBE_URL)
            .send()
            .await
            .ok()?;
        let body = response.text().await.ok()?;
        body.trim().parse().ok()
    }

    async fn cached_or_lookup(&self) -> Option<IpAddr> {
        {
            let cache = self.cache.lock().await;
            if let (Some(address), Some(at)) = (cache.address, cache.looked_up)
                && at.elapsed() < IDENTITY_CACHE_TTL
            {
                return Some(address);
            }
        }

        let address = self.lookup_exit_address().await;
        let mut cache = self.cache.lock().await;
        cache.address = address;
        cache.looked_up = Some(Instant::now());
        address
    }

    async fn invalidate_cache(&self) {
        let mut cache = self.cache.lock().await;
        cache.address = None;
        cache.looked_up = None;
    }
}

#[async_trait]
impl IdentityRotator for TorRotator {
    async fn current_identity(&self) -> Option<IpAddr> {
        self.cached_or_lookup().await
    }

    async fn rotate(&self) -> Result<Option<IpAddr>> {
        let before = self.cached_or_lookup().await;
        self.invalidate_cache().await;

        let mut last_error = None;
        for attempt in 1..=ROTATE_ATTEMPTS {
            if let Err(error) = self.signal_newnym().await {
                tracing::warn!(attempt, %error, "NEWNYM signal failed");
                last_error = Some(error);
                continue;
            }

            // Give Tor time to build the new circuit
            tokio::time::sleep(self.config.settle_wait).await;

            let after = self.lookup_exit_address().await;
            match (before, after) {
                (Some(old), Some(new)) if old == new => {
                    tracing::info!(attempt, exit = %new, "Exit address unchanged, retrying NEWNYM");
                }
                (_, new) => {
                    let mut cache = self.cache.lock().await;
                    cache.address = new;
                    cache.looked_up = Some(Instant::now());
                    tracing::info!(attempt, exit = ?new, "Identity rotated");
                    return Ok(new);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::ProxyControl("exit address did not change after NEWNYM".to_string())
        }))
    }

    async fn is_active(&self) -> bool {
        // Proxied traffic should exit from a different address than direct
        // traffic. If the direct lookup fails we settle for the proxied one
        // having succeeded at all.
        let Some(proxied) = self.cached_or_lookup().await else {
            return false;
        };
        match self.lookup_direct_address().await {
            Some(direct) => proxied != direct,
            None => true,
        }
    }
}

fn expect_250(line: Option<String>, command: &str) -> Result<()> {
    match line {
        Some(reply) if reply.starts_with("250") => Ok(()),
        Some(reply) => Err(Error::ProxyControl(format!("{command} rejected: {reply}"))),
        None => Err(Error::ProxyControl(format!(
            "control connection closed during {command}"
        ))),
    }
}

/// Direct-connection rotator: reports inactive and rotates as a no-op.
#[derive(Debug, Default)]
pub struct NoProxyRotator;

#[async_trait]
impl IdentityRotator for NoProxyRotator {
    async fn current_identity(&self) -> Option<IpAddr> {
        None
    }

    async fn rotate(&self) -> Result<Option<IpAddr>> {
        tracing::debug!("Proxy disabled, identity rotation skipped");
        Ok(None)
    }

    async fn is_active(&self) -> bool {
        false
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expect_250_accepts_ok_replies() {
        assert!(expect_250(Some("250 OK".to_string()), "AUTHENTICATE").is_ok());
        assert!(expect_250(Some("250".to_string()), "SIGNAL NEWNYM").is_ok());
    }

    #[test]
    fn expect_250_rejects_errors_and_eof() {
        let err = expect_250(Some("515 Bad authentication".to_string()), "AUTHENTICATE")
            .unwrap_err();
        assert!(err.to_string().contains("AUTHENTICATE"));
        assert!(expect_250(None, "SIGNAL NEWNYM").is_err());
    }

    #[tokio::test]
    async fn no_proxy_rotator_is_inert() {
        let rotator = NoProxyRotator;
        assert!(!rotator.is_active().await);
        assert!(rotator.current_identity().await.is_none());
        assert_eq!(rotator.rotate().await.unwrap(), None);
    }

    #[test]
    fn invalid_socks_url_is_a_config_error() {
        let config = ProxyConfig {
            socks_url: "not a url at all \u{0}".to_string(),
            ..ProxyConfig::default()
        };
        let err = TorRotator::new(config).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn rotator_against_dead_control_port_fails() {
        let config = ProxyConfig {
            control_host: "127.0.0.1".to_string(),
            control_port: 1, // nothing listens here
            settle_wait: Duration::from_millis(1),
            ..ProxyConfig::default()
        };
        let rotator = TorRotator::new(config).unwrap();
        assert!(rotator.signal_newnym().await.is_err());
    }
}
