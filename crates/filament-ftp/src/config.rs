use std::time::Duration;

use filament_core::BackendError;
use serde::Deserialize;
use url::{Host, Url};

const DEFAULT_PORT: u16 = 21;
const DEFAULT_IMPLICIT_TLS_PORT: u16 = 990;

fn default_connect_timeout_secs() -> u64 {
    30
}

/// How data connections are opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    /// PASV
    #[default]
    Passive,
    /// EPSV
    ExtendedPassive,
    /// PORT, the server connects back to us
    Active,
}

impl TransferMode {
    pub(crate) fn mode(self) -> suppaftp::Mode {
        match self {
            TransferMode::Passive => suppaftp::Mode::Passive,
            TransferMode::ExtendedPassive => suppaftp::Mode::ExtendedPassive,
            TransferMode::Active => suppaftp::Mode::Active,
        }
    }
}

/// TLS on the control and data connections, chosen by the URL scheme.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TlsMode {
    /// `ftp://`
    #[default]
    Plain,
    /// `ftps://`, TLS from the first byte
    Implicit,
    /// `ftpes://`, `AUTH TLS` after connecting
    Explicit,
}

/// Configuration block of the `ftp` backend.
#[derive(Debug, Clone, Deserialize)]
pub struct FtpConfig {
    /// Server URL, `ftp://`, `ftps://` (implicit TLS) or `ftpes://`
    /// (explicit TLS). Credentials in the URL are ignored; every session
    /// logs in with its own.
    pub url: String,

    /// Timeout for establishing the control connection (seconds)
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default)]
    pub transfer_mode: TransferMode,

    /// Accept any server certificate
    #[serde(default)]
    pub insecure_skip_verify: bool,

    /// Name checked against the server certificate, defaults to the URL host
    #[serde(default)]
    pub tls_server_name: Option<String>,
}

/// Validated connection target derived from an [`FtpConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpEndpoint {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    pub transfer_mode: TransferMode,
    pub tls: TlsMode,
    pub tls_server_name: String,
    pub insecure_skip_verify: bool,
}

impl FtpConfig {
    pub fn endpoint(&self) -> Result<FtpEndpoint, BackendError> {
        let url = Url::parse(&self.url)
            .map_err(|e| BackendError::Config(format!("invalid FTP url {}: {}", self.url, e)))?;

        let tls = match url.scheme() {
            "ftp" => TlsMode::Plain,
            "ftps" => TlsMode::Implicit,
            "ftpes" => TlsMode::Explicit,
            scheme => {
                return Err(BackendError::Config(format!(
                    "unsupported URL scheme {}",
                    scheme
                )))
            }
        };

        let host = match url.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            _ => {
                return Err(BackendError::Config(format!(
                    "FTP url {} has no host",
                    self.url
                )))
            }
        };

        if self.connect_timeout_secs == 0 {
            return Err(BackendError::Config(
                "connect_timeout_secs must be positive".to_string(),
            ));
        }

        let default_port = match tls {
            TlsMode::Implicit => DEFAULT_IMPLICIT_TLS_PORT,
            TlsMode::Plain | TlsMode::Explicit => DEFAULT_PORT,
        };
        let tls_server_name = self
            .tls_server_name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| host.clone());

        Ok(FtpEndpoint {
            host,
            port: url.port().unwrap_or(default_port),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            transfer_mode: self.transfer_mode,
            tls,
            tls_server_name,
            insecure_skip_verify: self.insecure_skip_verify,
        })
    }
}
