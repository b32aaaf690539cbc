//! Blocking helpers around the suppaftp control connection.
//!
//! Everything here runs on the blocking pool.

use std::io::{self, Read};
use std::net::ToSocketAddrs;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use filament_core::{BackendError, FileInfo};
use rustls::ClientConfig;
use suppaftp::list::File;
use suppaftp::types::FileType;
use suppaftp::{FtpError, RustlsConnector, RustlsFtpStream, Status};
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::{FtpEndpoint, TlsMode};

/// Size of the chunks handed from the data connection to the async side.
pub(crate) const CHUNK_SIZE: usize = 64 * 1024;

pub(crate) fn map_ftp_error(err: FtpError) -> BackendError {
    match err {
        FtpError::UnexpectedResponse(ref response) if response.status == Status::FileUnavailable => {
            BackendError::NotFound(err.to_string())
        }
        FtpError::ConnectionError(e) => BackendError::Transport(format!("FTP connection: {}", e)),
        other => BackendError::Transport(other.to_string()),
    }
}

/// Open the control connection, with TLS when the endpoint asks for it.
fn connect(
    endpoint: &FtpEndpoint,
    tls: Option<&Arc<ClientConfig>>,
) -> Result<RustlsFtpStream, BackendError> {
    let addr = (endpoint.host.as_str(), endpoint.port)
        .to_socket_addrs()
        .map_err(|e| BackendError::Transport(format!("resolve {}: {}", endpoint.host, e)))?
        .next()
        .ok_or_else(|| BackendError::Transport(format!("no address for {}", endpoint.host)))?;

    let connector = || -> Result<RustlsConnector, BackendError> {
        tls.map(|config| RustlsConnector::from(Arc::clone(config)))
            .ok_or_else(|| BackendError::Config("TLS endpoint without TLS configuration".to_string()))
    };

    debug!("Connecting to FTP server {} ({:?})", addr, endpoint.tls);
    let stream = match endpoint.tls {
        TlsMode::Implicit => {
            RustlsFtpStream::connect_secure_implicit(addr, connector()?, &endpoint.tls_server_name)
                .map_err(map_ftp_error)?
        }
        TlsMode::Plain | TlsMode::Explicit => {
            RustlsFtpStream::connect_timeout(addr, endpoint.connect_timeout)
                .map_err(map_ftp_error)?
        }
    };

    match endpoint.tls {
        TlsMode::Explicit => stream
            .into_secure(connector()?, &endpoint.tls_server_name)
            .map_err(map_ftp_error),
        TlsMode::Plain | TlsMode::Implicit => Ok(stream),
    }
}

/// Open a control connection and log in.
///
/// `Ok(None)` means the server rejected the credentials (530).
pub(crate) fn connect_and_login(
    endpoint: &FtpEndpoint,
    tls: Option<&Arc<ClientConfig>>,
    username: &str,
    password: &str,
) -> Result<Option<RustlsFtpStream>, BackendError> {
    let mut stream = connect(endpoint, tls)?;
    stream.set_mode(endpoint.transfer_mode.mode());

    match stream.login(username, password) {
        Ok(()) => {}
        Err(FtpError::UnexpectedResponse(response)) if response.status == Status::NotLoggedIn => {
            debug!("FTP server rejected login for {}", username);
            if let Err(e) = stream.quit() {
                debug!("Ignoring error while closing rejected FTP connection: {}", e);
            }
            return Ok(None);
        }
        Err(e) => return Err(map_ftp_error(e)),
    }

    stream
        .transfer_type(FileType::Binary)
        .map_err(map_ftp_error)?;
    Ok(Some(stream))
}

/// Parse one `LIST` line. Unparseable lines and the `.`/`..` entries yield
/// `None`.
pub(crate) fn parse_list_line(line: &str) -> Option<FileInfo> {
    let file = match File::from_str(line) {
        Ok(file) => file,
        Err(e) => {
            debug!("Skipping unparseable LIST line {:?}: {}", line, e);
            return None;
        }
    };

    let name = file.name();
    if name == "." || name == ".." {
        return None;
    }

    let info = if file.is_directory() {
        FileInfo::directory(name)
    } else {
        FileInfo::file(name, file.size() as u64)
    };
    Some(info.with_modified(DateTime::<Utc>::from(file.modified())))
}

pub(crate) fn read_dir(stream: &mut RustlsFtpStream, path: &str) -> Result<Vec<FileInfo>, BackendError> {
    let lines = stream.list(Some(path)).map_err(map_ftp_error)?;
    Ok(lines.iter().filter_map(|line| parse_list_line(line)).collect())
}

/// Stream the file at `path` into `chunks`. Stops early if the receiver
/// goes away.
pub(crate) fn retrieve(
    stream: &mut RustlsFtpStream,
    path: &str,
    chunks: mpsc::Sender<Vec<u8>>,
) -> Result<(), BackendError> {
    stream
        .retr(path, |reader| {
            let mut buf = vec![0u8; CHUNK_SIZE];
            loop {
                let n = reader.read(&mut buf).map_err(FtpError::ConnectionError)?;
                if n == 0 {
                    return Ok(());
                }
                if chunks.blocking_send(buf[..n].to_vec()).is_err() {
                    return Err(FtpError::ConnectionError(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "download receiver closed",
                    )));
                }
            }
        })
        .map_err(map_ftp_error)
}
