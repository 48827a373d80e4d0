use std::error::Error as StdError;
use std::io;
use std::panic::Location;

use super::error::{Error, ErrorKind};

type BoxError = Box<dyn StdError + Send + Sync>;

/// Map a transport failure onto the stable taxonomy.
///
/// The hyper client nests its causes (client error, connect error, io error,
/// rustls error), and io errors hide their payload from `source()`, so the
/// whole tree is walked rather than just the top-level message.
pub fn classify(err: &(dyn StdError + 'static)) -> ErrorKind {
    let mut connect = false;
    let mut dns = false;
    let mut http2 = false;

    let mut pending: Vec<&(dyn StdError + 'static)> = vec![err];
    while let Some(current) = pending.pop() {
        if let Some(own) = current.downcast_ref::<Error>() {
            return own.kind;
        }
        if let Some(client) = current.downcast_ref::<hyper_util::client::legacy::Error>()
            && client.is_connect()
        {
            connect = true;
        }
        if let Some(tls) = current.downcast_ref::<rustls::Error>() {
            return classify_tls(tls);
        }
        if let Some(io_err) = current.downcast_ref::<io::Error>() {
            if let Some(kind) = classify_io(io_err.kind(), connect) {
                return kind;
            }
            if let Some(inner) = io_err.get_ref() {
                pending.push(inner);
            }
        }

        let text = current.to_string().to_ascii_lowercase();
        if is_no_such_host(&text) {
            return ErrorKind::DnsNoSuchHost;
        }
        if text.starts_with("dns error") || text.contains("failed to lookup address") {
            dns = true;
        }
        if text.starts_with("tcp connect error") {
            connect = true;
        }
        if text.contains("scheme is not http") || text.contains("unsupported scheme") {
            return ErrorKind::UnsupportedScheme;
        }
        if text.contains("http2") || text.contains("h2 protocol") {
            http2 = true;
        }

        if let Some(next) = current.source() {
            pending.push(next);
        }
    }

    if dns {
        ErrorKind::Dns
    } else if http2 {
        ErrorKind::Http2
    } else if connect {
        ErrorKind::TcpDial
    } else {
        ErrorKind::Generic
    }
}

/// Convert a boxed transport error into a crate error, keeping the cause chain as trace.
#[track_caller]
pub fn from_transport(err: BoxError) -> Error {
    let kind = classify(err.as_ref());
    if let Some(own) = err.downcast_ref::<Error>() {
        return own.clone();
    }
    Error::from_error(kind, err.as_ref(), None, Location::caller())
}

fn classify_io(kind: io::ErrorKind, connect: bool) -> Option<ErrorKind> {
    match kind {
        io::ErrorKind::ConnectionRefused => Some(ErrorKind::TcpDialRefused),
        io::ErrorKind::ConnectionReset => Some(ErrorKind::TcpResetByPeer),
        io::ErrorKind::BrokenPipe => Some(ErrorKind::TcpBrokenPipe),
        io::ErrorKind::TimedOut if connect => Some(ErrorKind::TcpDialTimeout),
        io::ErrorKind::TimedOut => Some(ErrorKind::RequestTimeout),
        io::ErrorKind::AddrNotAvailable | io::ErrorKind::NotConnected => Some(ErrorKind::TcpDial),
        _ => None,
    }
}

fn classify_tls(err: &rustls::Error) -> ErrorKind {
    match err {
        rustls::Error::InvalidCertificate(cert) => match cert {
            rustls::CertificateError::UnknownIssuer => ErrorKind::X509UnknownAuthority,
            rustls::CertificateError::NotValidForName => ErrorKind::X509Hostname,
            rustls::CertificateError::Expired | rustls::CertificateError::NotValidYet => {
                ErrorKind::X509Expired
            }
            other => {
                // Newer rustls releases add "...Context" variants carrying details.
                let name = format!("{other:?}");
                if name.starts_with("NotValidForName") {
                    ErrorKind::X509Hostname
                } else if name.starts_with("Expired") || name.starts_with("NotValidYet") {
                    ErrorKind::X509Expired
                } else if name.starts_with("UnknownIssuer") {
                    ErrorKind::X509UnknownAuthority
                } else {
                    ErrorKind::Tls
                }
            }
        },
        rustls::Error::InvalidMessage(_) | rustls::Error::InappropriateMessage { .. } => {
            ErrorKind::TlsHeader
        }
        _ => ErrorKind::Tls,
    }
}

fn is_no_such_host(text: &str) -> bool {
    text.contains("name or service not known")
        || text.contains("no such host")
        || text.contains("nodename nor servname provided")
        || text.contains("no address associated with hostname")
        || text.contains("no such host is known")
}
