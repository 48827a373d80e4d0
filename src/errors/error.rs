use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::panic::Location;

/// Closed set of failure kinds. Request failures carry a stable numeric code
/// (see [`ErrorKind::code`]) that scripts branch on; the message is for humans.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "PascalCase")]
pub enum ErrorKind {
    // Catch-all request failure
    Generic,
    Cancelled,

    // Request construction
    InvalidUrl,
    UnsupportedScheme,

    // Redirects
    InvalidRedirectLocation,
    TooManyRedirects,

    RequestTimeout,

    // Name resolution
    Dns,
    DnsNoSuchHost,

    // TCP
    Tcp,
    TcpBrokenPipe,
    TcpDial,
    TcpDialTimeout,
    TcpDialRefused,
    TcpResetByPeer,

    // TLS
    Tls,
    TlsHeader,
    X509UnknownAuthority,
    X509Hostname,
    X509Expired,

    Http2,

    // Body codecs
    ResponseDecompression,
    RequestCompression,

    // Authentication handshakes
    NtlmMissingCredentials,
    NtlmMissingChallenge,
    NtlmInvalidChallenge,
    NtlmSession,
    DigestChallenge,

    // Caller-facing errors, never attached to a Response
    InvalidArgument,
    NotInIteration,
    BodyUnavailable,
    JsonError,
    IoError,
    Base64Error,
}

impl ErrorKind {
    /// Stable integer reported as `error_code`. Zero means the kind is not a
    /// request failure and never shows up on a Response.
    pub fn code(self) -> u32 {
        match self {
            ErrorKind::Generic | ErrorKind::Cancelled => 1000,
            ErrorKind::InvalidUrl => 1020,
            ErrorKind::UnsupportedScheme => 1021,
            ErrorKind::InvalidRedirectLocation => 1030,
            ErrorKind::TooManyRedirects => 1040,
            ErrorKind::RequestTimeout => 1050,
            ErrorKind::Dns => 1100,
            ErrorKind::DnsNoSuchHost => 1101,
            ErrorKind::Tcp => 1200,
            ErrorKind::TcpBrokenPipe => 1201,
            ErrorKind::TcpDial => 1210,
            ErrorKind::TcpDialTimeout => 1211,
            ErrorKind::TcpDialRefused => 1212,
            ErrorKind::TcpResetByPeer => 1220,
            ErrorKind::Tls => 1300,
            ErrorKind::TlsHeader => 1301,
            ErrorKind::X509UnknownAuthority => 1310,
            ErrorKind::X509Hostname => 1311,
            ErrorKind::X509Expired => 1312,
            ErrorKind::Http2 => 1600,
            ErrorKind::ResponseDecompression => 1701,
            ErrorKind::RequestCompression => 1702,
            ErrorKind::NtlmMissingCredentials => 1800,
            ErrorKind::NtlmMissingChallenge => 1801,
            ErrorKind::NtlmInvalidChallenge => 1802,
            ErrorKind::NtlmSession => 1803,
            ErrorKind::DigestChallenge => 1810,
            ErrorKind::InvalidArgument
            | ErrorKind::NotInIteration
            | ErrorKind::BodyUnavailable
            | ErrorKind::JsonError
            | ErrorKind::IoError
            | ErrorKind::Base64Error => 0,
        }
    }

    /// True for kinds produced by a request that reached (or tried to reach) the network.
    pub fn is_request_failure(self) -> bool {
        self.code() != 0
    }
}

/// Minimal backtrace information
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorTrace {
    pub source: Option<String>,
    pub cause: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub context: Option<HashMap<String, String>>,
    pub trace: Option<Box<ErrorTrace>>,
    pub timestamp: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: None,
            trace: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_context(
        kind: ErrorKind,
        message: impl Into<String>,
        context: HashMap<String, String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            context: Some(context),
            trace: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_trace(
        mut self,
        source: Option<String>,
        cause: Option<String>,
        location: Option<String>,
    ) -> Self {
        self.trace = Some(Box::new(ErrorTrace {
            source,
            cause,
            location,
        }));
        self
    }

    /// Attach one context entry, creating the map on first use.
    pub fn context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Create error from another error with automatic trace
    #[track_caller]
    pub fn from_error<E: std::error::Error + ?Sized>(
        kind: ErrorKind,
        err: &E,
        context: Option<HashMap<String, String>>,
        location: &Location,
    ) -> Self {
        let message = err.to_string();
        let source = err.source().map(|s| s.to_string());
        let cause = Some(format!("{err:?}"));

        Self {
            kind,
            message,
            context,
            trace: Some(Box::new(ErrorTrace {
                source,
                cause,
                location: Some(location.to_string()),
            })),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn code(&self) -> u32 {
        self.kind.code()
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

/// Build an [`Error`](crate::errors::Error) stamped with the call site.
#[macro_export]
macro_rules! http_error {
    ($kind:expr, $msg:expr) => {
        $crate::errors::Error::new($kind, $msg).with_trace(
            None,
            None,
            Some(format!("{}:{}:{}", file!(), line!(), column!()))
        )
    };
    ($kind:expr, $msg:expr, $($key:expr => $value:expr),*) => {
        {
            let mut context = std::collections::HashMap::new();
            $(context.insert($key.to_string(), $value.to_string());)*
            $crate::errors::Error::with_context($kind, $msg, context).with_trace(
                None,
                None,
                Some(format!("{}:{}:{}", file!(), line!(), column!()))
            )
        }
    };
}

impl From<std::io::Error> for Error {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        Error::from_error(ErrorKind::IoError, &err, None, Location::caller())
    }
}

impl From<serde_json::Error> for Error {
    #[track_caller]
    fn from(err: serde_json::Error) -> Self {
        Error::from_error(ErrorKind::JsonError, &err, None, Location::caller())
    }
}

impl From<base64::DecodeError> for Error {
    #[track_caller]
    fn from(err: base64::DecodeError) -> Self {
        Error::from_error(ErrorKind::Base64Error, &err, None, Location::caller())
    }
}

impl From<url::ParseError> for Error {
    #[track_caller]
    fn from(err: url::ParseError) -> Self {
        Error::from_error(ErrorKind::InvalidUrl, &err, None, Location::caller())
    }
}

impl From<http::Error> for Error {
    #[track_caller]
    fn from(err: http::Error) -> Self {
        Error::from_error(ErrorKind::InvalidArgument, &err, None, Location::caller())
    }
}
