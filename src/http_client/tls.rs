use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use thiserror::Error as ThisError;

/// TLS facts of the connection that carried a response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsInfo {
    pub version: TlsVersion,
    pub cipher_suite: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocsp: Option<OcspInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TlsVersion {
    #[serde(rename = "ssl3.0")]
    Ssl30,
    #[serde(rename = "tls1.0")]
    Tls10,
    #[serde(rename = "tls1.1")]
    Tls11,
    #[serde(rename = "tls1.2")]
    Tls12,
    #[serde(rename = "tls1.3")]
    Tls13,
}

impl TlsVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            TlsVersion::Ssl30 => "ssl3.0",
            TlsVersion::Tls10 => "tls1.0",
            TlsVersion::Tls11 => "tls1.1",
            TlsVersion::Tls12 => "tls1.2",
            TlsVersion::Tls13 => "tls1.3",
        }
    }

    pub(crate) fn from_rustls(version: rustls::ProtocolVersion) -> Option<Self> {
        match version {
            rustls::ProtocolVersion::SSLv3 => Some(TlsVersion::Ssl30),
            rustls::ProtocolVersion::TLSv1_0 => Some(TlsVersion::Tls10),
            rustls::ProtocolVersion::TLSv1_1 => Some(TlsVersion::Tls11),
            rustls::ProtocolVersion::TLSv1_2 => Some(TlsVersion::Tls12),
            rustls::ProtocolVersion::TLSv1_3 => Some(TlsVersion::Tls13),
            _ => None,
        }
    }
}

/// IANA-style suite name (`TLS_AES_128_GCM_SHA256`).
pub(crate) fn cipher_suite_name(suite: rustls::CipherSuite) -> String {
    let name = format!("{suite:?}");
    match name.strip_prefix("TLS13_") {
        Some(rest) => format!("TLS_{rest}"),
        None => name,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OcspStatus {
    Good,
    Revoked,
    Unknown,
    ServerFailed,
}

impl OcspStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OcspStatus::Good => "good",
            OcspStatus::Revoked => "revoked",
            OcspStatus::Unknown => "unknown",
            OcspStatus::ServerFailed => "server_failed",
        }
    }
}

/// CRLReason (RFC 5280 §5.3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    Unspecified,
    KeyCompromise,
    CaCompromise,
    AffiliationChanged,
    Superseded,
    CessationOfOperation,
    CertificateHold,
    RemoveFromCrl,
    PrivilegeWithdrawn,
    AaCompromise,
}

impl RevocationReason {
    fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => RevocationReason::Unspecified,
            1 => RevocationReason::KeyCompromise,
            2 => RevocationReason::CaCompromise,
            3 => RevocationReason::AffiliationChanged,
            4 => RevocationReason::Superseded,
            5 => RevocationReason::CessationOfOperation,
            6 => RevocationReason::CertificateHold,
            8 => RevocationReason::RemoveFromCrl,
            9 => RevocationReason::PrivilegeWithdrawn,
            10 => RevocationReason::AaCompromise,
            _ => return None,
        })
    }
}

/// Decoded stapled OCSP response (first SingleResponse only).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OcspInfo {
    pub status: OcspStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_reason: Option<RevocationReason>,
    pub produced_at: Option<DateTime<Utc>>,
    pub this_update: Option<DateTime<Utc>>,
    pub next_update: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl OcspInfo {
    fn server_failed() -> Self {
        Self {
            status: OcspStatus::ServerFailed,
            revocation_reason: None,
            produced_at: None,
            this_update: None,
            next_update: None,
            revoked_at: None,
        }
    }
}

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum OcspError {
    #[error("truncated DER element")]
    Truncated,
    #[error("unexpected DER tag 0x{found:02x}, wanted 0x{wanted:02x}")]
    UnexpectedTag { wanted: u8, found: u8 },
    #[error("unsupported OCSP response type")]
    UnsupportedType,
    #[error("invalid GeneralizedTime")]
    InvalidTime,
    #[error("OCSP response has no SingleResponse")]
    Empty,
}

const SEQUENCE: u8 = 0x30;
const ENUMERATED: u8 = 0x0a;
const OID: u8 = 0x06;
const OCTET_STRING: u8 = 0x04;
const GENERALIZED_TIME: u8 = 0x18;
const CTX_0: u8 = 0xa0;
const CERT_GOOD: u8 = 0x80;
const CERT_REVOKED: u8 = 0xa1;
const CERT_UNKNOWN: u8 = 0x82;

/// id-pkix-ocsp-basic, 1.3.6.1.5.5.7.48.1.1
const OCSP_BASIC: &[u8] = &[0x2b, 0x06, 0x01, 0x05, 0x05, 0x07, 0x30, 0x01, 0x01];

/// Minimal DER cursor; only what an OCSP BasicResponse needs.
struct Der<'a> {
    data: &'a [u8],
}

impl<'a> Der<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn peek(&self) -> Option<u8> {
        self.data.first().copied()
    }

    fn next(&mut self) -> Result<(u8, &'a [u8]), OcspError> {
        let (&tag, rest) = self.data.split_first().ok_or(OcspError::Truncated)?;
        let (&first, rest) = rest.split_first().ok_or(OcspError::Truncated)?;
        let (len, rest) = if first < 0x80 {
            (first as usize, rest)
        } else {
            let count = (first & 0x7f) as usize;
            if count == 0 || count > 4 || rest.len() < count {
                return Err(OcspError::Truncated);
            }
            let len = rest[..count]
                .iter()
                .fold(0usize, |acc, b| (acc << 8) | *b as usize);
            (len, &rest[count..])
        };
        if rest.len() < len {
            return Err(OcspError::Truncated);
        }
        let (content, remaining) = rest.split_at(len);
        self.data = remaining;
        Ok((tag, content))
    }

    fn expect(&mut self, wanted: u8) -> Result<&'a [u8], OcspError> {
        let (found, content) = self.next()?;
        if found != wanted {
            return Err(OcspError::UnexpectedTag { wanted, found });
        }
        Ok(content)
    }

    fn skip_if(&mut self, tag: u8) -> Result<(), OcspError> {
        if self.peek() == Some(tag) {
            self.next()?;
        }
        Ok(())
    }
}

/// Decode a DER `OCSPResponse` as stapled in the TLS handshake.
pub fn parse_ocsp_response(der: &[u8]) -> Result<OcspInfo, OcspError> {
    let mut outer = Der::new(Der::new(der).expect(SEQUENCE)?);
    let status = outer.expect(ENUMERATED)?;
    if status != [0] {
        return Ok(OcspInfo::server_failed());
    }

    let mut response_bytes = Der::new(Der::new(outer.expect(CTX_0)?).expect(SEQUENCE)?);
    if response_bytes.expect(OID)? != OCSP_BASIC {
        return Err(OcspError::UnsupportedType);
    }
    let basic = response_bytes.expect(OCTET_STRING)?;
    let mut basic = Der::new(Der::new(basic).expect(SEQUENCE)?);
    let mut data = Der::new(basic.expect(SEQUENCE)?);

    data.skip_if(CTX_0)?;
    // responderID: [1] byName or [2] byKey
    data.next()?;
    let produced_at = parse_generalized_time(data.expect(GENERALIZED_TIME)?)?;

    let mut responses = Der::new(data.expect(SEQUENCE)?);
    if responses.peek().is_none() {
        return Err(OcspError::Empty);
    }
    let mut single = Der::new(responses.expect(SEQUENCE)?);
    single.expect(SEQUENCE)?;

    let (status_tag, status_content) = single.next()?;
    let mut info = OcspInfo {
        status: OcspStatus::Unknown,
        revocation_reason: None,
        produced_at: Some(produced_at),
        this_update: None,
        next_update: None,
        revoked_at: None,
    };
    match status_tag {
        CERT_GOOD => info.status = OcspStatus::Good,
        CERT_REVOKED => {
            info.status = OcspStatus::Revoked;
            let mut revoked = Der::new(status_content);
            info.revoked_at = Some(parse_generalized_time(revoked.expect(GENERALIZED_TIME)?)?);
            if revoked.peek() == Some(CTX_0) {
                let reason = Der::new(revoked.expect(CTX_0)?).expect(ENUMERATED)?;
                info.revocation_reason = reason.last().copied().and_then(RevocationReason::from_code);
            }
        }
        CERT_UNKNOWN => info.status = OcspStatus::Unknown,
        other => {
            return Err(OcspError::UnexpectedTag {
                wanted: CERT_GOOD,
                found: other,
            });
        }
    }

    info.this_update = Some(parse_generalized_time(single.expect(GENERALIZED_TIME)?)?);
    if single.peek() == Some(CTX_0) {
        let next = Der::new(single.expect(CTX_0)?).expect(GENERALIZED_TIME)?;
        info.next_update = Some(parse_generalized_time(next)?);
    }
    Ok(info)
}

/// `YYYYMMDDHHMMSS[.fff]Z`
fn parse_generalized_time(raw: &[u8]) -> Result<DateTime<Utc>, OcspError> {
    let text = std::str::from_utf8(raw).map_err(|_| OcspError::InvalidTime)?;
    let digits = text.get(..14).ok_or(OcspError::InvalidTime)?;
    if !text.ends_with('Z') {
        return Err(OcspError::InvalidTime);
    }
    NaiveDateTime::parse_from_str(digits, "%Y%m%d%H%M%S")
        .map(|naive| naive.and_utc())
        .map_err(|_| OcspError::InvalidTime)
}
