use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::http_client::response::ms;
use crate::http_client::tls::TlsInfo;
use crate::metrics::{Metric, Sample, TagSet};

/// Connection facts recorded once per connection and attached to every
/// response it carries (see `TracedStream`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnFacts {
    pub remote_addr: Option<SocketAddr>,
    pub tls: Option<TlsInfo>,
}

/// Timestamps of one HTTP round trip.
///
/// Each stamp is written at most once; later writers (a reused connection
/// racing a fresh dial, a body polled twice) are ignored.
#[derive(Debug)]
pub struct Tracer {
    started_at: DateTime<Utc>,
    get_conn: OnceLock<Instant>,
    dial_start: OnceLock<Instant>,
    dns_done: OnceLock<Instant>,
    connect_done: OnceLock<Instant>,
    tls_done: OnceLock<Instant>,
    got_conn: OnceLock<Instant>,
    wrote_request: OnceLock<Instant>,
    first_byte: OnceLock<Instant>,
    done: OnceLock<Instant>,
    conn: OnceLock<ConnFacts>,
    ocsp: OnceLock<Vec<u8>>,
}

#[derive(Debug, Clone, Copy)]
pub enum Phase {
    GetConn,
    DialStart,
    DnsDone,
    ConnectDone,
    TlsDone,
    GotConn,
    WroteRequest,
    FirstByte,
    Done,
}

impl Tracer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            started_at: Utc::now(),
            get_conn: OnceLock::new(),
            dial_start: OnceLock::new(),
            dns_done: OnceLock::new(),
            connect_done: OnceLock::new(),
            tls_done: OnceLock::new(),
            got_conn: OnceLock::new(),
            wrote_request: OnceLock::new(),
            first_byte: OnceLock::new(),
            done: OnceLock::new(),
            conn: OnceLock::new(),
            ocsp: OnceLock::new(),
        })
    }

    fn slot(&self, phase: Phase) -> &OnceLock<Instant> {
        match phase {
            Phase::GetConn => &self.get_conn,
            Phase::DialStart => &self.dial_start,
            Phase::DnsDone => &self.dns_done,
            Phase::ConnectDone => &self.connect_done,
            Phase::TlsDone => &self.tls_done,
            Phase::GotConn => &self.got_conn,
            Phase::WroteRequest => &self.wrote_request,
            Phase::FirstByte => &self.first_byte,
            Phase::Done => &self.done,
        }
    }

    pub fn mark(&self, phase: Phase) {
        let _ = self.slot(phase).set(Instant::now());
    }

    pub fn mark_at(&self, phase: Phase, at: Instant) {
        let _ = self.slot(phase).set(at);
    }

    pub fn stamp(&self, phase: Phase) -> Option<Instant> {
        self.slot(phase).get().copied()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn set_conn(&self, facts: ConnFacts) {
        let _ = self.conn.set(facts);
    }

    pub fn conn(&self) -> Option<&ConnFacts> {
        self.conn.get()
    }

    pub fn set_ocsp(&self, staple: &[u8]) {
        if !staple.is_empty() {
            let _ = self.ocsp.set(staple.to_vec());
        }
    }

    pub fn ocsp(&self) -> Option<&[u8]> {
        self.ocsp.get().map(Vec::as_slice)
    }

    /// True when no dial was observed, i.e. the request rode an idle connection.
    pub fn reused(&self) -> bool {
        self.dial_start.get().is_none()
    }

    /// Stamp `done` (if not already) and fold the stamps into phase durations.
    pub fn finish(&self) -> Trail {
        self.mark(Phase::Done);
        let get_conn = self.stamp(Phase::GetConn);
        let connect_start = self.stamp(Phase::DnsDone).or(self.stamp(Phase::DialStart));
        let connect_done = self.stamp(Phase::ConnectDone);
        let tls_done = self.stamp(Phase::TlsDone);
        let got_conn = self
            .stamp(Phase::GotConn)
            .or(tls_done)
            .or(connect_done)
            .or(get_conn);
        let wrote = self.stamp(Phase::WroteRequest);
        let first_byte = self.stamp(Phase::FirstByte);
        let done = self.stamp(Phase::Done);

        let (blocked, connecting, tls_handshaking) = if self.reused() {
            (span(get_conn, got_conn), Duration::ZERO, Duration::ZERO)
        } else {
            (
                span(get_conn, connect_start),
                span(connect_start, connect_done),
                if tls_done.is_some() {
                    span(connect_done, tls_done)
                } else {
                    Duration::ZERO
                },
            )
        };
        let sending = span(got_conn, wrote);
        let waiting = span(wrote, first_byte);
        let receiving = span(first_byte, done);

        let elapsed = span(get_conn, done);
        let end_time = self.started_at
            + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());

        Trail {
            blocked,
            connecting,
            tls_handshaking,
            sending,
            waiting,
            receiving,
            duration: sending + waiting + receiving,
            end_time,
        }
    }
}

/// Zero when either end is missing or the clock ran backwards.
fn span(from: Option<Instant>, to: Option<Instant>) -> Duration {
    match (from, to) {
        (Some(from), Some(to)) => to.saturating_duration_since(from),
        _ => Duration::ZERO,
    }
}

/// Phase durations of one round trip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trail {
    pub blocked: Duration,
    pub connecting: Duration,
    pub tls_handshaking: Duration,
    pub sending: Duration,
    pub waiting: Duration,
    pub receiving: Duration,
    /// sending + waiting + receiving
    pub duration: Duration,
    pub end_time: DateTime<Utc>,
}

impl Trail {
    /// One sample per built-in metric, all sharing `tags`.
    pub fn samples(&self, tags: Arc<TagSet>) -> Vec<Sample> {
        Metric::ALL
            .iter()
            .map(|metric| Sample {
                metric: *metric,
                time: self.end_time,
                tags: Arc::clone(&tags),
                value: match metric {
                    Metric::HttpReqs => 1.0,
                    Metric::HttpReqDuration => ms(self.duration),
                    Metric::HttpReqBlocked => ms(self.blocked),
                    Metric::HttpReqConnecting => ms(self.connecting),
                    Metric::HttpReqTlsHandshaking => ms(self.tls_handshaking),
                    Metric::HttpReqSending => ms(self.sending),
                    Metric::HttpReqWaiting => ms(self.waiting),
                    Metric::HttpReqReceiving => ms(self.receiving),
                },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{Phase, Tracer};
    use crate::metrics::{Metric, TagSet};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[test]
    fn fresh_connection_splits_every_phase() {
        let t = Tracer::new();
        let base = Instant::now();
        let at = |ms: u64| base + Duration::from_millis(ms);
        t.mark_at(Phase::GetConn, at(0));
        t.mark_at(Phase::DialStart, at(1));
        t.mark_at(Phase::DnsDone, at(5));
        t.mark_at(Phase::ConnectDone, at(15));
        t.mark_at(Phase::TlsDone, at(35));
        t.mark_at(Phase::WroteRequest, at(37));
        t.mark_at(Phase::FirstByte, at(87));
        t.mark_at(Phase::Done, at(97));

        let trail = t.finish();
        assert_eq!(trail.blocked, Duration::from_millis(5));
        assert_eq!(trail.connecting, Duration::from_millis(10));
        assert_eq!(trail.tls_handshaking, Duration::from_millis(20));
        assert_eq!(trail.sending, Duration::from_millis(2));
        assert_eq!(trail.waiting, Duration::from_millis(50));
        assert_eq!(trail.receiving, Duration::from_millis(10));
        assert_eq!(trail.duration, Duration::from_millis(62));
    }

    #[test]
    fn reused_connection_has_no_connect_phases() {
        let t = Tracer::new();
        let base = Instant::now();
        t.mark_at(Phase::GetConn, base);
        t.mark_at(Phase::GotConn, base + Duration::from_millis(3));
        t.mark_at(Phase::WroteRequest, base + Duration::from_millis(4));
        let trail = t.finish();
        assert!(t.reused());
        assert_eq!(trail.blocked, Duration::from_millis(3));
        assert_eq!(trail.connecting, Duration::ZERO);
        assert_eq!(trail.tls_handshaking, Duration::ZERO);
        assert_eq!(trail.sending, Duration::from_millis(1));
    }

    #[test]
    fn failure_before_first_byte_still_yields_a_trail() {
        let t = Tracer::new();
        let base = Instant::now();
        t.mark_at(Phase::GetConn, base);
        t.mark_at(Phase::DialStart, base);
        t.mark_at(Phase::DnsDone, base + Duration::from_millis(2));
        let trail = t.finish();
        assert_eq!(trail.blocked, Duration::from_millis(2));
        assert_eq!(trail.connecting, Duration::ZERO);
        assert_eq!(trail.waiting, Duration::ZERO);
        assert_eq!(trail.receiving, Duration::ZERO);
    }

    #[test]
    fn stamps_are_write_once() {
        let t = Tracer::new();
        let first = Instant::now();
        t.mark_at(Phase::FirstByte, first);
        t.mark_at(Phase::FirstByte, first + Duration::from_secs(1));
        assert_eq!(t.stamp(Phase::FirstByte), Some(first));
        t.set_ocsp(&[]);
        assert!(t.ocsp().is_none());
    }

    #[test]
    fn samples_cover_every_metric_with_shared_tags() {
        let t = Tracer::new();
        t.mark(Phase::GetConn);
        let tags = Arc::new(TagSet::from_iter([("status", "200")]));
        let samples = t.finish().samples(Arc::clone(&tags));
        assert_eq!(samples.len(), Metric::ALL.len());
        assert!(samples.iter().all(|s| Arc::ptr_eq(&s.tags, &tags)));
        let reqs = samples.iter().find(|s| s.metric == Metric::HttpReqs).unwrap();
        assert_eq!(reqs.value, 1.0);
    }
}
