use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::config::SystemTags;

/// Built-in HTTP metrics. Every round trip produces one sample of each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Metric {
    #[serde(rename = "http_reqs")]
    HttpReqs,
    #[serde(rename = "http_req_duration")]
    HttpReqDuration,
    #[serde(rename = "http_req_blocked")]
    HttpReqBlocked,
    #[serde(rename = "http_req_connecting")]
    HttpReqConnecting,
    #[serde(rename = "http_req_tls_handshaking")]
    HttpReqTlsHandshaking,
    #[serde(rename = "http_req_sending")]
    HttpReqSending,
    #[serde(rename = "http_req_waiting")]
    HttpReqWaiting,
    #[serde(rename = "http_req_receiving")]
    HttpReqReceiving,
}

impl Metric {
    pub const ALL: [Metric; 8] = [
        Metric::HttpReqs,
        Metric::HttpReqDuration,
        Metric::HttpReqBlocked,
        Metric::HttpReqConnecting,
        Metric::HttpReqTlsHandshaking,
        Metric::HttpReqSending,
        Metric::HttpReqWaiting,
        Metric::HttpReqReceiving,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Metric::HttpReqs => "http_reqs",
            Metric::HttpReqDuration => "http_req_duration",
            Metric::HttpReqBlocked => "http_req_blocked",
            Metric::HttpReqConnecting => "http_req_connecting",
            Metric::HttpReqTlsHandshaking => "http_req_tls_handshaking",
            Metric::HttpReqSending => "http_req_sending",
            Metric::HttpReqWaiting => "http_req_waiting",
            Metric::HttpReqReceiving => "http_req_receiving",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Tag key/value pairs for one round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TagSet(BTreeMap<String, String>);

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Insert an engine-owned tag, honouring the enabled system tag set.
    pub fn insert_system(&mut self, enabled: &SystemTags, key: &str, value: impl Into<String>) {
        if enabled.enabled(key) {
            self.0.insert(key.to_string(), value.into());
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagSet {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// One timestamped observation. Timing values are milliseconds.
#[derive(Debug, Clone, Serialize)]
pub struct Sample {
    pub metric: Metric,
    pub time: DateTime<Utc>,
    pub tags: Arc<TagSet>,
    pub value: f64,
}

/// Producer side of the sample channel.
///
/// Unbounded so a slow consumer never stalls request completion; one
/// container is sent per round trip.
#[derive(Debug, Clone)]
pub struct SampleSink {
    tx: UnboundedSender<Vec<Sample>>,
}

impl SampleSink {
    pub fn channel() -> (SampleSink, UnboundedReceiver<Vec<Sample>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SampleSink { tx }, rx)
    }

    pub fn push(&self, samples: Vec<Sample>) {
        if samples.is_empty() {
            return;
        }
        if self.tx.send(samples).is_err() {
            log::debug!("sample receiver closed; dropping samples");
        }
    }
}
