use serde::{Deserialize, Serialize};

/// Closed set of indicator types. The wire values are persisted and must
/// stay stable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorType {
    Hostname,
    Url,
    Md5,
    Sha256,
    Header,
    Subject,
    Sender,
    Ip,
    Domain,
}

impl IndicatorType {
    pub fn as_str(&self) -> &str {
        match self {
            IndicatorType::Hostname => "hostname",
            IndicatorType::Url => "url",
            IndicatorType::Md5 => "md5",
            IndicatorType::Sha256 => "sha256",
            IndicatorType::Header => "header",
            IndicatorType::Subject => "subject",
            IndicatorType::Sender => "sender",
            IndicatorType::Ip => "ip",
            IndicatorType::Domain => "domain",
        }
    }
}

/// Coarse severity classification for an observable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    Benign,
    Suspicious,
    Malicious,
}

impl ThreatLevel {
    pub fn as_str(&self) -> &str {
        match self {
            ThreatLevel::Benign => "benign",
            ThreatLevel::Suspicious => "suspicious",
            ThreatLevel::Malicious => "malicious",
        }
    }
}

/// A fully-augmented indicator candidate, ready for the observable store.
///
/// The classifier produces only `(value, indicator_type)`; the ingestion
/// boundary fills in the rest before handing the candidate to the upsert
/// path. Wire field names match the evidence-form payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(rename = "threatValue")]
    pub value: String,
    #[serde(rename = "threatType")]
    pub indicator_type: IndicatorType,
    pub threat_level: ThreatLevel,
    pub source: String,
    pub first_seen: i64,
    pub last_seen: i64,
}

impl Candidate {
    /// Candidates with an empty value are skipped by the engine, not
    /// treated as errors.
    pub fn is_empty(&self) -> bool {
        self.value.trim().is_empty()
    }
}
