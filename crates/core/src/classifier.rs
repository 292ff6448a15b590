//! Indicator classifier: scans free-form text for IOC candidates.
//!
//! Pure and stateless. All patterns scan the full text independently;
//! the first pattern to claim a literal value wins, and bare domains that
//! already occur inside a matched URL are suppressed so the same artifact
//! is not surfaced twice.

use crate::indicator::IndicatorType;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// A raw `(value, type)` candidate as produced by the classifier, before
/// the ingestion boundary augments it with threat level and source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractedIndicator {
    pub value: String,
    #[serde(rename = "type")]
    pub indicator_type: IndicatorType,
}

static IP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b((25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\b")
        .expect("ip pattern")
});
static DOMAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z]{2,}\b")
        .expect("domain pattern")
});
static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bhttps?://[^\s/$.?#].[^\s]*\b").expect("url pattern"));
static MD5_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[a-fA-F0-9]{32}\b").expect("md5 pattern"));
static SHA256_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[a-fA-F0-9]{64}\b").expect("sha256 pattern"));
static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}\b").expect("email pattern")
});

/// Matcher order matters only for first-match-wins conflict resolution
/// between types claiming the same literal value.
fn patterns() -> [(IndicatorType, &'static Regex); 6] {
    [
        (IndicatorType::Ip, &IP_RE),
        (IndicatorType::Domain, &DOMAIN_RE),
        (IndicatorType::Url, &URL_RE),
        (IndicatorType::Md5, &MD5_RE),
        (IndicatorType::Sha256, &SHA256_RE),
        (IndicatorType::Sender, &EMAIL_RE),
    ]
}

/// RFC1918 plus loopback. Private addresses pollute cross-case correlation
/// and are dropped outright.
fn is_private_ip(value: &str) -> bool {
    match value.parse::<Ipv4Addr>() {
        Ok(ip) => {
            let o = ip.octets();
            o[0] == 10
                || (o[0] == 172 && (16..=31).contains(&o[1]))
                || (o[0] == 192 && o[1] == 168)
                || o[0] == 127
        }
        Err(_) => false,
    }
}

/// Extract a deduplicated set of indicator candidates from `text`.
///
/// Idempotent: identical input always yields the identical candidate set.
/// Matchless or malformed input yields an empty list, never an error.
pub fn extract_indicators(text: &str) -> Vec<ExtractedIndicator> {
    let mut seen: HashMap<String, IndicatorType> = HashMap::new();
    let mut ordered: Vec<String> = Vec::new();

    for (indicator_type, re) in patterns() {
        for m in re.find_iter(text) {
            let value = m.as_str().to_lowercase();

            if indicator_type == IndicatorType::Ip && is_private_ip(&value) {
                continue;
            }

            // First match wins; a hash must not be re-claimed as a domain.
            if !seen.contains_key(&value) {
                seen.insert(value.clone(), indicator_type);
                ordered.push(value);
            }
        }
    }

    // A URL inherently contains its hostname; surfacing the bare domain as
    // well would double-count the artifact in correlation stats.
    ordered
        .into_iter()
        .filter_map(|value| {
            let indicator_type = seen[&value];
            if indicator_type == IndicatorType::Domain {
                let inside_url = seen
                    .iter()
                    .any(|(other, ty)| *ty == IndicatorType::Url && other.contains(&value));
                if inside_url {
                    return None;
                }
            }
            Some(ExtractedIndicator {
                value,
                indicator_type,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values_of(out: &[ExtractedIndicator]) -> Vec<&str> {
        out.iter().map(|c| c.value.as_str()).collect()
    }

    #[test]
    fn classification_is_idempotent() {
        let text = "beacon to 1.2.3.4, payload at http://evil.com/dl, hash d41d8cd98f00b204e9800998ecf8427e";
        let first = extract_indicators(text);
        let second = extract_indicators(text);
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn values_dedup_case_insensitively() {
        let out = extract_indicators("contacted EVIL.COM then evil.com again");
        let domains: Vec<_> = out
            .iter()
            .filter(|c| c.indicator_type == IndicatorType::Domain)
            .collect();
        assert_eq!(domains.len(), 1);
        assert_eq!(domains[0].value, "evil.com");
    }

    #[test]
    fn private_ips_are_suppressed() {
        let out = extract_indicators("traffic from 192.168.1.5 and 8.8.8.8");
        let ips: Vec<_> = out
            .iter()
            .filter(|c| c.indicator_type == IndicatorType::Ip)
            .collect();
        assert_eq!(ips.len(), 1);
        assert_eq!(ips[0].value, "8.8.8.8");
    }

    #[test]
    fn all_private_ranges_are_suppressed() {
        let out =
            extract_indicators("10.0.0.1 172.16.0.1 172.31.255.254 192.168.0.1 127.0.0.1 1.1.1.1");
        assert_eq!(values_of(&out), vec!["1.1.1.1"]);
    }

    #[test]
    fn boundary_172_addresses_are_public() {
        // 172.15/16 and 172.32/16 fall outside the 172.16.0.0/12 block
        let out = extract_indicators("172.15.0.1 and 172.32.0.1");
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn domain_inside_url_is_suppressed() {
        let out = extract_indicators("visit http://evil.com/path and also evil.com");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].indicator_type, IndicatorType::Url);
        assert_eq!(out[0].value, "http://evil.com/path");
    }

    #[test]
    fn standalone_domain_survives_unrelated_url() {
        let out = extract_indicators("see https://example.org/x and also evil.com");
        let domains: Vec<_> = out
            .iter()
            .filter(|c| c.indicator_type == IndicatorType::Domain)
            .map(|c| c.value.as_str())
            .collect();
        assert_eq!(domains, vec!["evil.com"]);
    }

    #[test]
    fn hashes_are_typed_by_length() {
        let md5 = "d41d8cd98f00b204e9800998ecf8427e";
        let sha256 = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        let out = extract_indicators(&format!("md5 {md5} sha {sha256}"));
        assert!(out
            .iter()
            .any(|c| c.value == md5 && c.indicator_type == IndicatorType::Md5));
        assert!(out
            .iter()
            .any(|c| c.value == sha256 && c.indicator_type == IndicatorType::Sha256));
    }

    #[test]
    fn email_is_classified_as_sender() {
        let out = extract_indicators("phish from Bad.Actor@EVIL.com yesterday");
        assert!(out.iter().any(
            |c| c.value == "bad.actor@evil.com" && c.indicator_type == IndicatorType::Sender
        ));
    }

    #[test]
    fn matchless_input_yields_empty_list() {
        assert!(extract_indicators("").is_empty());
        assert!(extract_indicators("nothing interesting here").is_empty());
        assert!(extract_indicators("\u{0}\u{1}\u{2} 999.999.999.999").is_empty());
    }

    #[test]
    fn mixed_text_end_to_end() {
        let out = extract_indicators("beacon to 1.2.3.4 and malicious.example.com");
        assert_eq!(out.len(), 2);
        assert!(out
            .iter()
            .any(|c| c.value == "1.2.3.4" && c.indicator_type == IndicatorType::Ip));
        assert!(out.iter().any(
            |c| c.value == "malicious.example.com" && c.indicator_type == IndicatorType::Domain
        ));
    }
}
