//! Correlation engine: the ingestion pipeline that turns evidence text and
//! file metadata into canonical observables.
//!
//! One evidence write is one logical unit of work: classify, then for each
//! candidate upsert -> link -> recount, sequentially. The first storage
//! failure aborts the remainder and propagates to the evidence-write
//! caller. Audit writes are best-effort and never abort anything.

use crate::db::{Database, EvidenceFile};
use ioc_core::{extract_indicators, Candidate, EngineError, IndicatorType, ThreatLevel};
use std::collections::HashSet;

/// Assemble the full candidate set for one evidence write.
///
/// Explicit candidates from the request come first and win the dedup by
/// value. Indicators extracted from the evidence content and the SHA-256
/// hashes of non-image file attachments are augmented with a `suspicious`
/// default level and the evidence's own source and observation timestamp,
/// mirroring how analysts submit them by hand.
pub fn assemble_candidates(
    explicit: &[Candidate],
    content: &str,
    files: &[EvidenceFile],
    source: &str,
    observation_ts: i64,
) -> Vec<Candidate> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut candidates: Vec<Candidate> = Vec::new();

    for candidate in explicit {
        if candidate.is_empty() {
            continue;
        }
        if seen.insert(candidate.value.clone()) {
            candidates.push(candidate.clone());
        }
    }

    for extracted in extract_indicators(content) {
        if seen.insert(extracted.value.clone()) {
            candidates.push(Candidate {
                value: extracted.value,
                indicator_type: extracted.indicator_type,
                threat_level: ThreatLevel::Suspicious,
                source: source.to_string(),
                first_seen: observation_ts,
                last_seen: observation_ts,
            });
        }
    }

    for file in files {
        if file.mime.starts_with("image/") || file.sha256.is_empty() {
            continue;
        }
        let hash = file.sha256.to_lowercase();
        if seen.insert(hash.clone()) {
            candidates.push(Candidate {
                value: hash,
                indicator_type: IndicatorType::Sha256,
                threat_level: ThreatLevel::Suspicious,
                source: source.to_string(),
                first_seen: observation_ts,
                last_seen: observation_ts,
            });
        }
    }

    candidates
}

/// Run upsert -> link -> recount for every candidate against one evidence
/// record. Returns the ids of every observable touched.
///
/// Empty-valued candidates are skipped silently. A freshly created
/// observable gets a best-effort `create:observable` audit event.
pub fn process_candidates(
    db: &Database,
    evidence_id: &str,
    candidates: &[Candidate],
    now: i64,
) -> Result<Vec<String>, EngineError> {
    let mut touched = Vec::new();

    for candidate in candidates {
        if candidate.is_empty() {
            continue;
        }

        let (observable_id, created) = db
            .upsert_observable(candidate, now)
            .map_err(EngineError::storage)?;
        if created {
            db.record_audit(
                "create:observable",
                serde_json::json!({
                    "id": observable_id,
                    "obs_value": candidate.value,
                }),
                None,
            );
        }

        db.link_evidence(evidence_id, &observable_id)
            .map_err(EngineError::storage)?;
        db.recount_observable(&observable_id)
            .map_err(EngineError::storage)?;
        touched.push(observable_id);
    }

    Ok(touched)
}

/// Delete an evidence record and keep the counters honest.
///
/// The linked observable ids are captured first, then the delete cascades
/// the link rows away, and only then is each captured observable
/// recounted. Recounting before the delete would read the stale links.
pub fn delete_evidence_with_recount(
    db: &Database,
    evidence_id: &str,
) -> Result<(), EngineError> {
    let touched = db
        .linked_observables(evidence_id)
        .map_err(EngineError::storage)?;
    let deleted = db
        .delete_evidence(evidence_id)
        .map_err(EngineError::storage)?;
    if !deleted {
        return Err(EngineError::NotFound("Evidence".to_string()));
    }
    for observable_id in &touched {
        db.recount_observable(observable_id)
            .map_err(EngineError::storage)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{StoredCase, StoredEvidence};

    fn seed_case(db: &Database, id: &str) {
        db.save_case(&StoredCase {
            id: id.to_string(),
            title: format!("Case {}", id),
            status: "open".to_string(),
            created_at: 1,
            updated_at: 1,
        })
        .unwrap();
    }

    fn seed_evidence(db: &Database, id: &str, case_id: &str) {
        db.save_evidence(&StoredEvidence {
            id: id.to_string(),
            case_id: case_id.to_string(),
            title: "ev".to_string(),
            content: String::new(),
            source: "sensor".to_string(),
            observation_ts: 1,
            files: vec![],
            imported_at: 1,
        })
        .unwrap();
    }

    fn manual(value: &str) -> Candidate {
        Candidate {
            value: value.to_string(),
            indicator_type: IndicatorType::Domain,
            threat_level: ThreatLevel::Malicious,
            source: "analyst".to_string(),
            first_seen: 0,
            last_seen: 0,
        }
    }

    #[test]
    fn explicit_candidates_win_dedup_over_extracted() {
        let out = assemble_candidates(
            &[manual("evil.com")],
            "traffic to evil.com observed",
            &[],
            "sensor",
            42,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].threat_level, ThreatLevel::Malicious);
        assert_eq!(out[0].source, "analyst");
    }

    #[test]
    fn extracted_candidates_get_suspicious_default() {
        let out = assemble_candidates(&[], "beacon to 1.2.3.4", &[], "netflow", 42);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value, "1.2.3.4");
        assert_eq!(out[0].indicator_type, IndicatorType::Ip);
        assert_eq!(out[0].threat_level, ThreatLevel::Suspicious);
        assert_eq!(out[0].source, "netflow");
        assert_eq!(out[0].first_seen, 42);
    }

    #[test]
    fn file_hashes_become_sha256_candidates_except_images() {
        let hash_a = "a".repeat(64);
        let hash_b = "b".repeat(64);
        let files = vec![
            EvidenceFile {
                name: "dropper.exe".to_string(),
                mime: "application/octet-stream".to_string(),
                sha256: hash_a.clone(),
            },
            EvidenceFile {
                name: "screenshot.png".to_string(),
                mime: "image/png".to_string(),
                sha256: hash_b.clone(),
            },
        ];
        let out = assemble_candidates(&[], "", &files, "upload", 42);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value, hash_a);
        assert_eq!(out[0].indicator_type, IndicatorType::Sha256);
        assert!(!out.iter().any(|c| c.value == hash_b));
    }

    #[test]
    fn empty_candidates_are_skipped_silently() {
        let db = Database::open_in_memory().unwrap();
        seed_case(&db, "c1");
        seed_evidence(&db, "e1", "c1");

        let candidates = vec![manual(""), manual("   "), manual("evil.com")];
        let touched = process_candidates(&db, "e1", &candidates, 100).unwrap();
        assert_eq!(touched.len(), 1);
        assert_eq!(db.list_observables().unwrap().len(), 1);
    }

    #[test]
    fn reingestion_merges_and_recounts() {
        let db = Database::open_in_memory().unwrap();
        seed_case(&db, "c1");
        seed_case(&db, "c2");
        seed_evidence(&db, "e1", "c1");
        seed_evidence(&db, "e2", "c2");

        process_candidates(&db, "e1", &[manual("evil.com")], 100).unwrap();
        process_candidates(&db, "e2", &[manual("evil.com")], 200).unwrap();

        let obs = db.get_observable_by_value("evil.com").unwrap().unwrap();
        assert_eq!(obs.first_seen, 100);
        assert_eq!(obs.last_seen, 200);
        assert_eq!(obs.evidences_count, 2);
        assert_eq!(obs.cases_count, 2);
    }

    #[test]
    fn audit_event_only_on_first_creation() {
        let db = Database::open_in_memory().unwrap();
        seed_case(&db, "c1");
        seed_evidence(&db, "e1", "c1");

        process_candidates(&db, "e1", &[manual("evil.com")], 100).unwrap();
        process_candidates(&db, "e1", &[manual("evil.com")], 200).unwrap();

        let creations: Vec<_> = db
            .list_audit_logs(None, 50)
            .unwrap()
            .into_iter()
            .filter(|l| l.action == "create:observable")
            .collect();
        assert_eq!(creations.len(), 1);
        assert_eq!(creations[0].payload["obs_value"], "evil.com");
    }

    #[test]
    fn delete_recounts_after_cascade() {
        let db = Database::open_in_memory().unwrap();
        seed_case(&db, "c1");
        seed_evidence(&db, "e1", "c1");
        seed_evidence(&db, "e2", "c1");

        process_candidates(&db, "e1", &[manual("evil.com")], 100).unwrap();
        process_candidates(&db, "e2", &[manual("evil.com")], 100).unwrap();

        delete_evidence_with_recount(&db, "e1").unwrap();

        let obs = db.get_observable_by_value("evil.com").unwrap().unwrap();
        assert_eq!(obs.evidences_count, 1);
        assert_eq!(obs.cases_count, 1);
    }

    #[test]
    fn deleting_sole_link_zeroes_counts_but_keeps_observable() {
        let db = Database::open_in_memory().unwrap();
        seed_case(&db, "c1");
        seed_evidence(&db, "e1", "c1");

        process_candidates(&db, "e1", &[manual("evil.com")], 100).unwrap();
        delete_evidence_with_recount(&db, "e1").unwrap();

        let obs = db.get_observable_by_value("evil.com").unwrap().unwrap();
        assert_eq!(obs.evidences_count, 0);
        assert_eq!(obs.cases_count, 0);
    }
}
