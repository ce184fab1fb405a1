//! Joins server-reflexive ICE candidates from an SDP body with the binding
//! requests the responder recorded for the same transport address

use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use tracing::{debug, error, info};

use crate::audit::{AuditRecord, AuditSink, ClientMetadata};
use crate::error::CandidateParseError;
use crate::ice::{Candidate, CANDIDATE_PREFIX};
use crate::sdp::Session;
use crate::storage::{CorrelationKey, CorrelationStore};
use crate::stun::protocol::hex;
use crate::stun::Message;

/// One attribute of a matched request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributeReport {
    #[serde(rename = "type")]
    pub attr_type: String,
    pub value: String,
    pub length: u16,
}

/// Details of a request found for a candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchedRequest {
    pub key: CorrelationKey,
    /// One-line summary of the message header
    pub summary: String,
    pub attributes: Vec<AttributeReport>,
    /// `None` when the request carries no FINGERPRINT
    pub fingerprint_valid: Option<bool>,
    pub checksum: u64,
    pub payload_b64: String,
    /// Set when the audit sink rejected the record
    pub audit_error: Option<String>,
}

/// What happened to one `candidate` attribute line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CandidateOutcome {
    ParseError {
        #[serde(serialize_with = "serialize_display")]
        error: CandidateParseError,
    },
    /// Parsed, but not server-reflexive; no lookup done
    Parsed { candidate: Candidate },
    NotFound { candidate: Candidate, key: CorrelationKey },
    Found {
        candidate: Candidate,
        request: MatchedRequest,
    },
}

fn serialize_display<T: fmt::Display, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// One SDP line and, for candidate attributes, what came of it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    pub index: usize,
    pub line: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate: Option<CandidateOutcome>,
}

/// Result of correlating one session; every line appears in order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CorrelationReport {
    pub entries: Vec<ReportEntry>,
}

impl CorrelationReport {
    pub fn outcomes(&self) -> impl Iterator<Item = &CandidateOutcome> {
        self.entries.iter().filter_map(|e| e.candidate.as_ref())
    }

    pub fn found(&self) -> impl Iterator<Item = &MatchedRequest> {
        self.outcomes().filter_map(|o| match o {
            CandidateOutcome::Found { request, .. } => Some(request),
            _ => None,
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for CorrelationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{:02} {}", entry.index, entry.line)?;

            let outcome = match &entry.candidate {
                Some(outcome) => outcome,
                None => continue,
            };

            match outcome {
                CandidateOutcome::ParseError { error } => {
                    writeln!(f, "    failed to parse as candidate: {}", error)?;
                }
                CandidateOutcome::Parsed { candidate } => {
                    writeln!(f, "    parsed as candidate: {}", candidate)?;
                }
                CandidateOutcome::NotFound { candidate, .. } => {
                    writeln!(f, "    parsed as candidate: {}", candidate)?;
                    writeln!(f, "    message from candidate not found in STUN log")?;
                }
                CandidateOutcome::Found { candidate, request } => {
                    writeln!(f, "    parsed as candidate: {}", candidate)?;
                    writeln!(f, "    message found in STUN log: {}", request.summary)?;
                    for attr in &request.attributes {
                        writeln!(
                            f,
                            "    STUN attribute {}: {} (len={})",
                            attr.attr_type, attr.value, attr.length
                        )?;
                    }
                    match request.fingerprint_valid {
                        Some(true) => writeln!(f, "    fingerprint: valid")?,
                        Some(false) => writeln!(f, "    fingerprint: MISMATCH")?,
                        None => {}
                    }
                    writeln!(f, "    dumped: stun-trace decode {}", request.payload_b64)?;
                    writeln!(f, "    crc64: {}", request.checksum)?;
                    if let Some(err) = &request.audit_error {
                        writeln!(f, "    audit log failed: {}", err)?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Attribute list of a stored request in wire order
pub fn describe_attributes(message: &Message) -> Vec<AttributeReport> {
    message
        .attributes()
        .iter()
        .map(|attr| {
            let value = match attr.decode_value(message.transaction_id()) {
                Ok(value) => value.to_string(),
                Err(e) => format!("{} ({})", hex(&attr.value), e),
            };
            AttributeReport {
                attr_type: attr.attr_type.to_string(),
                value,
                length: attr.length(),
            }
        })
        .collect()
}

/// Candidate correlator over a shared store
pub struct Correlator {
    store: Arc<CorrelationStore>,
    audit: Arc<dyn AuditSink>,
}

impl Correlator {
    pub fn new(store: Arc<CorrelationStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit }
    }

    pub fn store(&self) -> &Arc<CorrelationStore> {
        &self.store
    }

    /// Walk `session` line by line and look up every server-reflexive candidate
    pub fn correlate(&self, session: &Session, client: &ClientMetadata) -> CorrelationReport {
        let entries = session
            .iter()
            .enumerate()
            .map(|(index, line)| {
                let candidate = if line.is_attribute() && line.has_prefix(CANDIDATE_PREFIX.as_bytes()) {
                    Some(self.correlate_candidate(&line.value, client))
                } else {
                    None
                };

                ReportEntry {
                    index,
                    line: line.to_string(),
                    candidate,
                }
            })
            .collect();

        CorrelationReport { entries }
    }

    fn correlate_candidate(&self, value: &[u8], client: &ClientMetadata) -> CandidateOutcome {
        let candidate = match Candidate::from_sdp_attribute(value) {
            Ok(candidate) => candidate,
            Err(error) => {
                debug!("correlator: failed to parse candidate: {}", error);
                return CandidateOutcome::ParseError { error };
            }
        };

        if !candidate.is_server_reflexive() {
            return CandidateOutcome::Parsed { candidate };
        }

        let key = candidate.correlation_key();
        let message = match self.store.pop(&key) {
            Some(message) => message,
            None => {
                info!("correlator: no message for {} in log", key);
                return CandidateOutcome::NotFound { candidate, key };
            }
        };

        let record = AuditRecord::new(key.clone(), message.raw(), client.clone());
        let audit_error = match self.audit.append(&record) {
            Ok(()) => None,
            Err(e) => {
                error!("correlator: failed to write audit record for {}: {}", key, e);
                Some(e.to_string())
            }
        };

        info!("correlator: matched {} (crc64 {})", key, record.checksum);

        CandidateOutcome::Found {
            candidate,
            request: MatchedRequest {
                key,
                summary: message.to_string(),
                attributes: describe_attributes(&message),
                fingerprint_valid: message.verify_fingerprint(),
                checksum: record.checksum,
                payload_b64: record.payload_b64,
                audit_error,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{crc64, MemoryAuditLog};
    use crate::error::{NatError, NatResult};
    use crate::sdp::decode_session;
    use crate::stun::{Attribute, AttributeType};

    struct FailingSink;

    impl AuditSink for FailingSink {
        fn append(&self, _record: &AuditRecord) -> NatResult<()> {
            Err(NatError::Audit("disk full".to_string()))
        }
    }

    fn stored_request(store: &CorrelationStore, key: &str) -> Message {
        let mut request = Message::binding_request();
        request
            .add_attribute(Attribute::new(AttributeType::Username, b"EsAw:remote".to_vec()))
            .unwrap();
        request.add_fingerprint().unwrap();
        store.add(CorrelationKey::from_socket_addr(key.parse().unwrap()), &request);
        request
    }

    const SDP: &[u8] = b"v=0\r\n\
        a=candidate:1 1 udp 2122260223 192.168.1.20 54321 typ host\r\n\
        a=candidate:842163049 1 udp 1677729535 203.0.113.5 4000 typ srflx raddr 192.168.1.20 rport 54321\r\n\
        a=candidate:broken\r\n\
        a=candidate:7 1 udp 1677729535 198.51.100.9 5000 typ srflx\r\n\
        a=ice-ufrag:EsAw\r\n";

    #[test]
    fn test_correlate_session() {
        let store = Arc::new(CorrelationStore::default());
        let audit = Arc::new(MemoryAuditLog::new());
        let correlator = Correlator::new(store.clone(), audit.clone());
        let request = stored_request(&store, "203.0.113.5:4000");

        let session = decode_session(SDP).unwrap();
        let client = ClientMetadata::new("Firefox", "121.0", "Linux");
        let report = correlator.correlate(&session, &client);

        assert_eq!(report.entries.len(), 6);
        assert!(report.entries[0].candidate.is_none());
        assert!(report.entries[5].candidate.is_none());
        assert!(matches!(report.entries[1].candidate, Some(CandidateOutcome::Parsed { .. })));
        assert!(matches!(report.entries[3].candidate, Some(CandidateOutcome::ParseError { .. })));
        assert!(matches!(report.entries[4].candidate, Some(CandidateOutcome::NotFound { .. })));

        let found: Vec<_> = report.found().collect();
        assert_eq!(found.len(), 1);
        let matched = found[0];
        assert_eq!(matched.key.as_str(), "203.0.113.5:4000");
        assert_eq!(matched.checksum, crc64(request.raw()));
        assert_eq!(matched.fingerprint_valid, Some(true));
        assert_eq!(matched.attributes.len(), 2);
        assert_eq!(matched.attributes[0].attr_type, "USERNAME");
        assert_eq!(matched.attributes[0].value, "\"EsAw:remote\"");
        assert_eq!(matched.attributes[0].length, 11);
        assert!(matched.audit_error.is_none());

        let records = audit.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].checksum, matched.checksum);
        assert_eq!(records[0].payload_b64, matched.payload_b64);
        assert_eq!(records[0].client, client);

        // consumed
        assert!(store.is_empty());
        let again = correlator.correlate(&session, &client);
        assert_eq!(again.found().count(), 0);
    }

    #[test]
    fn test_report_rendering() {
        let store = Arc::new(CorrelationStore::default());
        let correlator = Correlator::new(store.clone(), Arc::new(MemoryAuditLog::new()));
        stored_request(&store, "203.0.113.5:4000");

        let session = decode_session(SDP).unwrap();
        let report = correlator.correlate(&session, &ClientMetadata::default());
        let text = report.to_string();

        assert!(text.starts_with("00 v=0\n"));
        assert!(text.contains("message found in STUN log"));
        assert!(text.contains("message from candidate not found in STUN log"));
        assert!(text.contains("failed to parse as candidate"));
        assert!(text.contains("fingerprint: valid"));
        assert!(text.contains("dumped: stun-trace decode "));

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["entries"][2]["candidate"]["status"], "found");
        assert_eq!(json["entries"][2]["candidate"]["request"]["key"], "203.0.113.5:4000");
        assert_eq!(json["entries"][3]["candidate"]["status"], "parse_error");
        assert!(json["entries"][0].get("candidate").is_none());
    }

    #[test]
    fn test_audit_failure_is_reported() {
        let store = Arc::new(CorrelationStore::default());
        let correlator = Correlator::new(store.clone(), Arc::new(FailingSink));
        stored_request(&store, "203.0.113.5:4000");

        let session = decode_session(SDP).unwrap();
        let report = correlator.correlate(&session, &ClientMetadata::default());

        let matched = report.found().next().unwrap();
        assert_eq!(matched.audit_error.as_deref(), Some("Audit log error: disk full"));
        assert!(report.to_string().contains("audit log failed"));
    }

    #[test]
    fn test_session_is_left_untouched() {
        let store = Arc::new(CorrelationStore::default());
        let correlator = Correlator::new(store, Arc::new(MemoryAuditLog::new()));
        let session = decode_session(SDP).unwrap();
        let before = session.clone();

        correlator.correlate(&session, &ClientMetadata::default());
        assert_eq!(session, before);
    }
}
