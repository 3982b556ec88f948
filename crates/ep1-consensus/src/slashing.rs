use std::sync::RwLock;

use ep1_core::error::Ep1Error;
use ep1_core::types::{PublicKeyBytes, Timestamp};
use tracing::warn;

/// A provable consensus violation. V1 records and logs; no stake penalty
/// is applied.
#[derive(Clone, Debug)]
pub struct SlashingEvidence {
    pub height: u64,
    /// The claimed proposer of the offending block.
    pub offender: PublicKeyBytes,
    pub violation: Ep1Error,
    /// Free-form context, e.g. the offending hash.
    pub detail: String,
    pub observed_at: Timestamp,
}

/// In-memory evidence log, mirrored to the `slashing` tracing target.
pub struct SlashingLog {
    entries: RwLock<Vec<SlashingEvidence>>,
}

impl SlashingLog {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn record(&self, evidence: SlashingEvidence) {
        warn!(
            target: "slashing",
            height = evidence.height,
            offender = %hex_prefix(evidence.offender.as_bytes()),
            violation = %evidence.violation,
            detail = %evidence.detail,
            "slashing evidence recorded"
        );
        self.entries
            .write()
            .expect("slashing lock poisoned")
            .push(evidence);
    }

    pub fn entries(&self) -> Vec<SlashingEvidence> {
        self.entries
            .read()
            .expect("slashing lock poisoned")
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("slashing lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SlashingLog {
    fn default() -> Self {
        Self::new()
    }
}

fn hex_prefix(bytes: &[u8]) -> String {
    let hex: String = bytes.iter().take(8).map(|b| format!("{b:02x}")).collect();
    format!("{hex}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorded_evidence_is_retained_in_order() {
        let log = SlashingLog::new();
        for height in [3u64, 4, 5] {
            log.record(SlashingEvidence {
                height,
                offender: PublicKeyBytes::from_bytes(vec![0x04; 65]),
                violation: Ep1Error::InvalidPrevHash("ff".repeat(32)),
                detail: "test".into(),
                observed_at: 1,
            });
        }
        let entries = log.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].height, 3);
        assert_eq!(entries[2].height, 5);
    }
}
