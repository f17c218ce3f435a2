//! Evidence research: providers, the bounded scheduler and verdict
//! selection.
//!
//! All three evidence providers return the same finding shape; the
//! scheduler runs them sequentially per claim and merges the result into
//! one `claim.updated` event.

pub mod economic;
pub mod factcheck;
pub mod legislative;
pub mod scheduler;
pub mod verifier;

use crate::claims::types::AuxEvidence;
use crate::research::factcheck::FactCheckFinding;

/// Everything the verifier sees about a claim.
#[derive(Debug, Clone)]
pub struct EvidenceBundle {
    pub factcheck: FactCheckFinding,
    pub fred: Option<AuxEvidence>,
    pub congress: Option<AuxEvidence>,
}

impl EvidenceBundle {
    /// True when at least one provider produced classified evidence: a
    /// non-unverified fact-check verdict or a matched data series/bill.
    pub fn has_classified_evidence(&self) -> bool {
        use crate::claims::types::{AuxEvidenceState, Verdict};
        if self.factcheck.verdict != Verdict::Unverified {
            return true;
        }
        let matched =
            |aux: &Option<AuxEvidence>| aux.as_ref().map(|a| a.state) == Some(AuxEvidenceState::Matched);
        matched(&self.fred) || matched(&self.congress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::types::{AuxEvidenceState, GoogleEvidenceState, Verdict};
    use crate::research::factcheck::FactCheckStatus;

    fn unverified_factcheck() -> FactCheckFinding {
        FactCheckFinding {
            status: FactCheckStatus::NoMatch,
            state: GoogleEvidenceState::None,
            verdict: Verdict::Unverified,
            confidence: 0.0,
            summary: None,
            sources: vec![],
        }
    }

    #[test]
    fn classified_evidence_requires_a_real_signal() {
        let bundle = EvidenceBundle {
            factcheck: unverified_factcheck(),
            fred: None,
            congress: None,
        };
        assert!(!bundle.has_classified_evidence());

        let bundle = EvidenceBundle {
            factcheck: unverified_factcheck(),
            fred: Some(AuxEvidence {
                state: AuxEvidenceState::Matched,
                summary: None,
                sources: vec![],
            }),
            congress: None,
        };
        assert!(bundle.has_classified_evidence());

        let mut classified = unverified_factcheck();
        classified.verdict = Verdict::False;
        let bundle = EvidenceBundle {
            factcheck: classified,
            fred: None,
            congress: None,
        };
        assert!(bundle.has_classified_evidence());
    }
}
