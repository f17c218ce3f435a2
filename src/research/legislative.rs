//! Legislative evidence client.
//!
//! Gates on legislative language, maps the claim to a small catalogue of
//! tracked bills, and fetches the latest action status for each match
//! with settled semantics: only fulfilled fetches contribute.

use crate::claims::types::{AuxEvidence, AuxEvidenceState, SourceRef};
use async_trait::async_trait;
use futures_util::future::join_all;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const BILL_URL: &str = "https://api.congress.gov/v3/bill";

const MAX_BILLS: usize = 3;

const LEGISLATIVE_KEYWORDS: &[&str] = &[
    "bill",
    "act",
    "law",
    "legislation",
    "congress",
    "senate",
    "house",
    "passed",
    "vote",
    "voted",
    "signed",
];

/// One catalogued bill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedBill {
    pub congress: u16,
    pub bill_type: &'static str,
    pub number: u32,
    pub title: &'static str,
    pub keywords: &'static [&'static str],
}

/// The tracked-bill catalogue, in stable priority order.
pub const CATALOG: &[TrackedBill] = &[
    TrackedBill {
        congress: 117,
        bill_type: "hr",
        number: 3684,
        title: "Infrastructure Investment and Jobs Act",
        keywords: &["infrastructure", "roads", "bridges", "broadband"],
    },
    TrackedBill {
        congress: 117,
        bill_type: "hr",
        number: 5376,
        title: "Inflation Reduction Act",
        keywords: &["inflation reduction", "climate", "drug prices", "prescription"],
    },
    TrackedBill {
        congress: 117,
        bill_type: "hr",
        number: 4346,
        title: "CHIPS and Science Act",
        keywords: &["chips", "semiconductor", "semiconductors"],
    },
    TrackedBill {
        congress: 117,
        bill_type: "s",
        number: 2938,
        title: "Bipartisan Safer Communities Act",
        keywords: &["gun", "firearm", "safer communities"],
    },
    TrackedBill {
        congress: 118,
        bill_type: "hr",
        number: 2,
        title: "Secure the Border Act",
        keywords: &["border", "immigration", "asylum"],
    },
];

/// True when the claim uses any legislative language at all.
pub fn has_legislative_language(claim_text: &str) -> bool {
    let lower = claim_text.to_lowercase();
    LEGISLATIVE_KEYWORDS.iter().any(|k| {
        lower
            .split(|c: char| !c.is_alphanumeric())
            .any(|token| token == *k)
    })
}

/// Match a claim to catalogued bills: stable order, capped.
pub fn match_bills(claim_text: &str) -> Vec<&'static TrackedBill> {
    let lower = claim_text.to_lowercase();
    let mut matched = Vec::new();
    for bill in CATALOG {
        if bill.keywords.iter().any(|k| lower.contains(k)) {
            matched.push(bill);
            if matched.len() == MAX_BILLS {
                break;
            }
        }
    }
    matched
}

/// Trait seam so the scheduler can run against a mock.
#[async_trait]
pub trait LegislativeSource: Send + Sync {
    async fn lookup(&self, claim_text: &str) -> AuxEvidence;
}

#[derive(Debug, Deserialize)]
struct BillResponse {
    #[serde(default)]
    bill: Option<BillDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BillDetails {
    #[serde(default)]
    latest_action: Option<LatestAction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LatestAction {
    #[serde(default)]
    action_date: String,
    #[serde(default)]
    text: String,
}

/// HTTP client for the legislative data service.
pub struct LegislativeClient {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl LegislativeClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_base_url(api_key, BILL_URL.to_string())
    }

    pub fn with_base_url(api_key: Option<String>, base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self {
            api_key,
            base_url,
            client,
        }
    }

    async fn latest_action(&self, api_key: &str, bill: &TrackedBill) -> Option<String> {
        let url = format!(
            "{}/{}/{}/{}",
            self.base_url, bill.congress, bill.bill_type, bill.number
        );
        let response = self
            .client
            .get(&url)
            .query(&[("format", "json"), ("api_key", api_key)])
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            debug!(bill = bill.title, status = %response.status(), "bill fetch failed");
            return None;
        }
        let body: BillResponse = response.json().await.ok()?;
        let action = body.bill?.latest_action?;
        Some(format!(
            "{} - {} ({})",
            bill.title, action.text, action.action_date
        ))
    }
}

#[async_trait]
impl LegislativeSource for LegislativeClient {
    async fn lookup(&self, claim_text: &str) -> AuxEvidence {
        if !has_legislative_language(claim_text) {
            return AuxEvidence {
                state: AuxEvidenceState::NotApplicable,
                summary: None,
                sources: Vec::new(),
            };
        }
        let Some(api_key) = self.api_key.as_deref() else {
            return AuxEvidence {
                state: AuxEvidenceState::Error,
                summary: Some("no legislative data API key configured".to_string()),
                sources: Vec::new(),
            };
        };
        let matched = match_bills(claim_text);
        if matched.is_empty() {
            return AuxEvidence {
                state: AuxEvidenceState::Ambiguous,
                summary: Some("no tracked bill matched the claim".to_string()),
                sources: Vec::new(),
            };
        }

        let fetches = matched.iter().map(|bill| self.latest_action(api_key, bill));
        let results = join_all(fetches).await;

        let mut parts = Vec::new();
        let mut sources = Vec::new();
        for (bill, result) in matched.iter().zip(results) {
            if let Some(status) = result {
                parts.push(status);
                sources.push(SourceRef {
                    title: bill.title.to_string(),
                    url: format!(
                        "https://www.congress.gov/bill/{}th-congress/{}/{}",
                        bill.congress,
                        if bill.bill_type == "s" { "senate-bill" } else { "house-bill" },
                        bill.number
                    ),
                });
            }
        }

        if parts.is_empty() {
            return AuxEvidence {
                state: AuxEvidenceState::Ambiguous,
                summary: Some("bill status fetches failed".to_string()),
                sources: Vec::new(),
            };
        }
        AuxEvidence {
            state: AuxEvidenceState::Matched,
            summary: Some(parts.join(" | ")),
            sources,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legislative_language_gate_is_token_based() {
        assert!(has_legislative_language("Congress passed the bill."));
        assert!(has_legislative_language("It was signed into law."));
        // "class" contains "law"-free substring checks would misfire on
        // words like "lawn"; token matching must not.
        assert!(!has_legislative_language("He mowed the lawn outside."));
        assert!(!has_legislative_language("Inflation fell to 3.1 percent."));
    }

    #[test]
    fn bills_match_in_stable_order() {
        let text = "the infrastructure law and the chips act both passed";
        let matched = match_bills(text);
        assert_eq!(matched.len(), 2);
        assert_eq!(matched[0].title, "Infrastructure Investment and Jobs Act");
        assert_eq!(matched[1].title, "CHIPS and Science Act");
    }

    #[tokio::test]
    async fn non_legislative_claims_are_not_applicable() {
        let client = LegislativeClient::new(Some("key".to_string()));
        let evidence = client.lookup("Inflation fell to 3.1 percent.").await;
        assert_eq!(evidence.state, AuxEvidenceState::NotApplicable);
    }

    #[tokio::test]
    async fn missing_api_key_is_an_error_state() {
        let client = LegislativeClient::new(None);
        let evidence = client.lookup("Congress passed the infrastructure bill.").await;
        assert_eq!(evidence.state, AuxEvidenceState::Error);
    }

    #[tokio::test]
    async fn legislative_claim_without_tracked_bill_is_ambiguous() {
        let client = LegislativeClient::new(Some("key".to_string()));
        let evidence = client
            .lookup("The senate voted on the farm subsidy bill.")
            .await;
        assert_eq!(evidence.state, AuxEvidenceState::Ambiguous);
    }

    #[test]
    fn senate_bills_link_to_senate_paths() {
        let bill = &CATALOG[3];
        assert_eq!(bill.bill_type, "s");
    }
}
