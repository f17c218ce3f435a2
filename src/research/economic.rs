//! Economic-indicator evidence client.
//!
//! Maps a claim against a small catalogue of indicator series and fetches
//! the latest observation for every match in parallel.

use crate::claims::types::{AuxEvidence, AuxEvidenceState, SourceRef};
use async_trait::async_trait;
use futures_util::future::join_all;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const OBSERVATIONS_URL: &str = "https://api.stlouisfed.org/fred/series/observations";

/// Sentinel used by the data service for missing observations.
const MISSING_VALUE: &str = ".";

const MAX_SERIES: usize = 3;

/// One catalogued indicator series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndicatorSeries {
    pub id: &'static str,
    pub title: &'static str,
    pub keywords: &'static [&'static str],
}

/// The indicator catalogue, in stable priority order.
pub const CATALOG: &[IndicatorSeries] = &[
    IndicatorSeries {
        id: "UNRATE",
        title: "Unemployment Rate",
        keywords: &["unemployment", "jobless"],
    },
    IndicatorSeries {
        id: "CPIAUCSL",
        title: "Consumer Price Index",
        keywords: &["inflation", "cpi", "consumer price", "price index", "prices"],
    },
    IndicatorSeries {
        id: "GDP",
        title: "Gross Domestic Product",
        keywords: &["gdp", "gross domestic product", "economic growth", "economy grew"],
    },
    IndicatorSeries {
        id: "CES0500000003",
        title: "Average Hourly Earnings",
        keywords: &["wages", "hourly earnings", "earnings", "paycheck"],
    },
    IndicatorSeries {
        id: "GFDEBTN",
        title: "Federal Debt",
        keywords: &["national debt", "federal debt", "debt"],
    },
    IndicatorSeries {
        id: "FYFSD",
        title: "Federal Surplus or Deficit",
        keywords: &["deficit"],
    },
    IndicatorSeries {
        id: "FEDFUNDS",
        title: "Federal Funds Rate",
        keywords: &["fed funds", "federal funds", "interest rate", "interest rates"],
    },
];

/// Match a claim to catalogued series: stable order, deduplicated, capped.
pub fn match_series(claim_text: &str) -> Vec<&'static IndicatorSeries> {
    let lower = claim_text.to_lowercase();
    let mut matched = Vec::new();
    for series in CATALOG {
        if series.keywords.iter().any(|k| lower.contains(k))
            && !matched.iter().any(|m: &&IndicatorSeries| m.id == series.id)
        {
            matched.push(series);
            if matched.len() == MAX_SERIES {
                break;
            }
        }
    }
    matched
}

/// Trait seam so the scheduler can run against a mock.
#[async_trait]
pub trait IndicatorSource: Send + Sync {
    async fn lookup(&self, claim_text: &str) -> AuxEvidence;
}

#[derive(Debug, Deserialize)]
struct ObservationsResponse {
    #[serde(default)]
    observations: Vec<Observation>,
}

#[derive(Debug, Deserialize)]
struct Observation {
    #[serde(default)]
    date: String,
    #[serde(default)]
    value: String,
}

/// HTTP client for the indicator data service.
pub struct EconomicClient {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl EconomicClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_base_url(api_key, OBSERVATIONS_URL.to_string())
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

    async fn latest_observation(
        &self,
        api_key: &str,
        series: &IndicatorSeries,
    ) -> Option<(String, String)> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("series_id", series.id),
                ("api_key", api_key),
                ("file_type", "json"),
                ("sort_order", "desc"),
                ("limit", "1"),
            ])
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            debug!(series = series.id, status = %response.status(), "observation fetch failed");
            return None;
        }
        let body: ObservationsResponse = response.json().await.ok()?;
        let observation = body.observations.into_iter().next()?;
        if observation.value == MISSING_VALUE {
            return None;
        }
        Some((observation.value, observation.date))
    }
}

#[async_trait]
impl IndicatorSource for EconomicClient {
    async fn lookup(&self, claim_text: &str) -> AuxEvidence {
        let matched = match_series(claim_text);
        if matched.is_empty() {
            return AuxEvidence {
                state: AuxEvidenceState::NotApplicable,
                summary: None,
                sources: Vec::new(),
            };
        }
        let Some(api_key) = self.api_key.as_deref() else {
            return AuxEvidence {
                state: AuxEvidenceState::Error,
                summary: Some("no economic data API key configured".to_string()),
                sources: Vec::new(),
            };
        };

        let fetches = matched
            .iter()
            .map(|series| self.latest_observation(api_key, series));
        let observations = join_all(fetches).await;

        let mut parts = Vec::new();
        let mut sources = Vec::new();
        for (series, observation) in matched.iter().zip(observations) {
            if let Some((value, date)) = observation {
                parts.push(format!("{}: {} ({})", series.title, value, date));
                sources.push(SourceRef {
                    title: series.title.to_string(),
                    url: format!("https://fred.stlouisfed.org/series/{}", series.id),
                });
            }
        }

        if parts.is_empty() {
            return AuxEvidence {
                state: AuxEvidenceState::Ambiguous,
                summary: Some("matched series had no usable observations".to_string()),
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
