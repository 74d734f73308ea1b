//! Prescale service client and EXT trigger correction
//!
//! Off-beam triggers are recorded with a per-run prescale. The factors come from an
//! optional HTTP lookup service; without it every run uses the identity factor and
//! the totals are flagged as uncorrected.

use async_trait::async_trait;
use rarexsec_common::catalogue::RunPrescaleDetail;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Factor keys tried in order: post-May-2018 NuMI window, then the legacy window
pub const PREFERRED_PRESCALE_KEYS: [&str; 2] = [
    "EXT_NUMIwin_2018May_FEMBeamTriggerAlgo",
    "EXT_NUMIwin_FEMBeamTriggerAlgo",
];

/// Prefix of any EXT trigger prescale key
pub const EXT_PRESCALE_PREFIX: &str = "EXT_";

const USER_AGENT: &str = concat!("rarexsec-catalogue/", env!("CARGO_PKG_VERSION"));

/// Prescale service errors
#[derive(Debug, Error)]
pub enum PrescaleError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("API error {0}: {1}")]
    ApiError(u16, String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Prescale service not configured")]
    Unavailable,
}

/// Source of per-run prescale factors
#[async_trait]
pub trait PrescaleService: Send + Sync {
    /// False when no service is configured
    fn is_available(&self) -> bool;

    /// All factors registered for `run`; an unknown run yields an empty map
    async fn prescale_factors(&self, run: i64) -> Result<BTreeMap<String, Option<f64>>, PrescaleError>;
}

/// HTTP prescale service: `GET {base_url}/prescales/{run}` → `{"KEY": factor|null, ...}`
pub struct HttpPrescaleService {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpPrescaleService {
    pub fn new(base_url: &str) -> Result<Self, PrescaleError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PrescaleError::NetworkError(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PrescaleService for HttpPrescaleService {
    fn is_available(&self) -> bool {
        true
    }

    async fn prescale_factors(&self, run: i64) -> Result<BTreeMap<String, Option<f64>>, PrescaleError> {
        let url = format!("{}/prescales/{}", self.base_url, run);

        tracing::debug!(run, url = %url, "Querying prescale service");

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| PrescaleError::NetworkError(e.to_string()))?;

        let status = response.status();

        if status == 404 {
            return Ok(BTreeMap::new());
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(PrescaleError::ApiError(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| PrescaleError::ParseError(e.to_string()))
    }
}

/// Stand-in used when no prescale service is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailablePrescaleService;

#[async_trait]
impl PrescaleService for UnavailablePrescaleService {
    fn is_available(&self) -> bool {
        false
    }

    async fn prescale_factors(&self, _run: i64) -> Result<BTreeMap<String, Option<f64>>, PrescaleError> {
        Err(PrescaleError::Unavailable)
    }
}

/// Pick the applicable factor from one run's key → factor map
///
/// Preferred keys win by presence; otherwise the first `EXT_` key (in key order)
/// carrying a value. The chosen factor must be finite and positive.
pub fn select_prescale(factors: &BTreeMap<String, Option<f64>>) -> Option<f64> {
    let chosen = PREFERRED_PRESCALE_KEYS
        .iter()
        .find_map(|key| factors.get(*key).copied().flatten())
        .or_else(|| {
            factors
                .iter()
                .filter(|(key, _)| key.starts_with(EXT_PRESCALE_PREFIX))
                .find_map(|(_, value)| *value)
        })?;

    (chosen.is_finite() && chosen > 0.0).then_some(chosen)
}

/// Prescale-corrected trigger totals for one sample
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrescaledTriggers {
    pub total: f64,
    pub details: BTreeMap<i64, RunPrescaleDetail>,
    /// At least one run received a service-provided factor
    pub any_applied: bool,
}

/// Applies per-run prescale factors to raw trigger sums
#[derive(Clone)]
pub struct PrescaleCorrector {
    service: Arc<dyn PrescaleService>,
}

impl PrescaleCorrector {
    pub fn new(service: Arc<dyn PrescaleService>) -> Self {
        Self { service }
    }

    pub fn service_available(&self) -> bool {
        self.service.is_available()
    }

    /// Factor for `run`, or `None` when the service has nothing usable
    pub async fn factor_for_run(&self, run: i64) -> Option<f64> {
        if !self.service.is_available() {
            return None;
        }

        match self.service.prescale_factors(run).await {
            Ok(factors) if factors.is_empty() => None,
            Ok(factors) => select_prescale(&factors),
            Err(e) => {
                tracing::warn!(run, "Prescale lookup failed: {}", e);
                None
            }
        }
    }

    /// Sum of raw count × factor over runs, with identity for unavailable factors
    pub async fn apply(&self, by_run_raw: &BTreeMap<i64, i64>) -> PrescaledTriggers {
        let mut result = PrescaledTriggers::default();

        for (&run, &raw) in by_run_raw {
            let factor = self.factor_for_run(run).await;
            let prescale = factor.unwrap_or(1.0);
            let raw_exttrig = raw as f64;
            let exttrig_prescaled = prescale * raw_exttrig;

            if factor.is_some() {
                result.any_applied = true;
            } else if self.service.is_available() {
                tracing::debug!(run, "No prescale factor for run, using 1.0");
            }

            result.total += exttrig_prescaled;
            result.details.insert(
                run,
                RunPrescaleDetail {
                    raw_exttrig,
                    prescale,
                    exttrig_prescaled,
                    prescale_applied: factor.is_some(),
                },
            );
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factors(entries: &[(&str, Option<f64>)]) -> BTreeMap<String, Option<f64>> {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_preferred_key_order() {
        let map = factors(&[
            ("EXT_NUMIwin_FEMBeamTriggerAlgo", Some(3.0)),
            ("EXT_NUMIwin_2018May_FEMBeamTriggerAlgo", Some(2.0)),
            ("EXT_BNBwin_FEMBeamTriggerAlgo", Some(9.0)),
        ]);
        assert_eq!(select_prescale(&map), Some(2.0));
    }

    #[test]
    fn test_null_preferred_key_falls_through() {
        let map = factors(&[
            ("EXT_NUMIwin_2018May_FEMBeamTriggerAlgo", None),
            ("EXT_NUMIwin_FEMBeamTriggerAlgo", Some(3.0)),
        ]);
        assert_eq!(select_prescale(&map), Some(3.0));
    }

    #[test]
    fn test_generic_prefix_fallback_is_deterministic() {
        let map = factors(&[
            ("EXT_unbiased_PMTTriggerAlgo", Some(7.0)),
            ("BNB_FEMBeamTriggerAlgo", Some(1.5)),
            ("EXT_BNBwin_FEMBeamTriggerAlgo", Some(4.0)),
            ("EXT_AAA_empty", None),
        ]);
        assert_eq!(select_prescale(&map), Some(4.0));
    }

    #[test]
    fn test_no_usable_key() {
        assert_eq!(select_prescale(&factors(&[("BNB_FEMBeamTriggerAlgo", Some(1.5))])), None);
        assert_eq!(select_prescale(&BTreeMap::new()), None);
    }

    #[test]
    fn test_non_positive_factor_is_unavailable() {
        let zero = factors(&[
            ("EXT_NUMIwin_2018May_FEMBeamTriggerAlgo", Some(0.0)),
            ("EXT_NUMIwin_FEMBeamTriggerAlgo", Some(3.0)),
        ]);
        assert_eq!(select_prescale(&zero), None);

        let nan = factors(&[("EXT_NUMIwin_FEMBeamTriggerAlgo", Some(f64::NAN))]);
        assert_eq!(select_prescale(&nan), None);
    }

    struct FixedService(BTreeMap<i64, BTreeMap<String, Option<f64>>>);

    #[async_trait]
    impl PrescaleService for FixedService {
        fn is_available(&self) -> bool {
            true
        }

        async fn prescale_factors(&self, run: i64) -> Result<BTreeMap<String, Option<f64>>, PrescaleError> {
            if run < 0 {
                return Err(PrescaleError::NetworkError("connection refused".to_string()));
            }
            Ok(self.0.get(&run).cloned().unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn test_unavailable_service_is_identity() {
        let corrector = PrescaleCorrector::new(Arc::new(UnavailablePrescaleService));
        let raw: BTreeMap<i64, i64> = [(5000, 100), (5001, 50)].into_iter().collect();

        let result = corrector.apply(&raw).await;
        assert_eq!(result.total, 150.0);
        assert!(!result.any_applied);
        assert_eq!(result.details[&5000].prescale, 1.0);
        assert!(!result.details[&5001].prescale_applied);
    }

    #[tokio::test]
    async fn test_partial_factors_degrade_per_run() {
        let mut runs = BTreeMap::new();
        runs.insert(5000, factors(&[("EXT_NUMIwin_FEMBeamTriggerAlgo", Some(2.5))]));
        let corrector = PrescaleCorrector::new(Arc::new(FixedService(runs)));
        let raw: BTreeMap<i64, i64> = [(5000, 10), (5001, 4), (-1, 6)].into_iter().collect();

        let result = corrector.apply(&raw).await;
        assert_eq!(result.total, 25.0 + 4.0 + 6.0);
        assert!(result.any_applied);
        assert!(result.details[&5000].prescale_applied);
        assert_eq!(result.details[&5000].exttrig_prescaled, 25.0);
        assert!(!result.details[&5001].prescale_applied);
        assert!(!result.details[&-1].prescale_applied);
    }

    #[tokio::test]
    async fn test_empty_runs() {
        let corrector = PrescaleCorrector::new(Arc::new(UnavailablePrescaleService));
        let result = corrector.apply(&BTreeMap::new()).await;
        assert_eq!(result, PrescaledTriggers::default());
    }
}
