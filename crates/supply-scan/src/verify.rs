//! Verification collaborators and the product catalog.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::decode::Decoder;
use crate::frame::frame_from_bytes;
use crate::types::{Outcome, ScanError, ScanResult, Subject, VerificationReport};

/// Checks a decoded payload or an uploaded artifact.
#[async_trait]
pub trait Verifier: Send + Sync {
    /// Verify the subject. An `Err` is reported to the user as a failed
    /// verification carrying the error text.
    async fn verify(&self, subject: &Subject) -> ScanResult<VerificationReport>;
}

/// Resolves with a fixed outcome after a fixed delay.
#[derive(Debug, Clone)]
pub struct FixedDelayVerifier {
    pub delay: Duration,
    pub outcome: Outcome,
}

impl FixedDelayVerifier {
    pub fn new(delay: Duration, outcome: Outcome) -> Self {
        Self { delay, outcome }
    }
}

impl Default for FixedDelayVerifier {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), Outcome::Success)
    }
}

#[async_trait]
impl Verifier for FixedDelayVerifier {
    async fn verify(&self, subject: &Subject) -> ScanResult<VerificationReport> {
        tokio::time::sleep(self.delay).await;
        Ok(match self.outcome {
            Outcome::Success => VerificationReport::success(subject.label()),
            Outcome::Failed => VerificationReport::failed(subject.label(), "rejected"),
        })
    }
}

/// One authentic product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub code: String,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
}

/// Known authentic product codes, stored as JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    pub products: Vec<CatalogEntry>,
}

impl Catalog {
    /// Load and validate a catalog file.
    pub fn load(path: &Path) -> ScanResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let catalog: Catalog = serde_json::from_str(&raw)?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Reject empty and duplicate codes.
    pub fn validate(&self) -> ScanResult<()> {
        let mut seen = HashSet::new();
        for (i, entry) in self.products.iter().enumerate() {
            let code = entry.code.trim();
            if code.is_empty() {
                return Err(ScanError::Catalog(format!("entry {i} has an empty code")));
            }
            if !seen.insert(code) {
                return Err(ScanError::Catalog(format!("duplicate code '{code}'")));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    /// Distinct manufacturers, sorted.
    pub fn manufacturers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .products
            .iter()
            .filter_map(|p| p.manufacturer.as_deref())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

/// Verifies codes against a catalog.
pub struct CatalogVerifier {
    index: HashMap<String, CatalogEntry>,
    decoder: Arc<dyn Decoder>,
    latency: Duration,
}

impl CatalogVerifier {
    /// `decoder` is used to read codes from uploaded artifacts.
    pub fn new(catalog: Catalog, decoder: Arc<dyn Decoder>) -> Self {
        let index = catalog
            .products
            .into_iter()
            .map(|entry| (entry.code.trim().to_string(), entry))
            .collect();
        Self {
            index,
            decoder,
            latency: Duration::ZERO,
        }
    }

    /// Simulated round-trip time of the check.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn check_code(&self, code: &str) -> VerificationReport {
        match self.index.get(code.trim()) {
            Some(entry) => {
                let mut report = VerificationReport::success(code);
                report.product = entry.product.clone();
                report.manufacturer = entry.manufacturer.clone();
                report
            }
            None => VerificationReport::failed(code, "unknown product code"),
        }
    }
}

#[async_trait]
impl Verifier for CatalogVerifier {
    async fn verify(&self, subject: &Subject) -> ScanResult<VerificationReport> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match subject {
            Subject::Payload(code) => Ok(self.check_code(code)),
            Subject::Artifact(artifact) => {
                let frame = frame_from_bytes(&artifact.bytes, artifact.mime.as_deref())?;
                match self.decoder.decode(&frame) {
                    Some(code) => {
                        tracing::info!("Read code '{code}' from artifact {}", artifact.name);
                        Ok(self.check_code(&code))
                    }
                    None => Ok(VerificationReport::failed(
                        artifact.name.as_str(),
                        "no code found in artifact",
                    )),
                }
            }
        }
    }
}
