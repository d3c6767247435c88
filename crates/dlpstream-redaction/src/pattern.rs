//! Local pattern-based redactor
//!
//! Runs regex detectors in-process. Each detector reports findings at a fixed
//! likelihood and only participates when that likelihood meets the detector
//! set's threshold.

use crate::client::RedactionClient;
use async_trait::async_trait;
use dlpstream_core::{DetectorSet, Error, Likelihood, Result, REDACTION_MARKER};
use regex::Regex;
use std::collections::HashMap;
use tracing::trace;

/// Default upper bound on a single item's size
const DEFAULT_MAX_ITEM_BYTES: usize = 512 * 1024;

/// A named regex detector
pub struct PatternDetector {
    name: String,
    regex: Regex,
    likelihood: Likelihood,
    validate: Option<fn(&str) -> bool>,
}

impl PatternDetector {
    /// Create a detector from a pattern
    pub fn new(name: impl Into<String>, pattern: &str, likelihood: Likelihood) -> Result<Self> {
        let name = name.into();
        let regex = Regex::new(pattern)
            .map_err(|e| Error::config(format!("Failed to compile {} regex: {}", name, e)))?;
        Ok(Self {
            name,
            regex,
            likelihood,
            validate: None,
        })
    }

    /// Only accept matches for which `check` returns true
    pub fn with_validator(mut self, check: fn(&str) -> bool) -> Self {
        self.validate = Some(check);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn likelihood(&self) -> Likelihood {
        self.likelihood
    }

    fn redact_into(&self, text: &str) -> Option<String> {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        let mut hits = 0usize;

        for m in self.regex.find_iter(text) {
            if let Some(check) = self.validate {
                if !check(m.as_str()) {
                    continue;
                }
            }
            out.push_str(&text[last..m.start()]);
            out.push_str(REDACTION_MARKER);
            last = m.end();
            hits += 1;
        }

        if hits == 0 {
            return None;
        }
        out.push_str(&text[last..]);
        trace!(detector = %self.name, hits, "pattern matched");
        Some(out)
    }
}

/// In-process redactor over a catalog of pattern detectors
pub struct PatternRedactor {
    detectors: HashMap<String, PatternDetector>,
    max_item_bytes: usize,
}

impl PatternRedactor {
    /// Create a redactor with the built-in detector catalog
    pub fn new() -> Result<Self> {
        let builtin = vec![
            PatternDetector::new(
                "EMAIL_ADDRESS",
                r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
                Likelihood::VeryLikely,
            )?,
            PatternDetector::new(
                "PHONE_NUMBER",
                r"(?:\+1[-.\s]?)?\(?\b\d{3}\)?[-.\s]?\d{3}[-.]\d{4}\b",
                Likelihood::Possible,
            )?,
            PatternDetector::new(
                "US_SOCIAL_SECURITY_NUMBER",
                r"\b\d{3}-\d{2}-\d{4}\b",
                Likelihood::Likely,
            )?,
            PatternDetector::new(
                "CREDIT_CARD_NUMBER",
                r"\b\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}\b",
                Likelihood::Likely,
            )?
            .with_validator(luhn_valid),
            PatternDetector::new(
                "IP_ADDRESS",
                r"\b(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\.){3}(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\b",
                Likelihood::Likely,
            )?,
        ];

        let mut redactor = Self {
            detectors: HashMap::new(),
            max_item_bytes: DEFAULT_MAX_ITEM_BYTES,
        };
        for detector in builtin {
            redactor.register(detector);
        }
        Ok(redactor)
    }

    /// Add or replace a detector
    pub fn register(&mut self, detector: PatternDetector) {
        self.detectors.insert(detector.name.clone(), detector);
    }

    /// Reject items larger than `bytes`
    pub fn with_max_item_bytes(mut self, bytes: usize) -> Self {
        self.max_item_bytes = bytes;
        self
    }

    /// Names of all known detectors, sorted
    pub fn detector_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.detectors.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    fn resolve<'a>(&'a self, set: &DetectorSet) -> Result<Vec<&'a PatternDetector>> {
        let mut active = Vec::with_capacity(set.len());
        for name in set.detectors() {
            let detector = self
                .detectors
                .get(name)
                .ok_or_else(|| Error::invalid_input(format!("unknown detector: {}", name)))?;
            if detector.likelihood >= set.min_likelihood() {
                active.push(detector);
            }
        }
        Ok(active)
    }

    fn redact_one(&self, text: &str, active: &[&PatternDetector]) -> Result<String> {
        if text.len() > self.max_item_bytes {
            return Err(Error::invalid_input(format!(
                "item of {} bytes exceeds limit of {}",
                text.len(),
                self.max_item_bytes
            )));
        }
        if text.contains('\0') {
            return Err(Error::invalid_input("item contains NUL bytes"));
        }

        let mut current = text.to_string();
        for detector in active {
            if let Some(redacted) = detector.redact_into(&current) {
                current = redacted;
            }
        }
        Ok(current)
    }
}

#[async_trait]
impl RedactionClient for PatternRedactor {
    async fn redact_batch(
        &self,
        texts: &[String],
        detectors: &DetectorSet,
    ) -> Result<Vec<String>> {
        if detectors.is_empty() {
            return Err(Error::invalid_input("empty detector set"));
        }
        let active = self.resolve(detectors)?;
        texts.iter().map(|t| self.redact_one(t, &active)).collect()
    }

    fn name(&self) -> &str {
        "pattern_redactor"
    }
}

/// Luhn checksum over the digits of `candidate`
fn luhn_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() < 13 {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}
