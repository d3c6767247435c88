//! Detector sets and confidence thresholds

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Literal that replaces every matched span
pub const REDACTION_MARKER: &str = "REDACTED";

/// Minimum confidence a finding needs before it is redacted
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Likelihood {
    /// Accept every finding
    #[default]
    #[serde(alias = "LIKELIHOOD_UNSPECIFIED")]
    Unspecified,
    VeryUnlikely,
    Unlikely,
    Possible,
    Likely,
    VeryLikely,
}

impl Likelihood {
    /// Wire name, as accepted by the redaction service
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unspecified => "LIKELIHOOD_UNSPECIFIED",
            Self::VeryUnlikely => "VERY_UNLIKELY",
            Self::Unlikely => "UNLIKELY",
            Self::Possible => "POSSIBLE",
            Self::Likely => "LIKELY",
            Self::VeryLikely => "VERY_LIKELY",
        }
    }
}

impl fmt::Display for Likelihood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Likelihood {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LIKELIHOOD_UNSPECIFIED" | "UNSPECIFIED" => Ok(Self::Unspecified),
            "VERY_UNLIKELY" => Ok(Self::VeryUnlikely),
            "UNLIKELY" => Ok(Self::Unlikely),
            "POSSIBLE" => Ok(Self::Possible),
            "LIKELY" => Ok(Self::Likely),
            "VERY_LIKELY" => Ok(Self::VeryLikely),
            other => Err(Error::config(format!("unknown likelihood: {}", other))),
        }
    }
}

/// Ordered set of detector identifiers plus the minimum likelihood
///
/// Built once at startup and shared read-only for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectorSet {
    detectors: Vec<String>,
    min_likelihood: Likelihood,
}

impl DetectorSet {
    /// Build a detector set, keeping first-seen order and dropping duplicates
    ///
    /// Fails with a configuration error when no detector remains.
    pub fn new<I, S>(detectors: I, min_likelihood: Likelihood) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut names: Vec<String> = Vec::new();
        for detector in detectors {
            let name = detector.as_ref().trim();
            if name.is_empty() {
                continue;
            }
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }

        if names.is_empty() {
            return Err(Error::config("detector set must name at least one detector"));
        }

        Ok(Self {
            detectors: names,
            min_likelihood,
        })
    }

    /// Detector identifiers in configured order
    pub fn detectors(&self) -> &[String] {
        &self.detectors
    }

    /// Minimum likelihood threshold
    pub fn min_likelihood(&self) -> Likelihood {
        self.min_likelihood
    }

    /// Whether the set names the given detector
    pub fn contains(&self, detector: &str) -> bool {
        self.detectors.iter().any(|d| d == detector)
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_set_is_config_error() {
        let err = DetectorSet::new(Vec::<String>::new(), Likelihood::Unspecified).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = DetectorSet::new(["", "  "], Likelihood::Unspecified).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_dedup_keeps_order() {
        let set = DetectorSet::new(
            ["PHONE_NUMBER", "EMAIL_ADDRESS", "PHONE_NUMBER"],
            Likelihood::Possible,
        )
        .unwrap();
        assert_eq!(set.detectors(), &["PHONE_NUMBER", "EMAIL_ADDRESS"]);
        assert_eq!(set.min_likelihood(), Likelihood::Possible);
    }

    #[test]
    fn test_likelihood_parsing_and_order() {
        assert_eq!("likely".parse::<Likelihood>().unwrap(), Likelihood::Likely);
        assert_eq!(
            "LIKELIHOOD_UNSPECIFIED".parse::<Likelihood>().unwrap(),
            Likelihood::Unspecified
        );
        assert!("sometimes".parse::<Likelihood>().is_err());
        assert!(Likelihood::VeryLikely > Likelihood::Possible);
    }
}
