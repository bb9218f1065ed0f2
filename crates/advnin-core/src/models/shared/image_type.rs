//! Input image type used to route batch normalization.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Whether a batch holds clean or adversarially perturbed images.
///
/// Models keep separate batch-norm statistics per type so that the two input
/// distributions never mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageType {
    #[serde(rename = "nat")]
    Natural,
    #[serde(rename = "adv")]
    Adversarial,
}

impl ImageType {
    pub const LABELS: [&'static str; 2] = ["nat", "adv"];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageType::Natural => "nat",
            ImageType::Adversarial => "adv",
        }
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nat" => Ok(ImageType::Natural),
            "adv" => Ok(ImageType::Adversarial),
            other => Err(Error::InvalidInput(format!(
                "im_type must be one of {:?}, got '{other}'",
                Self::LABELS
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_labels() {
        assert_eq!("nat".parse::<ImageType>().unwrap(), ImageType::Natural);
        assert_eq!("adv".parse::<ImageType>().unwrap(), ImageType::Adversarial);
        assert_eq!(ImageType::Adversarial.to_string(), "adv");
    }

    #[test]
    fn rejects_unknown_labels() {
        for label in ["", "NAT", "natural", "clean"] {
            let err = label.parse::<ImageType>().unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "{label}");
        }
    }

    #[test]
    fn serde_uses_short_labels() {
        let json = serde_json::to_string(&ImageType::Natural).unwrap();
        assert_eq!(json, "\"nat\"");
        let parsed: ImageType = serde_json::from_str("\"adv\"").unwrap();
        assert_eq!(parsed, ImageType::Adversarial);
    }
}
