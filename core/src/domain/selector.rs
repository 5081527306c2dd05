//! Equality-based Kubernetes label selectors.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

/// Optional DNS-subdomain prefix, then a name segment of at most 63 characters.
static LABEL_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^([a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*/)?[A-Za-z0-9]([-A-Za-z0-9_.]{0,61}[A-Za-z0-9])?$",
    )
    .expect("label key pattern is valid")
});

static LABEL_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9]([-A-Za-z0-9_.]{0,61}[A-Za-z0-9])?)?$")
        .expect("label value pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Equals { key: String, value: String },
    NotEquals { key: String, value: String },
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Self::Equals { key, value } => labels.get(key) == Some(value),
            Self::NotEquals { key, value } => labels.get(key) != Some(value),
        }
    }
}

/// A parsed `key=value,key!=value` selector, as accepted by `kubectl -l`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    raw: String,
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    /// Parses a selector string. An empty string selects everything.
    pub fn parse(selector: &str) -> Result<Self, String> {
        let mut requirements = Vec::new();

        for term in selector.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let requirement = if let Some((key, value)) = term.split_once("!=") {
                Requirement::NotEquals {
                    key: validate_key(key.trim())?,
                    value: validate_value(value.trim())?,
                }
            } else if let Some((key, value)) = term.split_once("==") {
                Requirement::Equals {
                    key: validate_key(key.trim())?,
                    value: validate_value(value.trim())?,
                }
            } else if let Some((key, value)) = term.split_once('=') {
                Requirement::Equals {
                    key: validate_key(key.trim())?,
                    value: validate_value(value.trim())?,
                }
            } else {
                return Err(format!("unsupported selector term '{}'", term));
            };
            requirements.push(requirement);
        }

        Ok(Self {
            raw: selector.trim().to_string(),
            requirements,
        })
    }

    /// The selector as passed to kubectl.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Whether every requirement holds for `labels`.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl FromStr for LabelSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn validate_key(key: &str) -> Result<String, String> {
    if LABEL_KEY.is_match(key) {
        Ok(key.to_string())
    } else {
        Err(format!("invalid label key '{}'", key))
    }
}

fn validate_value(value: &str) -> Result<String, String> {
    if LABEL_VALUE.is_match(value) {
        Ok(value.to_string())
    } else {
        Err(format!("invalid label value '{}'", value))
    }
}
