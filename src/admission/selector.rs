//! Candidate Node Selectors
//!
//! Builds the label selector used to find candidate nodes for a claim, from
//! (in priority order) the claim's explicit selector annotation, the
//! operator-wide node label, or the storage class default.

use crate::error::{Error, Result};
use crate::resources::ClaimExt;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{info, warn};

/// Where the selector for a claim came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorSource {
    /// The claim's own selector annotation
    Claim,
    /// The operator-wide node label
    OperatorLabel,
    /// The storage class default from configuration
    StorageClassDefault,
    /// No constraint; every node is a candidate
    Unconstrained,
}

impl std::fmt::Display for SelectorSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectorSource::Claim => write!(f, "claim"),
            SelectorSource::OperatorLabel => write!(f, "operator-label"),
            SelectorSource::StorageClassDefault => write!(f, "storage-class-default"),
            SelectorSource::Unconstrained => write!(f, "unconstrained"),
        }
    }
}

// =============================================================================
// Storage Class Defaults
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSelector {
    Map(BTreeMap<String, String>),
    Text(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClassEntry {
    default_node_selector: RawSelector,
}

/// Default node selectors per storage class
#[derive(Debug, Clone, Default)]
pub struct DefaultSelectors {
    by_class: HashMap<String, BTreeMap<String, String>>,
}

impl DefaultSelectors {
    /// No defaults
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse the YAML configuration document
    ///
    /// ```yaml
    /// local:
    ///   defaultNodeSelector: '{"disktype":"ssd"}'
    /// ```
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let raw: HashMap<String, ClassEntry> = serde_yaml::from_str(yaml)?;
        let mut by_class = HashMap::with_capacity(raw.len());
        for (class, entry) in raw {
            let selector = match entry.default_node_selector {
                RawSelector::Map(map) => map,
                RawSelector::Text(text) => parse_selector_text(&text)?,
            };
            by_class.insert(class, selector);
        }
        Ok(Self { by_class })
    }

    /// Load the configuration file; a missing or invalid file yields no defaults
    pub fn load_or_empty(path: &Path) -> Self {
        let loaded = std::fs::read_to_string(path)
            .map_err(Error::from)
            .and_then(|yaml| Self::from_yaml(&yaml));
        match loaded {
            Ok(defaults) => {
                info!(
                    path = %path.display(),
                    classes = defaults.by_class.len(),
                    "Loaded default node selectors"
                );
                defaults
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    "Cannot parse default node selector, continuing without it: {}", e
                );
                Self::empty()
            }
        }
    }

    /// Default selector for a storage class
    pub fn get(&self, storage_class: &str) -> Option<&BTreeMap<String, String>> {
        self.by_class.get(storage_class)
    }

    /// Number of configured classes
    pub fn len(&self) -> usize {
        self.by_class.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_class.is_empty()
    }
}

/// Parse a selector written as a JSON object, or loosely as `"k":"v","k2":"v2"`
fn parse_selector_text(text: &str) -> Result<BTreeMap<String, String>> {
    if let Ok(map) = serde_json::from_str::<BTreeMap<String, String>>(text) {
        return Ok(map);
    }

    let mut map = BTreeMap::new();
    for pair in text.split(',').filter(|p| !p.trim().is_empty()) {
        let (key, value) = pair.split_once(':').ok_or_else(|| Error::MalformedSelector {
            selector: text.to_string(),
            reason: format!("expected key:value, got {:?}", pair),
        })?;
        let trim = |s: &str| s.trim().trim_matches(|c| c == '"' || c == '{' || c == '}').to_string();
        map.insert(trim(key), trim(value));
    }
    Ok(map)
}

// =============================================================================
// Selector Building
// =============================================================================

/// Parse the claim's explicit selector annotation, a flat JSON string map
pub fn parse_claim_selector(raw: &str) -> Result<BTreeMap<String, String>> {
    serde_json::from_str(raw).map_err(|e| Error::MalformedSelector {
        selector: raw.to_string(),
        reason: e.to_string(),
    })
}

/// Render `k=v` pairs joined by commas, in key order
pub fn render_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Choose the label selector for a claim
pub fn build_selector(
    claim: &PersistentVolumeClaim,
    node_label: Option<&str>,
    defaults: &DefaultSelectors,
) -> Result<(String, SelectorSource)> {
    if let Some(raw) = claim.node_selector() {
        let labels = parse_claim_selector(raw)?;
        if !labels.is_empty() {
            return Ok((render_selector(&labels), SelectorSource::Claim));
        }
    }

    if let Some(label) = node_label.map(str::trim).filter(|l| !l.is_empty()) {
        return Ok((label.to_string(), SelectorSource::OperatorLabel));
    }

    if let Some(labels) = claim.storage_class().and_then(|sc| defaults.get(sc)) {
        if !labels.is_empty() {
            return Ok((render_selector(labels), SelectorSource::StorageClassDefault));
        }
    }

    Ok((String::new(), SelectorSource::Unconstrained))
}
