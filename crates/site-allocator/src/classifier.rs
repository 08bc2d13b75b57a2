//! Vendor inference from site names
//!
//! Site names often embed the OLT vendor (e.g. `HW-CAIRO-12`). The allocator
//! records the inferred vendor as editable metadata and never branches on it.

use crate::error::AllocationError;
use std::fmt;

/// Infers a vendor label from a site name
pub trait SiteClassifier: Send + Sync + fmt::Debug {
    /// Vendor for `site_name`, if one can be inferred
    fn classify(&self, site_name: &str) -> Option<String>;
}

/// Never infers a vendor
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopClassifier;

impl SiteClassifier for NoopClassifier {
    fn classify(&self, _site_name: &str) -> Option<String> {
        None
    }
}

/// Case-insensitive substring rules; the first matching rule wins
#[derive(Debug, Clone, Default)]
pub struct SubstringClassifier {
    rules: Vec<(String, String)>,
}

impl SubstringClassifier {
    /// Create a classifier with no rules
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule mapping `pattern` to `vendor`
    #[must_use]
    pub fn rule(mut self, pattern: &str, vendor: &str) -> Self {
        self.rules.push((pattern.to_lowercase(), vendor.to_string()));
        self
    }

    /// Parse `pattern=vendor,pattern=vendor`
    pub fn parse(rules: &str) -> Result<Self, AllocationError> {
        let mut classifier = Self::new();
        for entry in rules.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (pattern, vendor) = entry
                .split_once('=')
                .map(|(p, v)| (p.trim(), v.trim()))
                .filter(|(p, v)| !p.is_empty() && !v.is_empty())
                .ok_or_else(|| {
                    AllocationError::Validation(format!("vendor rule '{}' is not pattern=vendor", entry))
                })?;
            classifier = classifier.rule(pattern, vendor);
        }
        Ok(classifier)
    }

    /// Number of rules
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether there are no rules
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl SiteClassifier for SubstringClassifier {
    fn classify(&self, site_name: &str) -> Option<String> {
        let site = site_name.to_lowercase();
        self.rules
            .iter()
            .find(|(pattern, _)| site.contains(pattern.as_str()))
            .map(|(_, vendor)| vendor.clone())
    }
}
