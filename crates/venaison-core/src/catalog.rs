//! Read-only reason catalogs.
//!
//! Refusal and seizure reasons come from controlled catalogs owned outside
//! the core; validation only asks membership questions. The in-memory
//! implementation ships a seed of common entries so a daemon runs without
//! external catalog wiring, and tests have realistic data.

use std::collections::BTreeSet;

/// Membership queries against the controlled reason catalogs.
pub trait ReasonCatalog: Send + Sync {
    /// Whether the text is a valid refusal reason.
    fn is_refusal_reason(&self, reason: &str) -> bool;

    /// Whether the text is a valid seizure reason.
    fn is_seizure_reason(&self, reason: &str) -> bool;
}

/// In-memory catalog with a fixed entry set.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    refusal: BTreeSet<String>,
    seizure: BTreeSet<String>,
}

impl InMemoryCatalog {
    /// An empty catalog (rejects everything).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog seeded with common refusal and seizure reasons.
    #[must_use]
    pub fn seeded() -> Self {
        let refusal = [
            "Présence de souillures",
            "Odeur anormale",
            "Couleur anormale",
            "Délai de livraison trop long",
            "Défaut d'éviscération",
            "Bracelet illisible",
        ];
        let seizure = [
            "Abcès multiples",
            "Tuberculose",
            "Souillure étendue",
            "Cachexie",
            "Putréfaction",
            "Lésions parasitaires",
        ];
        Self {
            refusal: refusal.iter().map(ToString::to_string).collect(),
            seizure: seizure.iter().map(ToString::to_string).collect(),
        }
    }

    /// Adds a refusal reason.
    pub fn add_refusal_reason(&mut self, reason: impl Into<String>) {
        self.refusal.insert(reason.into());
    }

    /// Adds a seizure reason.
    pub fn add_seizure_reason(&mut self, reason: impl Into<String>) {
        self.seizure.insert(reason.into());
    }
}

impl ReasonCatalog for InMemoryCatalog {
    fn is_refusal_reason(&self, reason: &str) -> bool {
        self.refusal.contains(reason)
    }

    fn is_seizure_reason(&self, reason: &str) -> bool {
        self.seizure.contains(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_catalog_answers_membership() {
        let catalog = InMemoryCatalog::seeded();
        assert!(catalog.is_refusal_reason("Présence de souillures"));
        assert!(!catalog.is_refusal_reason("pas une raison"));
        assert!(catalog.is_seizure_reason("Tuberculose"));
        assert!(!catalog.is_seizure_reason("Présence de souillures"));
    }

    #[test]
    fn catalog_is_extensible() {
        let mut catalog = InMemoryCatalog::new();
        assert!(!catalog.is_refusal_reason("Conditionnement défectueux"));
        catalog.add_refusal_reason("Conditionnement défectueux");
        assert!(catalog.is_refusal_reason("Conditionnement défectueux"));
    }
}
