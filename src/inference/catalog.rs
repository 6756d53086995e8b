//! Domain and class catalogs.
//!
//! The router's output index `i` means `catalog.domains()[i]`, and a domain
//! model's output index `j` means `catalog.classes(domain)[j]`. Both orders
//! are fixed at compile time for the standard catalog and must match the
//! order the models were trained with.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

use super::error::{CascadeError, Result};

/// Top-level clinical image category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Domain {
    #[serde(rename = "Blood_Cancer")]
    BloodCancer,
    #[serde(rename = "Bone_Fracture")]
    BoneFracture,
    #[serde(rename = "Brain_MRI")]
    BrainMri,
    #[serde(rename = "Breast_Cancer")]
    BreastCancer,
    #[serde(rename = "Chest_Xray")]
    ChestXray,
}

impl Domain {
    /// Every domain, in router output order
    pub const ALL: [Domain; 5] = [
        Domain::BloodCancer,
        Domain::BoneFracture,
        Domain::BrainMri,
        Domain::BreastCancer,
        Domain::ChestXray,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::BloodCancer => "Blood_Cancer",
            Domain::BoneFracture => "Bone_Fracture",
            Domain::BrainMri => "Brain_MRI",
            Domain::BreastCancer => "Breast_Cancer",
            Domain::ChestXray => "Chest_Xray",
        }
    }

    /// Class names of the domain model, in output order
    pub fn standard_classes(&self) -> &'static [&'static str] {
        match self {
            Domain::BloodCancer => &["benign", "early_pre-b", "pre-b", "pro-b"],
            Domain::BoneFracture => &["fractured", "not-fractured"],
            Domain::BrainMri => &["giloma_tumor", "meningioma_tumor", "no_tumor", "pituitary_tumor"],
            Domain::BreastCancer => &["idc", "non_idc"],
            Domain::ChestXray => &["normal", "pneumonia"],
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = CascadeError;

    fn from_str(s: &str) -> Result<Self> {
        Domain::ALL
            .iter()
            .copied()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| CascadeError::UnknownDomain(s.to_string()))
    }
}

/// Ordered domains plus the ordered class list of each one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    domains: Vec<Domain>,
    classes: BTreeMap<Domain, Vec<String>>,
}

impl Catalog {
    /// The five-domain catalog the shipped models were trained on
    pub fn standard() -> Self {
        let classes = Domain::ALL
            .iter()
            .map(|d| (*d, d.standard_classes().iter().map(|c| c.to_string()).collect()))
            .collect();
        Self {
            domains: Domain::ALL.to_vec(),
            classes,
        }
    }

    /// Builds a catalog and checks it is exhaustive: every listed domain has a
    /// non-empty class list, and no class list belongs to an unlisted domain.
    pub fn new(domains: Vec<Domain>, classes: BTreeMap<Domain, Vec<String>>) -> Result<Self> {
        if domains.is_empty() {
            return Err(CascadeError::InvalidCatalog("no domains".into()));
        }

        let mut seen = BTreeSet::new();
        for domain in &domains {
            if !seen.insert(*domain) {
                return Err(CascadeError::InvalidCatalog(format!("{} listed twice", domain)));
            }
            match classes.get(domain) {
                None => {
                    return Err(CascadeError::InvalidCatalog(format!("{} has no class list", domain)))
                }
                Some(list) if list.is_empty() => {
                    return Err(CascadeError::InvalidCatalog(format!("{} has an empty class list", domain)))
                }
                Some(list) => {
                    let unique: BTreeSet<&String> = list.iter().collect();
                    if unique.len() != list.len() {
                        return Err(CascadeError::InvalidCatalog(format!(
                            "{} has duplicate class names", domain
                        )));
                    }
                }
            }
        }

        if let Some(extra) = classes.keys().find(|d| !seen.contains(*d)) {
            return Err(CascadeError::InvalidCatalog(format!(
                "class list given for {} which is not in the domain order", extra
            )));
        }

        Ok(Self { domains, classes })
    }

    /// Domains in router output order
    pub fn domains(&self) -> &[Domain] {
        &self.domains
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Maps a router output index to its domain
    pub fn domain_at(&self, index: usize) -> Result<Domain> {
        self.domains
            .get(index)
            .copied()
            .ok_or_else(|| CascadeError::UnknownDomain(format!("router index {}", index)))
    }

    pub fn index_of(&self, domain: Domain) -> Option<usize> {
        self.domains.iter().position(|d| *d == domain)
    }

    pub fn classes(&self, domain: Domain) -> Result<&[String]> {
        self.classes
            .get(&domain)
            .map(Vec::as_slice)
            .ok_or_else(|| CascadeError::UnknownDomain(domain.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_catalog_matches_router_order() {
        let catalog = Catalog::standard();
        assert_eq!(catalog.len(), 5);
        assert_eq!(catalog.domain_at(2).unwrap(), Domain::BrainMri);
        assert_eq!(catalog.index_of(Domain::ChestXray), Some(4));
        assert_eq!(catalog.classes(Domain::BrainMri).unwrap().len(), 4);
        assert_eq!(catalog.classes(Domain::BoneFracture).unwrap()[1], "not-fractured");
    }

    #[test]
    fn out_of_range_index_is_unknown_domain() {
        let catalog = Catalog::standard();
        assert!(matches!(catalog.domain_at(5), Err(CascadeError::UnknownDomain(_))));
    }

    #[test]
    fn domain_names_round_trip_through_strings_and_serde() {
        for domain in Domain::ALL {
            assert_eq!(domain.as_str().parse::<Domain>().unwrap(), domain);
            let json = serde_json::to_string(&domain).unwrap();
            assert_eq!(json, format!("\"{}\"", domain.as_str()));
        }
        assert!(matches!("Knee_MRI".parse::<Domain>(), Err(CascadeError::UnknownDomain(_))));
    }

    #[test]
    fn catalog_must_be_exhaustive() {
        let mut classes = BTreeMap::new();
        classes.insert(Domain::ChestXray, vec!["normal".to_string(), "pneumonia".to_string()]);

        let missing = Catalog::new(vec![Domain::ChestXray, Domain::BrainMri], classes.clone());
        assert!(matches!(missing, Err(CascadeError::InvalidCatalog(_))));

        let extra = Catalog::new(vec![Domain::BrainMri], {
            let mut c = classes.clone();
            c.insert(Domain::BrainMri, vec!["no_tumor".to_string()]);
            c
        });
        assert!(matches!(extra, Err(CascadeError::InvalidCatalog(_))));

        let duplicate = Catalog::new(vec![Domain::ChestXray, Domain::ChestXray], classes.clone());
        assert!(matches!(duplicate, Err(CascadeError::InvalidCatalog(_))));

        let subset = Catalog::new(vec![Domain::ChestXray], classes).unwrap();
        assert_eq!(subset.domain_at(0).unwrap(), Domain::ChestXray);
    }
}
