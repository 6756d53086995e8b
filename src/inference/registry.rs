use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use chrono::{DateTime, Utc, serde::ts_seconds};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::catalog::{Catalog, Domain};
use super::classifier::Classifier;
use super::error::{CascadeError, Result};
use super::resnet::ResNetClassifier;

/// File names of the artifacts inside the models directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactNaming {
    /// File holding the router
    pub router_file: String,
    /// Appended to the domain name to form each domain model's file name
    pub domain_suffix: String,
}

impl Default for ArtifactNaming {
    fn default() -> Self {
        Self {
            router_file: "General_Model.gguf".to_string(),
            domain_suffix: "_Model.gguf".to_string(),
        }
    }
}

impl ArtifactNaming {
    pub fn domain_file(&self, domain: Domain) -> String {
        format!("{}{}", domain.as_str(), self.domain_suffix)
    }
}

/// Which cascade stage a model serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelRole {
    Router,
    Domain,
}

/// Descriptive information about a loaded model, for listings and the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDetails {
    /// Stage the model serves
    pub role: ModelRole,
    /// Domain served; absent for the router
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<Domain>,
    /// Human-readable model name
    pub name: String,
    /// Backend architecture
    pub architecture: String,
    /// Output labels, in score order
    pub labels: Vec<String>,
    /// Artifact the model was read from; absent for in-memory classifiers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Number of tensors in the artifact
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tensor_count: Option<usize>,
    /// When the model was loaded
    #[serde(with = "ts_seconds")]
    pub loaded_at: DateTime<Utc>,
}

/// A classifier together with where it came from
struct Entry {
    classifier: Box<dyn Classifier>,
    name: String,
    path: Option<PathBuf>,
    tensor_count: Option<usize>,
}

impl Entry {
    fn from_resnet(model: ResNetClassifier) -> Self {
        Self {
            name: model.name().to_string(),
            path: Some(model.path().to_path_buf()),
            tensor_count: Some(model.tensor_count()),
            classifier: Box::new(model),
        }
    }

    fn in_memory(name: String, classifier: Box<dyn Classifier>) -> Self {
        Self {
            classifier,
            name,
            path: None,
            tensor_count: None,
        }
    }

    /// Path used in error reports
    fn origin(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("<in-memory {}>", self.name)))
    }
}

/// Holds the router and one classifier per catalog domain.
///
/// Construction validates everything up front: every catalog domain has a
/// model and every model's output size matches its catalog. A registry that
/// exists is therefore complete, and nothing in it changes afterwards.
pub struct ModelRegistry {
    catalog: Catalog,
    router: Box<dyn Classifier>,
    domain_models: BTreeMap<Domain, Box<dyn Classifier>>,
    details: Vec<ModelDetails>,
}

impl ModelRegistry {
    /// Loads the router and every domain model from `models_dir`.
    ///
    /// Domain models are read in parallel. The first failure, in catalog
    /// order, is returned and nothing is kept.
    ///
    /// # Arguments
    ///
    /// * `models_dir` - Directory holding the artifacts
    /// * `catalog` - Domain order and class lists the artifacts must match
    /// * `naming` - Artifact file names
    pub fn load(models_dir: &Path, catalog: Catalog, naming: &ArtifactNaming) -> Result<Self> {
        if !models_dir.is_dir() {
            return Err(CascadeError::load(models_dir, "models directory not found"));
        }

        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{prefix:.bold.dim} {spinner} {wide_msg}") {
            pb.set_style(style);
        }
        pb.enable_steady_tick(Duration::from_millis(120));
        pb.set_message(format!("Loading router from {}...", naming.router_file));

        info!("Loading models from {}", models_dir.display());
        let router = match ResNetClassifier::load(models_dir.join(&naming.router_file)) {
            Ok(router) => router,
            Err(e) => {
                pb.finish_with_message("Router failed to load");
                error!("{}", e);
                return Err(e);
            }
        };

        pb.set_message(format!("Loading {} domain models...", catalog.len()));
        let loaded: Vec<(Domain, Result<ResNetClassifier>)> = catalog
            .domains()
            .par_iter()
            .map(|domain| (*domain, ResNetClassifier::load(models_dir.join(naming.domain_file(*domain)))))
            .collect();

        let mut domain_entries = Vec::with_capacity(loaded.len());
        for (domain, result) in loaded {
            match result {
                Ok(model) => domain_entries.push((domain, Entry::from_resnet(model))),
                Err(e) => {
                    pb.finish_with_message(format!("Failed to load {} model", domain));
                    error!("{}", e);
                    return Err(e);
                }
            }
        }

        let registry = Self::assemble(catalog, Entry::from_resnet(router), domain_entries);
        match &registry {
            Ok(r) => pb.finish_with_message(format!("Loaded {} models", r.details.len())),
            Err(e) => {
                pb.finish_with_message("Model validation failed");
                error!("{}", e);
            }
        }
        registry
    }

    /// Builds a registry from classifiers constructed elsewhere, with the
    /// same validation as [`ModelRegistry::load`].
    pub fn from_classifiers(
        catalog: Catalog,
        router: Box<dyn Classifier>,
        domain_models: Vec<(Domain, Box<dyn Classifier>)>,
    ) -> Result<Self> {
        let router = Entry::in_memory("router".to_string(), router);
        let domain_entries = domain_models
            .into_iter()
            .map(|(domain, classifier)| (domain, Entry::in_memory(domain.to_string(), classifier)))
            .collect();
        Self::assemble(catalog, router, domain_entries)
    }

    fn assemble(catalog: Catalog, router: Entry, domain_entries: Vec<(Domain, Entry)>) -> Result<Self> {
        if router.classifier.num_classes() != catalog.len() {
            return Err(CascadeError::load(
                router.origin(),
                format!(
                    "router produces {} scores but the catalog has {} domains",
                    router.classifier.num_classes(),
                    catalog.len()
                ),
            ));
        }

        let loaded_at = Utc::now();
        let mut details = vec![ModelDetails {
            role: ModelRole::Router,
            domain: None,
            name: router.name.clone(),
            architecture: router.classifier.architecture().to_string(),
            labels: catalog.domains().iter().map(|d| d.to_string()).collect(),
            path: router.path.clone(),
            tensor_count: router.tensor_count,
            loaded_at,
        }];

        let mut domain_models = BTreeMap::new();
        for (domain, entry) in domain_entries {
            let classes = catalog.classes(domain).map_err(|_| {
                CascadeError::load(entry.origin(), format!("{} is not in the catalog", domain))
            })?;
            if entry.classifier.num_classes() != classes.len() {
                return Err(CascadeError::load(
                    entry.origin(),
                    format!(
                        "{} model produces {} scores but its catalog has {} classes",
                        domain,
                        entry.classifier.num_classes(),
                        classes.len()
                    ),
                ));
            }
            if domain_models.contains_key(&domain) {
                return Err(CascadeError::load(entry.origin(), format!("second model supplied for {}", domain)));
            }

            details.push(ModelDetails {
                role: ModelRole::Domain,
                domain: Some(domain),
                name: entry.name.clone(),
                architecture: entry.classifier.architecture().to_string(),
                labels: classes.to_vec(),
                path: entry.path.clone(),
                tensor_count: entry.tensor_count,
                loaded_at,
            });
            domain_models.insert(domain, entry.classifier);
        }

        if let Some(missing) = catalog.domains().iter().find(|d| !domain_models.contains_key(*d)) {
            return Err(CascadeError::load(
                PathBuf::from(missing.as_str()),
                format!("no model supplied for {}", missing),
            ));
        }

        // Router first, then domains in catalog order
        details[1..].sort_by_key(|d| d.domain.and_then(|domain| catalog.index_of(domain)));

        info!("Model registry ready: router + {} domain models", domain_models.len());
        Ok(Self {
            catalog,
            router: router.classifier,
            domain_models,
            details,
        })
    }

    /// The stage-one classifier
    pub fn router(&self) -> &dyn Classifier {
        self.router.as_ref()
    }

    /// The stage-two classifier for `domain`.
    ///
    /// # Errors
    /// `UnknownDomain` if the domain is not part of this registry's catalog.
    pub fn for_domain(&self, domain: Domain) -> Result<&dyn Classifier> {
        self.domain_models
            .get(&domain)
            .map(|c| &**c)
            .ok_or_else(|| CascadeError::UnknownDomain(domain.to_string()))
    }

    /// Maps a router output index to its domain
    pub fn domain_at(&self, index: usize) -> Result<Domain> {
        self.catalog.domain_at(index)
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Router first, then one entry per domain in catalog order
    pub fn details(&self) -> &[ModelDetails] {
        &self.details
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::preprocess::ImageTensor;

    struct Fixed(usize);

    impl Classifier for Fixed {
        fn num_classes(&self) -> usize {
            self.0
        }

        fn evaluate(&self, _input: &ImageTensor) -> Result<Vec<f32>> {
            Ok(vec![0.0; self.0])
        }
    }

    fn standard_models(catalog: &Catalog) -> Vec<(Domain, Box<dyn Classifier>)> {
        catalog
            .domains()
            .iter()
            .map(|d| (*d, Box::new(Fixed(d.standard_classes().len())) as Box<dyn Classifier>))
            .collect()
    }

    #[test]
    fn complete_registry_lists_router_then_domains() {
        let catalog = Catalog::standard();
        let registry = ModelRegistry::from_classifiers(catalog.clone(), Box::new(Fixed(5)), standard_models(&catalog)).unwrap();

        assert_eq!(registry.router().num_classes(), 5);
        let details = registry.details();
        assert_eq!(details.len(), 6);
        assert_eq!(details[0].role, ModelRole::Router);
        let order: Vec<Domain> = details[1..].iter().filter_map(|d| d.domain).collect();
        assert_eq!(order, Domain::ALL.to_vec());
        assert_eq!(registry.for_domain(Domain::BrainMri).unwrap().num_classes(), 4);
        assert_eq!(registry.domain_at(3).unwrap(), Domain::BreastCancer);
    }

    #[test]
    fn router_width_must_match_catalog() {
        let catalog = Catalog::standard();
        let result = ModelRegistry::from_classifiers(catalog.clone(), Box::new(Fixed(4)), standard_models(&catalog));
        assert!(matches!(result, Err(CascadeError::ModelLoad { .. })));
    }

    #[test]
    fn domain_width_must_match_class_list() {
        let catalog = Catalog::standard();
        let mut models = standard_models(&catalog);
        let brain = models.iter_mut().find(|(d, _)| *d == Domain::BrainMri).unwrap();
        brain.1 = Box::new(Fixed(3));
        let result = ModelRegistry::from_classifiers(catalog, Box::new(Fixed(5)), models);
        match result {
            Err(CascadeError::ModelLoad { reason, .. }) => assert!(reason.contains("Brain_MRI")),
            other => panic!("expected ModelLoad, got {:?}", other.err()),
        }
    }

    #[test]
    fn missing_and_duplicate_domains_are_rejected() {
        let catalog = Catalog::standard();
        let mut models = standard_models(&catalog);
        models.pop();
        assert!(matches!(
            ModelRegistry::from_classifiers(catalog.clone(), Box::new(Fixed(5)), models),
            Err(CascadeError::ModelLoad { .. })
        ));

        let mut models = standard_models(&catalog);
        models.push((Domain::BloodCancer, Box::new(Fixed(4))));
        assert!(matches!(
            ModelRegistry::from_classifiers(catalog, Box::new(Fixed(5)), models),
            Err(CascadeError::ModelLoad { .. })
        ));
    }

    #[test]
    fn missing_models_directory_is_a_load_error() {
        let result = ModelRegistry::load(
            Path::new("/nonexistent/medcascade/models"),
            Catalog::standard(),
            &ArtifactNaming::default(),
        );
        assert!(matches!(result, Err(CascadeError::ModelLoad { .. })));
    }

    #[test]
    fn artifact_names_follow_domain_names() {
        let naming = ArtifactNaming::default();
        assert_eq!(naming.domain_file(Domain::ChestXray), "Chest_Xray_Model.gguf");
        assert_eq!(naming.router_file, "General_Model.gguf");
    }
}
