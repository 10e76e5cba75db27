//! Model directory registry.
//!
//! Maps an emodel name to its prepared, self-sufficient model directory and
//! its optimized parameters. Variant names such as `cADpyr_L5PC_legacy` are
//! normalized to their base name before lookup so every variant shares one
//! prepared directory.

use super::task::Parameters;
use crate::error::{MmError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Suffix tags that mark a variant of a base emodel.
pub const VARIANT_SUFFIXES: &[&str] = &["_legacy"];

/// Strip a variant suffix tag, returning the name the registry knows.
pub fn base_emodel_name(emodel: &str) -> &str {
    VARIANT_SUFFIXES
        .iter()
        .find_map(|suffix| emodel.strip_suffix(suffix))
        .filter(|base| !base.is_empty())
        .unwrap_or(emodel)
}

/// One emodel entry of `final.json`. Keys other than `params` are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct EmodelEntry {
    #[serde(default)]
    pub params: Option<Parameters>,
}

/// Contents of `final.json`: emodel name to entry.
pub type FinalDict = BTreeMap<String, EmodelEntry>;

/// Read `final.json`.
pub fn load_final_dict<P: AsRef<Path>>(path: P) -> Result<FinalDict> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| {
        MmError::Config(format!("cannot read '{}': {}", path.display(), e))
    })?;
    Ok(serde_json::from_str(&contents)?)
}

#[derive(Debug, Clone)]
struct RegisteredModel {
    dir: PathBuf,
    params: Option<Parameters>,
}

/// Read-only mapping from emodel name to model directory and parameters.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, RegisteredModel>,
}

impl ModelRegistry {
    /// Register `<emodels_dir>/<emodel>` for every emodel of `final_dict`
    /// whose directory exists.
    pub fn build(emodels_dir: &Path, final_dict: FinalDict) -> Result<Self> {
        let root = std::path::absolute(emodels_dir)?;
        let mut registry = Self::default();

        for (emodel, entry) in final_dict {
            let dir = root.join(&emodel);
            if !dir.is_dir() {
                warn!(
                    emodel = %emodel,
                    dir = %dir.display(),
                    "Model directory missing, emodel not registered"
                );
                continue;
            }
            registry.insert(emodel, dir, entry.params);
        }

        debug!(models = registry.len(), root = %root.display(), "Model registry built");
        Ok(registry)
    }

    /// Register a model directory directly.
    pub fn insert(&mut self, emodel: impl Into<String>, dir: PathBuf, params: Option<Parameters>) {
        self.models
            .insert(emodel.into(), RegisteredModel { dir, params });
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Resolve an emodel name (variant suffix allowed) to its model directory.
    pub fn resolve_dir(&self, emodel: &str) -> Result<&Path> {
        Ok(&self.lookup(emodel)?.dir)
    }

    /// Parameters of an emodel (variant suffix allowed).
    pub fn params(&self, emodel: &str) -> Result<&Parameters> {
        self.lookup(emodel)?
            .params
            .as_ref()
            .ok_or_else(|| MmError::MissingParameters(base_emodel_name(emodel).to_string()))
    }

    fn lookup(&self, emodel: &str) -> Result<&RegisteredModel> {
        let base = base_emodel_name(emodel);
        self.models.get(base).ok_or_else(|| MmError::ModelNotFound {
            emodel: emodel.to_string(),
            base: base.to_string(),
        })
    }
}
