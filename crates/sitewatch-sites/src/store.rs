//! Storage for site monitor configurations.
//!
//! Two stores share the same validation:
//! - [`MemoryConfigStore`] keeps configs in process
//! - [`JsonConfigStore`] snapshots every change to `sites.json`

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Result, SiteError};
use crate::types::{SiteConfigPatch, SiteMonitorConfig};

/// File name used by [`JsonConfigStore`].
pub const SITES_FILE: &str = "sites.json";

/// CRUD access to site monitor configurations.
pub trait SiteConfigStore: Send + Sync {
    /// Lists all configs ordered by ID.
    fn list(&self) -> Result<Vec<SiteMonitorConfig>>;

    /// Returns one config.
    fn get(&self, id: &str) -> Result<SiteMonitorConfig>;

    /// Adds a new config.
    ///
    /// Fails if the config is invalid, the ID is taken, or another active
    /// config already monitors the same site.
    fn add(&self, config: SiteMonitorConfig) -> Result<SiteMonitorConfig>;

    /// Applies a patch and returns the updated config.
    fn update(&self, id: &str, patch: &SiteConfigPatch) -> Result<SiteMonitorConfig>;

    /// Removes a config and returns it.
    fn delete(&self, id: &str) -> Result<SiteMonitorConfig>;

    /// Removes every config. Returns how many were removed.
    fn reset_all(&self) -> Result<usize>;
}

/// Validated set of configs keyed by ID.
#[derive(Debug, Clone, Default)]
struct Catalog {
    configs: BTreeMap<String, SiteMonitorConfig>,
}

impl Catalog {
    fn get(&self, id: &str) -> Result<&SiteMonitorConfig> {
        self.configs.get(id).ok_or_else(|| SiteError::NotFound { id: id.to_string() })
    }

    /// Rejects a config whose site is claimed by another active config.
    fn check_unique_site(&self, config: &SiteMonitorConfig) -> Result<()> {
        if !config.active {
            return Ok(());
        }
        let clash = self
            .configs
            .values()
            .find(|other| other.id != config.id && other.active && other.site_id == config.site_id);
        match clash {
            Some(existing) => Err(SiteError::DuplicateSite {
                site_id: config.site_id.clone(),
                existing_id: existing.id.clone(),
            }),
            None => Ok(()),
        }
    }

    fn add(&mut self, config: SiteMonitorConfig) -> Result<SiteMonitorConfig> {
        config.validate()?;
        if self.configs.contains_key(&config.id) {
            return Err(SiteError::AlreadyExists { id: config.id });
        }
        self.check_unique_site(&config)?;
        self.configs.insert(config.id.clone(), config.clone());
        Ok(config)
    }

    fn update(&mut self, id: &str, patch: &SiteConfigPatch) -> Result<SiteMonitorConfig> {
        let mut updated = self.get(id)?.clone();
        patch.apply(&mut updated);
        updated.validate()?;
        self.check_unique_site(&updated)?;
        self.configs.insert(id.to_string(), updated.clone());
        Ok(updated)
    }

    fn delete(&mut self, id: &str) -> Result<SiteMonitorConfig> {
        self.configs
            .remove(id)
            .ok_or_else(|| SiteError::NotFound { id: id.to_string() })
    }

    fn list(&self) -> Vec<SiteMonitorConfig> {
        self.configs.values().cloned().collect()
    }
}

/// In-process [`SiteConfigStore`].
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    catalog: Mutex<Catalog>,
}

impl MemoryConfigStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SiteConfigStore for MemoryConfigStore {
    fn list(&self) -> Result<Vec<SiteMonitorConfig>> {
        Ok(self.catalog.lock().list())
    }

    fn get(&self, id: &str) -> Result<SiteMonitorConfig> {
        self.catalog.lock().get(id).cloned()
    }

    fn add(&self, config: SiteMonitorConfig) -> Result<SiteMonitorConfig> {
        self.catalog.lock().add(config)
    }

    fn update(&self, id: &str, patch: &SiteConfigPatch) -> Result<SiteMonitorConfig> {
        self.catalog.lock().update(id, patch)
    }

    fn delete(&self, id: &str) -> Result<SiteMonitorConfig> {
        self.catalog.lock().delete(id)
    }

    fn reset_all(&self) -> Result<usize> {
        let mut catalog = self.catalog.lock();
        let removed = catalog.configs.len();
        catalog.configs.clear();
        Ok(removed)
    }
}

/// [`SiteConfigStore`] persisted as a JSON snapshot.
///
/// Each mutation is applied to a copy of the catalog, written to a temporary
/// file and renamed over the snapshot. The in-memory state only changes once
/// the write succeeded.
#[derive(Debug)]
pub struct JsonConfigStore {
    path: PathBuf,
    catalog: Mutex<Catalog>,
}

impl JsonConfigStore {
    /// Opens the store in `dir`, loading an existing snapshot if present.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(SITES_FILE);

        let configs: Vec<SiteMonitorConfig> = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&raw)?
            }
        } else {
            Vec::new()
        };

        let catalog = Catalog {
            configs: configs.into_iter().map(|c| (c.id.clone(), c)).collect(),
        };
        debug!(count = catalog.configs.len(), path = %path.display(), "loaded site configs from disk");

        Ok(Self {
            path,
            catalog: Mutex::new(catalog),
        })
    }

    /// Path of the snapshot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn snapshot(&self, catalog: &Catalog) -> Result<()> {
        let json = serde_json::to_string_pretty(&catalog.list())?;
        let tmp = self.path.with_extension("json.tmp");
        if let Err(e) = fs::write(&tmp, json).and_then(|()| fs::rename(&tmp, &self.path)) {
            warn!(error = %e, path = %self.path.display(), "failed to persist site configs");
            return Err(e.into());
        }
        Ok(())
    }

    /// Runs a mutation on a copy of the catalog and commits it after a
    /// successful snapshot.
    fn mutate<T>(&self, f: impl FnOnce(&mut Catalog) -> Result<T>) -> Result<T> {
        let mut guard = self.catalog.lock();
        let mut next = guard.clone();
        let out = f(&mut next)?;
        self.snapshot(&next)?;
        *guard = next;
        Ok(out)
    }
}

impl SiteConfigStore for JsonConfigStore {
    fn list(&self) -> Result<Vec<SiteMonitorConfig>> {
        Ok(self.catalog.lock().list())
    }

    fn get(&self, id: &str) -> Result<SiteMonitorConfig> {
        self.catalog.lock().get(id).cloned()
    }

    fn add(&self, config: SiteMonitorConfig) -> Result<SiteMonitorConfig> {
        let added = self.mutate(|catalog| catalog.add(config))?;
        info!(id = %added.id, site_id = %added.site_id, "site config added");
        Ok(added)
    }

    fn update(&self, id: &str, patch: &SiteConfigPatch) -> Result<SiteMonitorConfig> {
        self.mutate(|catalog| catalog.update(id, patch))
    }

    fn delete(&self, id: &str) -> Result<SiteMonitorConfig> {
        let removed = self.mutate(|catalog| catalog.delete(id))?;
        info!(id = %removed.id, site_id = %removed.site_id, "site config deleted");
        Ok(removed)
    }

    fn reset_all(&self) -> Result<usize> {
        let removed = self.mutate(|catalog| {
            let removed = catalog.configs.len();
            catalog.configs.clear();
            Ok(removed)
        })?;
        info!(removed, "all site configs reset");
        Ok(removed)
    }
}
