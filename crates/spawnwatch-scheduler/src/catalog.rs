//! JSON entity catalog: the static metadata seeded into the store at startup.
//!
//! An entry with several locations becomes one entity per location, named
//! `"<name> - <location>"`; the bare name is then stale and gets removed.

use std::path::Path;

use serde::Deserialize;
use spawnwatch_core::error::{Result, SpawnWatchError};

use crate::model::{Bounds, EntityMetadata};
use crate::persistence::StateStore;

/// `location` is either a list or a `|`-separated string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Locations {
    List(Vec<String>),
    Joined(String),
}

impl Locations {
    pub fn to_vec(&self) -> Vec<String> {
        let parts: Vec<&str> = match self {
            Locations::List(v) => v.iter().map(String::as_str).collect(),
            Locations::Joined(s) => s.split('|').collect(),
        };
        parts
            .into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }
}

/// One catalog entry as written in the JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    #[serde(default)]
    pub location: Option<Locations>,
    #[serde(default)]
    pub respawn_min_hours: Option<f64>,
    #[serde(default)]
    pub respawn_max_hours: Option<f64>,
    #[serde(default)]
    pub reset_respawn_min_hours: Option<f64>,
    #[serde(default)]
    pub reset_respawn_max_hours: Option<f64>,
}

fn checked_bounds(
    name: &str,
    field: &str,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<Option<Bounds>> {
    match Bounds::from_columns(min, max) {
        Some(b) if !b.is_valid() => Err(SpawnWatchError::Config(format!(
            "invalid catalog: {name}: {field} hours {}..{}",
            b.min_hours, b.max_hours
        ))),
        bounds => Ok(bounds),
    }
}

/// Expanded catalog ready for seeding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    pub entities: Vec<EntityMetadata>,
    /// Base names of multi-location entries.
    pub stale: Vec<String>,
}

impl Catalog {
    /// Fails on bounds that are negative, non-finite or reversed.
    pub fn from_entries(entries: Vec<CatalogEntry>) -> Result<Self> {
        let mut catalog = Catalog::default();
        for entry in entries {
            let normal = checked_bounds(
                &entry.name,
                "respawn",
                entry.respawn_min_hours,
                entry.respawn_max_hours,
            )?;
            let reset = checked_bounds(
                &entry.name,
                "reset_respawn",
                entry.reset_respawn_min_hours,
                entry.reset_respawn_max_hours,
            )?;
            let locations = entry.location.as_ref().map(Locations::to_vec).unwrap_or_default();

            if locations.len() > 1 {
                for loc in &locations {
                    let mut e = EntityMetadata::new(&format!("{} - {loc}", entry.name), normal, reset);
                    e.location = Some(loc.clone());
                    catalog.entities.push(e);
                }
                catalog.stale.push(entry.name);
            } else {
                let mut e = EntityMetadata::new(&entry.name, normal, reset);
                e.location = locations.into_iter().next();
                catalog.entities.push(e);
            }
        }
        Ok(catalog)
    }

    pub fn parse(json: &str) -> Result<Self> {
        let entries: Vec<CatalogEntry> = serde_json::from_str(json)
            .map_err(|e| SpawnWatchError::Config(format!("invalid catalog: {e}")))?;
        Self::from_entries(entries)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Seed into the store. Returns the number of newly inserted entities.
    pub fn seed(&self, store: &StateStore) -> Result<usize> {
        let inserted = store.seed_entities(&self.entities, &self.stale)?;
        tracing::info!(
            "📚 Catalog seeded: {} entities ({inserted} new, {} stale removed)",
            self.entities.len(),
            self.stale.len()
        );
        Ok(inserted)
    }
}
