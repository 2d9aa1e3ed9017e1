//! Map catalog: `*.txt` grids in a directory, each with an optional
//! sibling `*.json` document overriding world constants

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::map::{GridMap, MalformedMap};
use super::physics::{WorldConfig, WorldError};

/// A map ready to be handed to a run
#[derive(Debug, Clone)]
pub struct LoadedMap {
    pub name: String,
    pub map: GridMap,
    pub world: WorldConfig,
}

/// Map catalog errors
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Map not found: {0}")]
    UnknownMap(String),

    #[error("No maps found in {0}")]
    Empty(PathBuf),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Map {name} is malformed: {source}")]
    Malformed {
        name: String,
        #[source]
        source: MalformedMap,
    },

    #[error("Map {name} has invalid world constants: {source}")]
    InvalidWorld {
        name: String,
        #[source]
        source: WorldError,
    },
}

/// Maps available for a server's lifetime. The listing is taken once at startup.
#[derive(Debug, Clone)]
pub struct MapCatalog {
    dir: PathBuf,
    names: Vec<String>,
}

impl MapCatalog {
    /// List `*.txt` files in `dir`, sorted by name
    pub async fn scan(dir: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let dir = dir.as_ref().to_path_buf();
        let io_err = |source| CatalogError::Io {
            path: dir.clone(),
            source,
        };

        let mut entries = tokio::fs::read_dir(&dir).await.map_err(io_err)?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            if let Some(name) = entry.file_name().to_str() {
                if name.ends_with(".txt") {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();

        if names.is_empty() {
            return Err(CatalogError::Empty(dir));
        }

        debug!(dir = %dir.display(), maps = names.len(), "Scanned map catalog");
        Ok(Self { dir, names })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// `preferred` if it is in the catalog, else the first map
    pub fn initial<'a>(&'a self, preferred: &'a str) -> &'a str {
        if self.contains(preferred) {
            preferred
        } else {
            &self.names[0]
        }
    }

    /// Read and parse a map plus its world constants
    pub async fn load(&self, name: &str) -> Result<LoadedMap, CatalogError> {
        if !self.contains(name) {
            return Err(CatalogError::UnknownMap(name.to_string()));
        }

        let path = self.dir.join(name);
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| CatalogError::Io { path, source })?;
        let map = GridMap::parse(&text).map_err(|source| CatalogError::Malformed {
            name: name.to_string(),
            source,
        })?;

        let world = self.load_world(name).await;
        world
            .validate()
            .map_err(|source| CatalogError::InvalidWorld {
                name: name.to_string(),
                source,
            })?;

        Ok(LoadedMap {
            name: name.to_string(),
            map,
            world,
        })
    }

    /// Missing or unreadable documents fall back to the default world
    async fn load_world(&self, name: &str) -> WorldConfig {
        let stem = name.strip_suffix(".txt").unwrap_or(name);
        let path = self.dir.join(format!("{stem}.json"));

        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return WorldConfig::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read world constants");
                return WorldConfig::default();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(world) => world,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Invalid world constants, using defaults");
                WorldConfig::default()
            }
        }
    }
}
