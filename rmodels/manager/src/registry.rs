use std::path::PathBuf;

use indexmap::IndexMap;
use rmodels_schema::ModelConfiguration;
use uuid::Uuid;

/// Everything the manager knows about one live model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRecord {
    /// Model identifier.
    pub id: Uuid,
    /// Engine-side binding derived from `id`.
    pub namespace: String,
    /// Current configuration.
    pub config: ModelConfiguration,
    /// Artifact loaded into the namespace.
    pub artifact_path: PathBuf,
    /// Whether the manager created the artifact and may delete it.
    pub artifact_owned: bool,
    /// Attribute-name sidecar written for trained models.
    pub header_path: Option<PathBuf>,
    /// Where the namespace's export function writes.
    pub export_path: PathBuf,
}

impl ModelRecord {
    /// Files deleted when the record goes away.
    #[must_use]
    pub fn owned_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::with_capacity(3);
        if self.artifact_owned {
            files.push(self.artifact_path.clone());
        }
        files.extend(self.header_path.iter().cloned());
        files.push(self.export_path.clone());
        files
    }
}

/// Insertion-ordered map from model identifier to record.
#[derive(Debug, Default)]
pub struct NamespaceRegistry {
    records: IndexMap<Uuid, ModelRecord>,
}

impl NamespaceRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: Uuid) -> bool {
        self.records.contains_key(&id)
    }

    /// Record of `id`.
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<&ModelRecord> {
        self.records.get(&id)
    }

    /// Registers or replaces a record.
    pub fn insert(&mut self, record: ModelRecord) -> Option<ModelRecord> {
        self.records.insert(record.id, record)
    }

    /// Unregisters `id`, keeping the order of the others.
    pub fn remove(&mut self, id: Uuid) -> Option<ModelRecord> {
        self.records.shift_remove(&id)
    }

    /// Removes and returns every record.
    pub fn drain(&mut self) -> Vec<ModelRecord> {
        self.records.drain(..).map(|(_, record)| record).collect()
    }

    /// Copy of every configuration keyed by identifier.
    #[must_use]
    pub fn snapshot(&self) -> IndexMap<Uuid, ModelConfiguration> {
        self.records
            .iter()
            .map(|(id, record)| (*id, record.config.clone()))
            .collect()
    }

    /// Registered identifiers in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.records.keys().copied()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no model is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
