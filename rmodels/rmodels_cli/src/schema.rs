use std::{fs, path::Path};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use rmodels_schema::{keys, Attribute, FieldValue, ModelConfiguration};
use serde::Deserialize;

/// Model schema file.
///
/// ```toml
/// class_index = 2
///
/// [[attributes]]
/// name = "A1"
/// values = ["a", "b"]
///
/// [[attributes]]
/// name = "A2"
///
/// [[attributes]]
/// name = "class"
/// values = ["0", "1"]
///
/// [properties]
/// libraries = "randomForest"
/// ```
#[derive(Debug, Deserialize)]
pub struct SchemaFile {
    pub class_index: usize,
    pub attributes: Vec<AttributeEntry>,
    #[serde(default)]
    pub properties: IndexMap<String, String>,
}

/// One attribute; declaring `values` makes it categorical.
#[derive(Debug, Deserialize)]
pub struct AttributeEntry {
    pub name: String,
    #[serde(default)]
    pub values: Option<Vec<String>>,
}

impl SchemaFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading schema {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing schema {}", path.display()))
    }

    pub fn into_configuration(self) -> ModelConfiguration {
        let attributes = self
            .attributes
            .into_iter()
            .map(|entry| match entry.values {
                Some(values) => Attribute::categorical(entry.name, values),
                None => Attribute::numeric(entry.name),
            })
            .collect();
        let mut config = ModelConfiguration::new(attributes, self.properties);
        config.set_property(keys::CLASS_INDEX, self.class_index.to_string());
        config
    }
}

pub fn load_configuration(path: &Path) -> Result<ModelConfiguration> {
    let config = SchemaFile::load(path)?.into_configuration();
    config
        .validate()
        .with_context(|| format!("validating schema {}", path.display()))?;
    Ok(config)
}

/// Splits `a,3.5,?` into field values.
pub fn parse_row(raw: &str) -> Vec<FieldValue> {
    raw.split(',').map(FieldValue::parse_lenient).collect()
}

/// Reads comma-separated instances, skipping blank lines and `#` comments.
pub fn read_instances(path: &Path) -> Result<Vec<Vec<FieldValue>>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading instances {}", path.display()))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(parse_row)
        .collect())
}
