use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    attribute::{Attribute, AttributeKind},
    error::SchemaError,
};

/// Reserved property keys understood by the manager and the script generator.
pub mod keys {
    /// Comma-separated engine libraries loaded before training and scoring.
    pub const LIBRARIES: &str = "libraries";
    /// Training function name; defaults to the built-in random forest trainer.
    pub const TRAIN_FUNCTION: &str = "train.function";
    /// Path to engine code evaluated before the training call.
    pub const TRAIN_FILE: &str = "train.file";
    /// Extra arguments appended to the training call.
    pub const TRAIN_FUNCTION_ARGUMENTS: &str = "train.function.arguments";
    /// Path to engine code evaluated while the namespace is built.
    pub const PREDICT_FILE: &str = "predict.file";
    /// Arguments passed to the prediction call (default `type = "prob"`).
    pub const PREDICT_FUNCTION_ARGUMENTS: &str = "predict.function.arguments";
    /// Expression over `r` applied to the prediction before it is returned.
    pub const PREDICT_RESULT_TRANSFORM: &str = "predict.result.transform";
    /// Path inside the model object holding the training-time factor levels.
    pub const LEVELS_TABLE: &str = "levels.table";
    /// Zero-based index of the class attribute.
    pub const CLASS_INDEX: &str = "classIndex";
    /// Directory where artifacts of this model are stored.
    pub const MODEL_SAVE_PATH: &str = "model.save.location";
    /// Explicit model identifier (UUID).
    pub const ID: &str = "id";
}

/// Schema and engine knobs for one model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfiguration {
    /// Ordered attributes, class attribute included.
    pub attributes: Vec<Attribute>,
    /// Engine-specific properties (see [`keys`]).
    #[serde(default)]
    pub properties: IndexMap<String, String>,
}

impl ModelConfiguration {
    /// Creates a configuration.
    #[must_use]
    pub fn new(attributes: Vec<Attribute>, properties: IndexMap<String, String>) -> Self {
        Self {
            attributes,
            properties,
        }
    }

    /// Builder-style property setter.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_property(key, value);
        self
    }

    /// Builder-style class index setter.
    #[must_use]
    pub fn with_class_index(self, index: usize) -> Self {
        self.with_property(keys::CLASS_INDEX, index.to_string())
    }

    /// Sets a property, replacing any previous value.
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Property value, with blank values treated as unset.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    /// Zero-based class index.
    pub fn class_index(&self) -> Result<usize, SchemaError> {
        let raw = self
            .property(keys::CLASS_INDEX)
            .ok_or(SchemaError::MissingClassIndex)?;
        let index = raw
            .parse::<usize>()
            .map_err(|_| SchemaError::InvalidClassIndex(raw.to_string()))?;
        if index >= self.attributes.len() {
            return Err(SchemaError::ClassIndexOutOfRange {
                index,
                len: self.attributes.len(),
            });
        }
        Ok(index)
    }

    /// The class attribute.
    pub fn class_attribute(&self) -> Result<&Attribute, SchemaError> {
        Ok(&self.attributes[self.class_index()?])
    }

    /// Attributes fed to the model, class attribute excluded, in order.
    pub fn predictors(&self) -> Result<Vec<&Attribute>, SchemaError> {
        let class_index = self.class_index()?;
        Ok(self
            .attributes
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != class_index)
            .map(|(_, attribute)| attribute)
            .collect())
    }

    /// Libraries listed in [`keys::LIBRARIES`], trimmed, empty entries dropped.
    /// `None` when the property is unset.
    #[must_use]
    pub fn libraries(&self) -> Option<Vec<String>> {
        self.property(keys::LIBRARIES).map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|library| !library.is_empty())
                .map(ToOwned::to_owned)
                .collect()
        })
    }

    /// Explicit model identifier, if configured.
    pub fn model_id(&self) -> Result<Option<Uuid>, SchemaError> {
        self.property(keys::ID)
            .map(|raw| Uuid::parse_str(raw).map_err(|_| SchemaError::MalformedModelId(raw.into())))
            .transpose()
    }

    /// Checks names, kinds and the class index.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut seen = HashSet::new();
        let mut engine_names = HashSet::new();
        for (position, attribute) in self.attributes.iter().enumerate() {
            if attribute.name.trim().is_empty() {
                return Err(SchemaError::EmptyAttributeName(position));
            }
            if !seen.insert(attribute.name.as_str()) {
                return Err(SchemaError::DuplicateAttribute(attribute.name.clone()));
            }
            let engine_name = attribute.engine_name();
            if !engine_names.insert(engine_name.clone()) {
                return Err(SchemaError::DuplicateAttribute(format!(
                    "{} (engine name {engine_name})",
                    attribute.name
                )));
            }
            match &attribute.kind {
                AttributeKind::Numeric => {}
                AttributeKind::Categorical { values } => validate_levels(&attribute.name, values)?,
                AttributeKind::Unsupported => {
                    return Err(SchemaError::UnsupportedKind(attribute.name.clone()))
                }
            }
        }
        self.class_index().map(|_| ())
    }

    /// Merges a newer configuration into this one.
    ///
    /// Properties of `newer` override existing ones; the attribute list is
    /// replaced only when `newer` declares one.
    pub fn update(&mut self, newer: &Self) {
        if !newer.attributes.is_empty() {
            self.attributes.clone_from(&newer.attributes);
        }
        for (key, value) in &newer.properties {
            self.properties.insert(key.clone(), value.clone());
        }
    }
}

fn validate_levels(name: &str, values: &[String]) -> Result<(), SchemaError> {
    if values.is_empty() {
        return Err(SchemaError::InvalidCategorical {
            name: name.into(),
            reason: "no values declared".into(),
        });
    }
    let mut seen = HashSet::new();
    if let Some(repeated) = values.iter().find(|value| !seen.insert(value.as_str())) {
        return Err(SchemaError::InvalidCategorical {
            name: name.into(),
            reason: format!("value {repeated:?} declared twice"),
        });
    }
    Ok(())
}
