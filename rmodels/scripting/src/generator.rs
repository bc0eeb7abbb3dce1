use rmodels_protocol::RLiteral;
use rmodels_schema::{keys, Attribute, AttributeKind, FieldValue, ModelConfiguration};

use crate::error::ScriptError;

/// Training function used when `train.function` is unset.
pub const DEFAULT_TRAIN_FUNCTION: &str = "randomForest";
/// Library loaded when `libraries` is unset.
pub const DEFAULT_LIBRARY: &str = "randomForest";
/// Prediction arguments used when `predict.function.arguments` is unset.
pub const DEFAULT_PREDICT_ARGUMENTS: &str = "type = \"prob\"";
/// Location of the training-time factor levels inside the model object.
pub const DEFAULT_LEVELS_TABLE: &str = "forest$xlevels";

/// Program generator bound to one validated configuration.
///
/// Construction validates the configuration, so an attribute of unsupported
/// kind or a bad class index fails before any program text exists.
#[derive(Debug, Clone)]
pub struct ScriptGenerator<'a> {
    pub(crate) config: &'a ModelConfiguration,
    pub(crate) class_index: usize,
}

impl<'a> ScriptGenerator<'a> {
    /// Validates `config` and binds a generator to it.
    pub fn new(config: &'a ModelConfiguration) -> Result<Self, ScriptError> {
        config.validate()?;
        let class_index = config.class_index()?;
        let generator = Self {
            config,
            class_index,
        };
        generator.libraries()?;
        generator.levels_table()?;
        Ok(generator)
    }

    /// The bound configuration.
    #[must_use]
    pub const fn config(&self) -> &'a ModelConfiguration {
        self.config
    }

    /// Predictors in declaration order, class attribute excluded.
    pub fn predictors(&self) -> impl Iterator<Item = &'a Attribute> + 'a {
        let class_index = self.class_index;
        self.config
            .attributes
            .iter()
            .enumerate()
            .filter(move |(index, _)| *index != class_index)
            .map(|(_, attribute)| attribute)
    }

    /// The class attribute.
    #[must_use]
    pub fn class_attribute(&self) -> &'a Attribute {
        &self.config.attributes[self.class_index]
    }

    /// Sanitized names of all attributes, in order.
    #[must_use]
    pub fn engine_names(&self) -> Vec<String> {
        self.config
            .attributes
            .iter()
            .map(Attribute::engine_name)
            .collect()
    }

    /// Sanitized predictor names, in order.
    #[must_use]
    pub fn predictor_names(&self) -> Vec<String> {
        self.predictors().map(Attribute::engine_name).collect()
    }

    /// One-based predictor columns of the given kind.
    #[must_use]
    pub fn columns_where(&self, categorical: bool) -> Vec<i64> {
        self.predictors()
            .zip(1_i64..)
            .filter(|(attribute, _)| attribute.is_categorical() == categorical)
            .map(|(_, column)| column)
            .collect()
    }

    /// Libraries to load, falling back to the default trainer's package.
    pub fn libraries(&self) -> Result<Vec<String>, ScriptError> {
        let libraries = self
            .config
            .libraries()
            .unwrap_or_else(|| vec![DEFAULT_LIBRARY.to_string()]);
        for library in &libraries {
            if !library
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
            {
                return Err(ScriptError::InvalidProperty {
                    key: keys::LIBRARIES,
                    value: library.clone(),
                    reason: "library names may only contain letters, digits, '.' and '_'",
                });
            }
        }
        Ok(libraries)
    }

    /// Path of the factor level table inside the model object.
    pub fn levels_table(&self) -> Result<&'a str, ScriptError> {
        let table = self
            .config
            .property(keys::LEVELS_TABLE)
            .unwrap_or(DEFAULT_LEVELS_TABLE);
        let valid = table.split('$').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
        });
        if valid {
            Ok(table)
        } else {
            Err(ScriptError::InvalidProperty {
                key: keys::LEVELS_TABLE,
                value: table.to_string(),
                reason: "expected a `$`-separated path such as forest$xlevels",
            })
        }
    }

    /// Training function name.
    #[must_use]
    pub fn train_function(&self) -> &'a str {
        self.config
            .property(keys::TRAIN_FUNCTION)
            .unwrap_or(DEFAULT_TRAIN_FUNCTION)
    }

    /// Renders a scoring row as a vector literal.
    ///
    /// Text is quoted, missing values become `NA` and numbers keep their
    /// literal form. Text equal to the unknown placeholder is sent as `NA`.
    pub fn row_literal(&self, row: &[FieldValue]) -> Result<String, ScriptError> {
        let expected = self.predictors().count();
        if row.len() != expected {
            return Err(ScriptError::RowArity {
                expected,
                found: row.len(),
            });
        }
        let literals: Vec<RLiteral> = row.iter().map(field_literal).collect();
        Ok(RLiteral::vector(&literals))
    }
}

fn field_literal(value: &FieldValue) -> RLiteral {
    match value {
        FieldValue::Missing => RLiteral::Missing,
        FieldValue::Integer(integer) => RLiteral::Integer(*integer),
        FieldValue::Number(number) if number.is_finite() => RLiteral::Number(*number),
        FieldValue::Number(_) => RLiteral::Missing,
        FieldValue::Text(text) if text == rmodels_schema::UNKNOWN_CATEGORY => RLiteral::Missing,
        FieldValue::Text(text) => RLiteral::text(text.as_str()),
    }
}

pub(crate) fn levels_literal(attribute: &Attribute) -> String {
    match &attribute.kind {
        AttributeKind::Categorical { .. } => RLiteral::text_vector(attribute.levels()),
        _ => "NULL".to_string(),
    }
}
