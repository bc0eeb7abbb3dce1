use serde::{Deserialize, Serialize};

/// Placeholder some frameworks append to categorical value lists for "anything
/// else". It is never declared as a factor level and is dumped as missing.
pub const UNKNOWN_CATEGORY: &str = "__unknown__";

/// Prefix applied to names the engine would reject as identifiers.
const NAME_PREFIX: char = 'X';

/// Rewrites a name the engine cannot use as an identifier.
///
/// Names starting with a digit, an underscore, or a dot followed by a digit get
/// an `X` prefix. The result never needs another prefix, so the transform is
/// idempotent.
#[must_use]
pub fn sanitize_name(name: &str) -> String {
    let mut chars = name.chars();
    let needs_prefix = match (chars.next(), chars.next()) {
        (Some(first), _) if first.is_ascii_digit() || first == '_' => true,
        (Some('.'), Some(second)) => second.is_ascii_digit(),
        _ => false,
    };
    if needs_prefix {
        format!("{NAME_PREFIX}{name}")
    } else {
        name.to_string()
    }
}

/// Kind of an attribute as declared by the serving framework.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AttributeKind {
    /// Real-valued column.
    Numeric,
    /// Factor column; the order of `values` defines the factor levels.
    Categorical {
        /// Ordered level names.
        values: Vec<String>,
    },
    /// Any framework kind the engine cannot represent (dates, free text, ...).
    #[serde(other)]
    Unsupported,
}

/// Named model attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    /// Name as known by the framework.
    pub name: String,
    /// Column kind.
    #[serde(flatten)]
    pub kind: AttributeKind,
}

impl Attribute {
    /// Numeric attribute.
    #[must_use]
    pub fn numeric(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: AttributeKind::Numeric,
        }
    }

    /// Categorical attribute with ordered values.
    #[must_use]
    pub fn categorical<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            kind: AttributeKind::Categorical {
                values: values.into_iter().map(Into::into).collect(),
            },
        }
    }

    /// Name as emitted into engine programs.
    #[must_use]
    pub fn engine_name(&self) -> String {
        sanitize_name(&self.name)
    }

    /// Whether the attribute is categorical.
    #[must_use]
    pub const fn is_categorical(&self) -> bool {
        matches!(self.kind, AttributeKind::Categorical { .. })
    }

    /// Declared factor levels, placeholder excluded. Empty for non-categoricals.
    #[must_use]
    pub fn levels(&self) -> Vec<&str> {
        match &self.kind {
            AttributeKind::Categorical { values } => values
                .iter()
                .map(String::as_str)
                .filter(|value| *value != UNKNOWN_CATEGORY)
                .collect(),
            _ => Vec::new(),
        }
    }
}
