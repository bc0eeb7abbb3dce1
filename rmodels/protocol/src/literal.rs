use std::fmt;

/// A value rendered into program text.
///
/// Every literal that ends up in a generated program goes through
/// its `Display` impl, so quoting rules live in one place.
#[derive(Debug, Clone, PartialEq)]
pub enum RLiteral {
    /// Character string, double-quoted.
    Text(String),
    /// Double.
    Number(f64),
    /// Integer, rendered with the `L` suffix.
    Integer(i64),
    /// `TRUE` or `FALSE`.
    Logical(bool),
    /// `NA`.
    Missing,
}

impl RLiteral {
    /// Shorthand for a text literal.
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// Renders a `c(...)` vector of literals.
    pub fn vector<'a>(items: impl IntoIterator<Item = &'a Self>) -> String {
        let parts: Vec<String> = items.into_iter().map(ToString::to_string).collect();
        format!("c({})", parts.join(", "))
    }

    /// Renders a `c(...)` vector of text literals.
    pub fn text_vector<S: AsRef<str>>(items: impl IntoIterator<Item = S>) -> String {
        let literals: Vec<Self> = items
            .into_iter()
            .map(|item| Self::text(item.as_ref()))
            .collect();
        Self::vector(&literals)
    }
}

impl fmt::Display for RLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => {
                f.write_str("\"")?;
                for ch in text.chars() {
                    match ch {
                        '\\' => f.write_str("\\\\")?,
                        '"' => f.write_str("\\\"")?,
                        '\n' => f.write_str("\\n")?,
                        '\r' => f.write_str("\\r")?,
                        '\t' => f.write_str("\\t")?,
                        other => write!(f, "{other}")?,
                    }
                }
                f.write_str("\"")
            }
            Self::Number(number) if number.is_nan() => f.write_str("NaN"),
            Self::Number(number) if number.is_infinite() => {
                f.write_str(if *number > 0.0 { "Inf" } else { "-Inf" })
            }
            Self::Number(number) => write!(f, "{number:?}"),
            Self::Integer(integer) => write!(f, "{integer}L"),
            Self::Logical(true) => f.write_str("TRUE"),
            Self::Logical(false) => f.write_str("FALSE"),
            Self::Missing => f.write_str("NA"),
        }
    }
}

const RESERVED: &[&str] = &[
    "if", "else", "repeat", "while", "function", "for", "next", "break", "TRUE", "FALSE", "NULL",
    "Inf", "NaN", "NA", "NA_integer_", "NA_real_", "NA_character_", "in",
];

/// Renders `name` as a symbol, back-quoting it when it is not syntactic.
#[must_use]
pub fn symbol(name: &str) -> String {
    if is_syntactic(name) {
        return name.to_string();
    }
    let mut quoted = String::with_capacity(name.len() + 2);
    quoted.push('`');
    for ch in name.chars() {
        match ch {
            '`' => quoted.push_str("\\`"),
            '\\' => quoted.push_str("\\\\"),
            other => quoted.push(other),
        }
    }
    quoted.push('`');
    quoted
}

fn is_syntactic(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    let leading_ok = match first {
        '.' => !chars.clone().next().is_some_and(|c| c.is_ascii_digit()),
        c => c.is_alphabetic(),
    };
    leading_ok
        && chars.all(|c| c.is_alphanumeric() || c == '.' || c == '_')
        && !RESERVED.contains(&name)
}
