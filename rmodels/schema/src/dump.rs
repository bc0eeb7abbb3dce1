//! Tabular instance dump (ARFF) read by the engine-side training script.
//!
//! ```text
//! @relation 'rmodels-training'
//!
//! @attribute 'A1' {'a','b'}
//! @attribute 'A2' REAL
//! @attribute 'class' {'0','1'}
//!
//! @data
//! 'a',3.5,'0'
//! ?,1.25,'1'
//! ```

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use crate::{
    attribute::{Attribute, AttributeKind, UNKNOWN_CATEGORY},
    error::SchemaError,
    value::FieldValue,
};

/// Token for missing values.
pub const MISSING_TOKEN: &str = "?";

/// Default relation name.
pub const DEFAULT_RELATION: &str = "rmodels-training";

/// Instance dump written to disk.
#[derive(Debug, Clone)]
pub struct InstanceDump {
    path: PathBuf,
    rows: usize,
}

impl InstanceDump {
    /// Writes `rows` to `path` under the default relation name.
    pub fn create(
        path: impl Into<PathBuf>,
        attributes: &[Attribute],
        rows: &[Vec<FieldValue>],
    ) -> Result<Self, SchemaError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(&path)?);
        write_instances(&mut writer, DEFAULT_RELATION, attributes, rows)?;
        writer.flush()?;
        Ok(Self {
            path,
            rows: rows.len(),
        })
    }

    /// Location of the dump.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of data rows written.
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }
}

/// Writes header and data sections to `writer`.
pub fn write_instances<W: Write>(
    writer: &mut W,
    relation: &str,
    attributes: &[Attribute],
    rows: &[Vec<FieldValue>],
) -> Result<(), SchemaError> {
    writeln!(writer, "@relation {}", quote(relation))?;
    writeln!(writer)?;
    for attribute in attributes {
        let declaration = match &attribute.kind {
            AttributeKind::Numeric => "REAL".to_string(),
            AttributeKind::Categorical { .. } => {
                let levels: Vec<String> = attribute.levels().into_iter().map(quote).collect();
                format!("{{{}}}", levels.join(","))
            }
            AttributeKind::Unsupported => {
                return Err(SchemaError::UnsupportedKind(attribute.name.clone()))
            }
        };
        writeln!(
            writer,
            "@attribute {} {declaration}",
            quote(&attribute.engine_name())
        )?;
    }
    writeln!(writer)?;
    writeln!(writer, "@data")?;
    for (index, row) in rows.iter().enumerate() {
        if row.len() != attributes.len() {
            return Err(SchemaError::RowArity {
                row: index,
                expected: attributes.len(),
                found: row.len(),
            });
        }
        let cells: Vec<String> = row.iter().map(render_cell).collect();
        writeln!(writer, "{}", cells.join(","))?;
    }
    Ok(())
}

fn render_cell(value: &FieldValue) -> String {
    match value {
        FieldValue::Missing => MISSING_TOKEN.to_string(),
        FieldValue::Integer(integer) => integer.to_string(),
        FieldValue::Number(number) if number.is_finite() => number.to_string(),
        FieldValue::Number(_) => MISSING_TOKEN.to_string(),
        FieldValue::Text(text) if text == UNKNOWN_CATEGORY => MISSING_TOKEN.to_string(),
        FieldValue::Text(text) => quote(text),
    }
}

fn quote(raw: &str) -> String {
    let mut quoted = String::with_capacity(raw.len() + 2);
    quoted.push('\'');
    for ch in raw.chars() {
        match ch {
            '\\' => quoted.push_str("\\\\"),
            '\'' => quoted.push_str("\\'"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            other => quoted.push(other),
        }
    }
    quoted.push('\'');
    quoted
}
