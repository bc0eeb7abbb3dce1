//! Decoding of QAP1 expressions (`DT_SEXP` payloads).

use crate::{error::ProtocolError, qap};

/// Payload of a decoded expression.
#[derive(Debug, Clone, PartialEq)]
pub enum RValue {
    /// `NULL`.
    Null,
    /// Integer vector; `NA` kept as [`qap::NA_INTEGER`].
    Int(Vec<i32>),
    /// Double vector.
    Double(Vec<f64>),
    /// Character vector; `None` is `NA`.
    Str(Vec<Option<String>>),
    /// Logical vector; `None` is `NA`.
    Bool(Vec<Option<bool>>),
    /// Raw bytes.
    Raw(Vec<u8>),
    /// Symbol.
    Symbol(String),
    /// Generic vector or untagged list.
    List(Vec<Rexp>),
    /// Tagged pairlist.
    Tagged(Vec<(String, Rexp)>),
    /// Type the client does not interpret.
    Unsupported(u8),
}

/// A decoded expression with its attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Rexp {
    /// Payload.
    pub value: RValue,
    /// Attribute pairlist, in transport order.
    pub attributes: Vec<(String, Rexp)>,
}

impl Rexp {
    /// Expression without attributes.
    #[must_use]
    pub const fn plain(value: RValue) -> Self {
        Self {
            value,
            attributes: Vec::new(),
        }
    }

    /// Decodes one expression occupying all of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = Reader { buf: bytes, pos: 0 };
        reader.expression()
    }

    /// Attribute by name.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Self> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Whether the `class` attribute lists `class`.
    #[must_use]
    pub fn inherits(&self, class: &str) -> bool {
        self.attribute("class").is_some_and(|classes| {
            classes
                .strings()
                .iter()
                .any(|entry| entry.as_deref() == Some(class))
        })
    }

    /// Character payload, empty for other types.
    #[must_use]
    pub fn strings(&self) -> &[Option<String>] {
        match &self.value {
            RValue::Str(values) => values,
            _ => &[],
        }
    }

    /// Number of elements in the payload.
    #[must_use]
    pub fn len(&self) -> usize {
        match &self.value {
            RValue::Null | RValue::Unsupported(_) => 0,
            RValue::Symbol(_) => 1,
            RValue::Int(values) => values.len(),
            RValue::Double(values) => values.len(),
            RValue::Str(values) => values.len(),
            RValue::Bool(values) => values.len(),
            RValue::Raw(values) => values.len(),
            RValue::List(values) => values.len(),
            RValue::Tagged(values) => values.len(),
        }
    }

    /// Whether the payload has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short description such as `double[3]` used in diagnostics.
    #[must_use]
    pub fn shape(&self) -> String {
        let kind = match &self.value {
            RValue::Null => return "NULL".to_string(),
            RValue::Unsupported(code) => return format!("unsupported type {code}"),
            RValue::Symbol(name) => return format!("symbol {name}"),
            RValue::Int(_) => "integer",
            RValue::Double(_) => "double",
            RValue::Str(_) => "character",
            RValue::Bool(_) => "logical",
            RValue::Raw(_) => "raw",
            RValue::List(_) => "list",
            RValue::Tagged(_) => "pairlist",
        };
        let mut shape = format!("{kind}[{}]", self.len());
        if self.attribute("dim").is_some() {
            shape.push_str(" with dim");
        }
        shape
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn take(&mut self, count: usize) -> Result<&[u8], ProtocolError> {
        let end = self
            .pos
            .checked_add(count)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                ProtocolError::Decode(format!(
                    "need {count} bytes at offset {}, have {}",
                    self.pos,
                    self.buf.len() - self.pos
                ))
            })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, ProtocolError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn i32(&mut self) -> Result<i32, ProtocolError> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn f64(&mut self) -> Result<f64, ProtocolError> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(raw))
    }

    fn header(&mut self) -> Result<(u8, usize), ProtocolError> {
        let word = self.u32()?;
        let mut kind = word.to_le_bytes()[0];
        let mut len = u64::from(word >> 8);
        if kind & qap::XT_LARGE != 0 {
            len |= u64::from(self.u32()?) << 24;
            kind &= !qap::XT_LARGE;
        }
        let len = usize::try_from(len)
            .map_err(|_| ProtocolError::Decode(format!("expression length {len} too large")))?;
        Ok((kind, len))
    }

    fn expression(&mut self) -> Result<Rexp, ProtocolError> {
        let (kind, len) = self.header()?;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| ProtocolError::Decode(format!("expression of {len} bytes overruns payload")))?;

        let attributes = if kind & qap::XT_HAS_ATTR == 0 {
            Vec::new()
        } else {
            let attribute_list = self.expression()?;
            match attribute_list.value {
                RValue::Tagged(pairs) => pairs,
                _ => Vec::new(),
            }
        };

        if self.pos > end {
            return Err(ProtocolError::Decode(
                "attribute list exceeds its expression".to_string(),
            ));
        }

        let value = match kind & !qap::XT_HAS_ATTR {
            qap::XT_NULL => RValue::Null,
            qap::XT_INT => RValue::Int(vec![self.i32()?]),
            qap::XT_DOUBLE => RValue::Double(vec![self.f64()?]),
            qap::XT_STR => RValue::Str(vec![Some(self.c_string(end))]),
            qap::XT_SYMNAME => RValue::Symbol(self.c_string(end)),
            qap::XT_SYM => {
                let inner = self.expression()?;
                match inner.value {
                    RValue::Symbol(name) => RValue::Symbol(name),
                    RValue::Str(mut names) if !names.is_empty() => {
                        RValue::Symbol(names.swap_remove(0).unwrap_or_default())
                    }
                    _ => RValue::Symbol(String::new()),
                }
            }
            qap::XT_BOOL => {
                let byte = self.take(1)?[0];
                RValue::Bool(vec![logical(byte)])
            }
            qap::XT_ARRAY_INT => {
                let mut values = Vec::with_capacity(end.saturating_sub(self.pos) / 4);
                while self.pos + 4 <= end {
                    values.push(self.i32()?);
                }
                RValue::Int(values)
            }
            qap::XT_ARRAY_DOUBLE => {
                let mut values = Vec::with_capacity(end.saturating_sub(self.pos) / 8);
                while self.pos + 8 <= end {
                    values.push(self.f64()?);
                }
                RValue::Double(values)
            }
            qap::XT_ARRAY_STR => RValue::Str(self.string_array(end)),
            qap::XT_ARRAY_BOOL => {
                let count = self.count()?;
                let bytes = self.take(count)?;
                RValue::Bool(bytes.iter().map(|byte| logical(*byte)).collect())
            }
            qap::XT_RAW => {
                let count = self.count()?;
                RValue::Raw(self.take(count)?.to_vec())
            }
            qap::XT_VECTOR | qap::XT_VECTOR_EXP | qap::XT_LIST_NOTAG | qap::XT_LANG_NOTAG => {
                let mut items = Vec::new();
                while self.pos < end {
                    items.push(self.expression()?);
                }
                RValue::List(items)
            }
            qap::XT_LIST_TAG | qap::XT_LANG_TAG => {
                let mut pairs = Vec::new();
                while self.pos < end {
                    let value = self.expression()?;
                    let tag = self.expression()?;
                    let name = match tag.value {
                        RValue::Symbol(name) => name,
                        RValue::Str(mut names) if !names.is_empty() => {
                            names.swap_remove(0).unwrap_or_default()
                        }
                        _ => String::new(),
                    };
                    pairs.push((name, value));
                }
                RValue::Tagged(pairs)
            }
            other => RValue::Unsupported(other),
        };

        if self.pos > end {
            return Err(ProtocolError::Decode(format!(
                "expression of type {kind} read past its declared length"
            )));
        }
        self.pos = end;
        Ok(Rexp { value, attributes })
    }

    fn count(&mut self) -> Result<usize, ProtocolError> {
        let count = self.i32()?;
        usize::try_from(count)
            .map_err(|_| ProtocolError::Decode(format!("negative element count {count}")))
    }

    fn c_string(&mut self, end: usize) -> String {
        let bytes = &self.buf[self.pos..end];
        let text = bytes.split(|byte| *byte == 0).next().unwrap_or_default();
        let decoded = String::from_utf8_lossy(text).into_owned();
        self.pos = end;
        decoded
    }

    fn string_array(&mut self, end: usize) -> Vec<Option<String>> {
        let mut values = Vec::new();
        let mut rest = &self.buf[self.pos..end];
        while let Some(terminator) = rest.iter().position(|byte| *byte == 0) {
            let entry = &rest[..terminator];
            values.push(if entry == [0xff] {
                None
            } else {
                Some(String::from_utf8_lossy(entry).into_owned())
            });
            rest = &rest[terminator + 1..];
        }
        self.pos = end;
        values
    }
}

const fn logical(byte: u8) -> Option<bool> {
    match byte {
        0 => Some(false),
        1 => Some(true),
        _ => None,
    }
}
