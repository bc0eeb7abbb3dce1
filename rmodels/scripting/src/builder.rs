use std::fmt::{self, Display};

use rmodels_protocol::symbol;

const INDENT: &str = "  ";

/// Accumulates program lines with block indentation.
#[derive(Debug, Clone, Default)]
pub struct RScript {
    lines: Vec<String>,
    depth: usize,
}

impl RScript {
    /// Empty program.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one statement at the current depth.
    pub fn line(&mut self, statement: impl Display) -> &mut Self {
        let indent = INDENT.repeat(self.depth);
        self.lines.push(format!("{indent}{statement}"));
        self
    }

    /// Appends `target <- value`.
    pub fn assign(&mut self, target: impl Display, value: impl Display) -> &mut Self {
        self.line(format_args!("{target} <- {value}"))
    }

    /// Appends a `library(...)` call.
    pub fn library(&mut self, name: &str) -> &mut Self {
        self.line(format_args!("library({})", symbol(name)))
    }

    /// Appends `opening` and indents until the matching [`RScript::close`].
    pub fn open(&mut self, opening: impl Display) -> &mut Self {
        self.line(opening);
        self.depth += 1;
        self
    }

    /// Dedents and appends `closing`.
    pub fn close(&mut self, closing: impl Display) -> &mut Self {
        self.depth = self.depth.saturating_sub(1);
        self.line(closing)
    }

    /// Appends user-supplied code verbatim, one line at a time.
    pub fn verbatim(&mut self, code: &str) -> &mut Self {
        for raw in code.replace("\r\n", "\n").lines() {
            if raw.trim().is_empty() {
                continue;
            }
            self.line(raw.trim_end());
        }
        self
    }

    /// Rendered program.
    #[must_use]
    pub fn finish(&self) -> String {
        self.to_string()
    }
}

impl Display for RScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

/// Renders `name(arg, arg, ...)`, skipping empty arguments.
#[must_use]
pub fn call<I, S>(name: &str, arguments: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let arguments: Vec<String> = arguments
        .into_iter()
        .map(|argument| argument.as_ref().trim().to_string())
        .filter(|argument| !argument.is_empty())
        .collect();
    format!("{name}({})", arguments.join(", "))
}
