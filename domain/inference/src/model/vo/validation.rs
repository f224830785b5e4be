use std::fmt;

/// Accumulated per-field validation messages, e.g. `resources.memory: ...`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(Vec<String>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: &str, message: impl fmt::Display) {
        self.0.push(format!("{field}: {message}"));
    }

    /// Merge errors of a nested section, prefixing each with `section.`.
    pub fn extend_nested(&mut self, section: &str, nested: FieldErrors) {
        self.0.extend(nested.0.into_iter().map(|e| format!("{section}.{e}")));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<String> {
        self.0
    }

    /// `Ok(value)` when nothing was collected.
    pub fn finish<T>(self, value: T) -> Result<T, FieldErrors> {
        if self.0.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("; "))
    }
}

impl std::error::Error for FieldErrors {}

impl From<Vec<String>> for FieldErrors {
    fn from(errors: Vec<String>) -> Self {
        Self(errors)
    }
}
