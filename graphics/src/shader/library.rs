//! Shader function libraries.
//!
//! A [`ShaderLibrary`] is the set of compiled entry points a device can build
//! pipelines from. Pipeline creation looks functions up by name and fails
//! when one is missing, so a library stands in for a compiled shader archive.
//!
//! # Example
//!
//! ```ignore
//! let library = ShaderLibrary::new(
//!     "default",
//!     ["compositeVertexFunction", "compositeFragmentFunction"],
//! );
//! assert!(library.has_function("compositeVertexFunction"));
//! ```

use std::collections::BTreeSet;

/// A named collection of shader entry points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderLibrary {
    label: String,
    functions: BTreeSet<String>,
}

impl ShaderLibrary {
    /// Create a library exposing the given entry points.
    pub fn new<I, S>(label: impl Into<String>, functions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            label: label.into(),
            functions: functions.into_iter().map(Into::into).collect(),
        }
    }

    /// Library label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns true if the entry point exists.
    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains(name)
    }

    /// Names of all entry points, sorted.
    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.functions.iter().map(String::as_str)
    }

    /// Copy of this library without one entry point.
    pub fn without_function(&self, name: &str) -> Self {
        let mut library = self.clone();
        library.functions.remove(name);
        library
    }
}
