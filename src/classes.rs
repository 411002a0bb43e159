//! Class name table.
//!
//! One class name per line; the zero-based line index is the class index the
//! detector reports. Surrounding whitespace is trimmed from each line.

use std::path::Path;

use anyhow::{anyhow, Context, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassNames {
    names: Vec<String>,
}

impl ClassNames {
    /// Read the table once at startup. A missing or empty file is fatal.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read class names from {}", path.display()))?;
        let table = Self::parse(&raw);
        if table.is_empty() {
            return Err(anyhow!("class name file {} is empty", path.display()));
        }
        Ok(table)
    }

    pub fn parse(raw: &str) -> Self {
        Self {
            names: raw.lines().map(|line| line.trim().to_string()).collect(),
        }
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Look up a class index.
    ///
    /// An index past the end of the table means the model and the table
    /// disagree; callers treat the error as fatal.
    pub fn name(&self, class_id: usize) -> Result<&str> {
        self.names.get(class_id).map(String::as_str).ok_or_else(|| {
            anyhow!(
                "class index {} out of range for {} class names",
                class_id,
                self.names.len()
            )
        })
    }

    /// Fail when a model can emit more classes than the table names.
    pub fn check_covers(&self, class_count: usize) -> Result<()> {
        if class_count > self.names.len() {
            return Err(anyhow!(
                "model emits {} classes but the class name table has {}",
                class_count,
                self.names.len()
            ));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
