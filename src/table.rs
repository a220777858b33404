//! Untyped CSV tables and header resolution for source files whose column
//! names drift between exports.

use std::collections::HashMap;

use csv::StringRecord;

use crate::error::PipelineError;

/// How to locate one logical field in a header row.
#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    pub field: &'static str,
    /// Header names matched case-insensitively after trimming.
    pub exact: &'static [&'static str],
    /// Substrings matched case-insensitively, tried after every exact name.
    pub contains: &'static [&'static str],
    pub required: bool,
}

impl ColumnSpec {
    pub const fn required(field: &'static str, exact: &'static [&'static str]) -> Self {
        Self {
            field,
            exact,
            contains: &[],
            required: true,
        }
    }

    pub const fn optional(field: &'static str, exact: &'static [&'static str]) -> Self {
        Self {
            field,
            exact,
            contains: &[],
            required: false,
        }
    }

    pub const fn containing(mut self, contains: &'static [&'static str]) -> Self {
        self.contains = contains;
        self
    }

    fn candidates(&self) -> String {
        self.exact
            .iter()
            .map(|name| format!("`{name}`"))
            .chain(self.contains.iter().map(|part| format!("*{part}*")))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn locate(&self, headers: &[String]) -> Option<usize> {
        for name in self.exact {
            let wanted = name.trim().to_lowercase();
            if let Some(index) = headers.iter().position(|header| *header == wanted) {
                return Some(index);
            }
        }
        for part in self.contains {
            let wanted = part.to_lowercase();
            if let Some(index) = headers.iter().position(|header| header.contains(&wanted)) {
                return Some(index);
            }
        }
        None
    }
}

/// Field name to column index mapping, fixed once per loaded file.
#[derive(Debug, Clone, Default)]
pub struct ColumnMap {
    columns: HashMap<&'static str, usize>,
}

impl ColumnMap {
    pub fn resolve(
        file: &str,
        headers: &StringRecord,
        specs: &[ColumnSpec],
    ) -> Result<Self, PipelineError> {
        let normalized = headers
            .iter()
            .map(|header| header.trim().trim_start_matches('\u{feff}').to_lowercase())
            .collect::<Vec<_>>();
        let mut columns = HashMap::new();
        for spec in specs {
            match spec.locate(&normalized) {
                Some(index) => {
                    columns.insert(spec.field, index);
                }
                None if spec.required => {
                    return Err(PipelineError::MissingColumn {
                        file: file.to_string(),
                        field: spec.field.to_string(),
                        candidates: spec.candidates(),
                    });
                }
                None => {}
            }
        }
        Ok(Self { columns })
    }

    pub fn index(&self, field: &str) -> Option<usize> {
        self.columns.get(field).copied()
    }

    pub fn has(&self, field: &str) -> bool {
        self.columns.contains_key(field)
    }

    /// Trimmed cell value; missing columns and short rows read as empty.
    pub fn get<'r>(&self, record: &'r StringRecord, field: &str) -> &'r str {
        self.index(field)
            .and_then(|index| record.get(index))
            .map(str::trim)
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Default)]
pub struct Table {
    pub name: String,
    pub headers: StringRecord,
    pub rows: Vec<StringRecord>,
}

impl Table {
    pub fn columns(&self, specs: &[ColumnSpec]) -> Result<ColumnMap, PipelineError> {
        ColumnMap::resolve(&self.name, &self.headers, specs)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Keeps rows for which `keep` returns true, preserving order; returns how
    /// many rows were removed.
    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&StringRecord) -> bool,
    {
        let before = self.rows.len();
        self.rows.retain(|row| keep(row));
        before - self.rows.len()
    }
}
