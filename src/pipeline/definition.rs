//! Pipeline definition: named output terms plus an optional screen

use crate::error::{PipelineError, Result};
use crate::pipeline::filters::Filter;
use crate::pipeline::term::{Term, TermRole};

/// Pipeline definition
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    /// Output columns in insertion order
    columns: Vec<(String, Term)>,
    screen: Option<Filter>,
}

impl Pipeline {
    /// Create new empty pipeline
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(name, term)` pairs; duplicate names are an error
    pub fn from_columns<N, T>(columns: impl IntoIterator<Item = (N, T)>, screen: Option<Filter>) -> Result<Self>
    where
        N: Into<String>,
        T: Into<Term>,
    {
        let mut pipeline = Self::new();
        for (name, term) in columns {
            pipeline.add(term, name, false)?;
        }
        if let Some(screen) = screen {
            pipeline.set_screen(screen, false)?;
        }
        Ok(pipeline)
    }

    /// Add an output column
    pub fn add(&mut self, term: impl Into<Term>, name: impl Into<String>, overwrite: bool) -> Result<&mut Self> {
        let term = term.into();
        let name = name.into();
        if term.role() == TermRole::Column {
            return Err(PipelineError::InvalidInput {
                term: term.to_string(),
                reason: format!("column '{}' must be added through a window such as .latest()", name),
            });
        }
        if term.output_names().is_some() {
            return Err(PipelineError::MultiOutputTermUsedDirectly(term.to_string()));
        }
        match self.columns.iter().position(|(existing, _)| *existing == name) {
            Some(_) if !overwrite => return Err(PipelineError::DuplicateColumn(name)),
            Some(pos) => self.columns[pos].1 = term,
            None => self.columns.push((name, term)),
        }
        Ok(self)
    }

    /// Remove a column, returning its term
    pub fn remove(&mut self, name: &str) -> Option<Term> {
        let pos = self.columns.iter().position(|(n, _)| n == name)?;
        Some(self.columns.remove(pos).1)
    }

    /// Restrict output rows to asset-days where `screen` is true
    pub fn set_screen(&mut self, screen: Filter, overwrite: bool) -> Result<&mut Self> {
        if self.screen.is_some() && !overwrite {
            return Err(PipelineError::ScreenAlreadySet);
        }
        self.screen = Some(screen);
        Ok(self)
    }

    pub fn columns(&self) -> &[(String, Term)] {
        &self.columns
    }

    pub fn screen(&self) -> Option<&Filter> {
        self.screen.as_ref()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Every term the engine must compute: the columns, then the screen
    pub fn terms(&self) -> Vec<Term> {
        self.columns
            .iter()
            .map(|(_, t)| t.clone())
            .chain(self.screen.iter().map(|s| s.term().clone()))
            .collect()
    }
}
