//! Layer identifiers.

use crate::{WmtsError, WmtsResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A served layer: one variable of one dataset, written `dataset.variable`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LayerId {
    pub dataset: String,
    pub variable: String,
}

impl LayerId {
    pub fn new(dataset: impl Into<String>, variable: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            variable: variable.into(),
        }
    }

    /// Parse a compound layer identifier like "local.conc_chl".
    ///
    /// Dataset identifiers never contain a dot, so the first dot separates the parts.
    pub fn parse(s: &str) -> WmtsResult<Self> {
        match s.split_once('.') {
            Some((dataset, variable)) if !dataset.is_empty() && !variable.is_empty() => {
                Ok(Self::new(dataset, variable))
            }
            _ => Err(WmtsError::invalid(
                "Layer",
                format!("'{}' is not of the form <dataset>.<variable>", s),
            )),
        }
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.variable)
    }
}
