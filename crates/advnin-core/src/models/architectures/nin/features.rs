//! Validation of requested output feature names.

use crate::error::{Error, Result};

/// A validated selection of feature blocks to return from a forward pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureRequest {
    keys: Vec<String>,
    indices: Vec<usize>,
    max_index: usize,
}

impl FeatureRequest {
    /// Validate `requested` against the network's feature names.
    ///
    /// `None` selects the last feature (the classifier output).
    pub fn parse(all_names: &[String], requested: Option<&[&str]>) -> Result<Self> {
        let last = all_names
            .last()
            .ok_or_else(|| Error::InferenceError("Network has no feature blocks".to_string()))?;

        let keys: Vec<String> = match requested {
            None => vec![last.clone()],
            Some(keys) => keys.iter().map(|k| k.to_string()).collect(),
        };
        if keys.is_empty() {
            return Err(Error::InvalidInput(
                "Empty list of output feature keys.".to_string(),
            ));
        }

        let mut indices = Vec::with_capacity(keys.len());
        for (pos, key) in keys.iter().enumerate() {
            let index = all_names.iter().position(|name| name == key).ok_or_else(|| {
                Error::InvalidInput(format!(
                    "Feature with name {key} does not exist. Existing features: {all_names:?}."
                ))
            })?;
            if keys[..pos].contains(key) {
                return Err(Error::InvalidInput(format!(
                    "Duplicate output feature key: {key}."
                )));
            }
            indices.push(index);
        }

        let max_index = indices.iter().copied().max().unwrap_or(0);
        Ok(Self {
            keys,
            indices,
            max_index,
        })
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Highest block index that must be computed.
    pub fn max_index(&self) -> usize {
        self.max_index
    }

    /// Output slot for block `index`, if it was requested.
    pub fn slot_of(&self, index: usize) -> Option<usize> {
        self.indices.iter().position(|&i| i == index)
    }
}
