//! Flat, serializable parameter state

use crate::{Error, Result, Tensor};
use serde::{Deserialize, Serialize};

/// Information about a model parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterInfo {
    /// Parameter name (e.g., "backbone.weight")
    pub name: String,

    /// Parameter shape
    pub shape: Vec<usize>,
}

impl ParameterInfo {
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Named parameters laid out back to back in one buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamState {
    /// Model architecture tag the state was taken from
    pub architecture: String,

    /// Parameter information, in buffer order
    pub parameters: Vec<ParameterInfo>,

    /// Flattened parameter data
    pub data: Vec<f32>,
}

impl ParamState {
    /// Snapshot named tensors
    pub fn from_named<'a>(
        architecture: impl Into<String>,
        named: impl IntoIterator<Item = (&'a str, &'a Tensor)>,
    ) -> Self {
        let mut data = Vec::new();
        let parameters = named
            .into_iter()
            .map(|(name, tensor)| {
                data.extend(tensor.data().iter().copied());
                ParameterInfo {
                    name: name.to_string(),
                    shape: tensor.shape().to_vec(),
                }
            })
            .collect();

        Self {
            architecture: architecture.into(),
            parameters,
            data,
        }
    }

    /// Check that the buffer holds exactly what the parameter table describes
    pub fn validate(&self) -> Result<()> {
        let expected: usize = self.parameters.iter().map(ParameterInfo::numel).sum();
        if expected != self.data.len() {
            return Err(Error::Serialization(format!(
                "parameter table describes {expected} values, buffer holds {}",
                self.data.len()
            )));
        }
        Ok(())
    }

    /// Parameters paired with their slice of the buffer
    ///
    /// Stops early if the buffer is shorter than the table claims.
    pub fn entries(&self) -> impl Iterator<Item = (&ParameterInfo, &[f32])> + '_ {
        let mut offset = 0;
        self.parameters.iter().map_while(move |info| {
            let end = offset + info.numel();
            let slice = self.data.get(offset..end)?;
            offset = end;
            Some((info, slice))
        })
    }

    /// Look up one parameter by name
    pub fn get(&self, name: &str) -> Option<(&ParameterInfo, &[f32])> {
        self.entries().find(|(info, _)| info.name == name)
    }

    /// Materialize as tensors
    pub fn to_tensors(&self) -> Result<Vec<(String, Tensor)>> {
        self.validate()?;
        Ok(self
            .entries()
            .map(|(info, values)| {
                let tensor = Tensor::new(values.to_vec().into(), info.shape.clone(), true);
                (info.name.clone(), tensor)
            })
            .collect())
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }
}
