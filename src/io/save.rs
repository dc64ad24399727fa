//! Parameter state saving

use super::format::WeightFormat;
use super::state::ParamState;
use crate::{Error, Result};
use safetensors::tensor::{Dtype, TensorView};
use std::collections::HashMap;
use std::path::Path;

/// Write a parameter state to `path` in `format`
///
/// # Example
///
/// ```no_run
/// use segdepth::io::{save_weights, ParamState, WeightFormat};
/// use segdepth::Tensor;
///
/// let w = Tensor::from_vec(vec![1.0, 2.0], true);
/// let state = ParamState::from_named("pixelnet", [("backbone.bias", &w)]);
/// save_weights(&state, "backbone.safetensors", WeightFormat::SafeTensors).unwrap();
/// ```
pub fn save_weights(state: &ParamState, path: impl AsRef<Path>, format: WeightFormat) -> Result<()> {
    let path = path.as_ref();
    state.validate()?;

    match format {
        WeightFormat::SafeTensors => save_safetensors(state, path),
        WeightFormat::Json => {
            let data = serde_json::to_string(state)
                .map_err(|e| Error::Serialization(format!("JSON serialization failed: {e}")))?;
            std::fs::write(path, data)?;
            Ok(())
        }
    }
}

/// Save in SafeTensors format, architecture tag in the header metadata
fn save_safetensors(state: &ParamState, path: &Path) -> Result<()> {
    // Byte buffers must outlive the views
    let tensor_data: Vec<(&str, Vec<u8>, Vec<usize>)> = state
        .entries()
        .map(|(info, values)| {
            let bytes: Vec<u8> = bytemuck::cast_slice(values).to_vec();
            (info.name.as_str(), bytes, info.shape.clone())
        })
        .collect();

    let views = tensor_data
        .iter()
        .map(|(name, bytes, shape)| {
            TensorView::new(Dtype::F32, shape.clone(), bytes)
                .map(|view| (*name, view))
                .map_err(|e| Error::Serialization(format!("tensor {name}: {e:?}")))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut metadata = HashMap::new();
    metadata.insert("architecture".to_string(), state.architecture.clone());

    let bytes = safetensors::serialize(views, &Some(metadata))
        .map_err(|e| Error::Serialization(format!("SafeTensors serialization failed: {e}")))?;
    std::fs::write(path, bytes)?;
    Ok(())
}
