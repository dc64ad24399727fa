//! Parameter state loading

use super::format::WeightFormat;
use super::state::{ParamState, ParameterInfo};
use crate::{Error, Result};
use safetensors::tensor::Dtype;
use safetensors::SafeTensors;
use std::path::Path;

/// Load a parameter state; the format is detected from the file extension
///
/// # Example
///
/// ```no_run
/// use segdepth::io::load_weights;
///
/// let state = load_weights("backbone.safetensors").unwrap();
/// println!("{} tensors for {}", state.len(), state.architecture);
/// ```
pub fn load_weights(path: impl AsRef<Path>) -> Result<ParamState> {
    let path = path.as_ref();
    let format = WeightFormat::from_path(path).ok_or_else(|| {
        Error::Serialization(format!("Unsupported weight file: {}", path.display()))
    })?;

    let state = match format {
        WeightFormat::SafeTensors => load_safetensors(path)?,
        WeightFormat::Json => {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)
                .map_err(|e| Error::Serialization(format!("JSON deserialization failed: {e}")))?
        }
    };
    state.validate()?;
    Ok(state)
}

/// Load from SafeTensors, keeping the file's tensor order
fn load_safetensors(path: &Path) -> Result<ParamState> {
    let data = std::fs::read(path)?;

    let (_, header) = SafeTensors::read_metadata(&data)
        .map_err(|e| Error::Serialization(format!("SafeTensors parsing failed: {e}")))?;
    let architecture = header
        .metadata()
        .as_ref()
        .and_then(|m| m.get("architecture").cloned())
        .unwrap_or_else(|| "unknown".to_string());

    let tensors = SafeTensors::deserialize(&data)
        .map_err(|e| Error::Serialization(format!("SafeTensors parsing failed: {e}")))?;

    let mut entries: Vec<_> = tensors.tensors();
    // Stable order: by offset in the file
    entries.sort_by_key(|(_, view)| view.data().as_ptr() as usize);

    let mut parameters = Vec::with_capacity(entries.len());
    let mut values = Vec::new();
    for (name, view) in entries {
        if view.dtype() != Dtype::F32 {
            return Err(Error::Serialization(format!(
                "tensor {name} is {:?}, only F32 is supported",
                view.dtype()
            )));
        }
        let bytes = view.data();
        match bytemuck::try_cast_slice::<u8, f32>(bytes) {
            Ok(floats) => values.extend_from_slice(floats),
            // Unaligned buffer
            Err(_) => values.extend(
                bytes
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])),
            ),
        }
        parameters.push(ParameterInfo {
            name,
            shape: view.shape().to_vec(),
        });
    }

    Ok(ParamState {
        architecture,
        parameters,
        data: values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{save_weights, WeightFormat};
    use crate::Tensor;
    use ndarray::Array1;

    fn state() -> ParamState {
        let w = Tensor::new(Array1::from(vec![1.0, -2.0, 3.5, 0.25]), vec![2, 2], true);
        let b = Tensor::from_vec(vec![0.1, 0.2], true);
        ParamState::from_named("pixelnet", [("backbone.weight", &w), ("backbone.bias", &b)])
    }

    #[test]
    fn test_load_safetensors_keeps_names_and_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.safetensors");
        save_weights(&state(), &path, WeightFormat::SafeTensors).unwrap();

        let loaded = load_weights(&path).unwrap();
        assert_eq!(loaded.architecture, "pixelnet");
        let (info, values) = loaded.get("backbone.weight").unwrap();
        assert_eq!(info.shape, vec![2, 2]);
        assert_eq!(values, &[1.0, -2.0, 3.5, 0.25]);
        assert_eq!(loaded.get("backbone.bias").unwrap().1, &[0.1, 0.2]);
    }

    #[test]
    fn test_load_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.json");
        save_weights(&state(), &path, WeightFormat::Json).unwrap();
        assert_eq!(load_weights(&path).unwrap(), state());
    }

    #[test]
    fn test_unknown_extension() {
        assert!(matches!(
            load_weights("weights.bin"),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_garbage_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.safetensors");
        std::fs::write(&path, b"not a tensor file").unwrap();
        assert!(load_weights(&path).is_err());
    }
}
