//! Name- and shape-checked parameter copy

use crate::io::ParamState;
use crate::Tensor;
use ndarray::Array1;
use std::fmt;

/// Prefix added to every name by multi-device wrappers
pub const MULTI_DEVICE_PREFIX: &str = "module.";

/// Why a source entry was not copied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// No target parameter has this name
    Unknown,
    /// The target parameter has a different shape
    Shape {
        expected: Vec<usize>,
        found: Vec<usize>,
    },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Unknown => f.write_str("not present in the model"),
            SkipReason::Shape { expected, found } => {
                write!(f, "shape {found:?} does not match {expected:?}")
            }
        }
    }
}

/// Outcome of [`merge_parameters`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    /// Target names that received values
    pub loaded: Vec<String>,
    /// Source names that were left out, with the reason
    pub skipped: Vec<(String, SkipReason)>,
}

impl MergeReport {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Copy every entry of `source` whose name and shape match a target parameter
///
/// Source names are taken relative to `prefix` (so backbone-only weights can
/// be loaded with `prefix = "backbone."`) after stripping
/// [`MULTI_DEVICE_PREFIX`]. Targets without a source entry keep their values.
/// Never fails: everything that cannot be copied is listed in the report.
pub fn merge_parameters(
    names: &[String],
    targets: &mut [Tensor],
    source: &ParamState,
    prefix: &str,
) -> MergeReport {
    let mut report = MergeReport::default();

    for (info, values) in source.entries() {
        let relative = info
            .name
            .strip_prefix(MULTI_DEVICE_PREFIX)
            .unwrap_or(&info.name);
        let target_name = format!("{prefix}{relative}");

        let Some(idx) = names.iter().position(|n| *n == target_name) else {
            report.skipped.push((info.name.clone(), SkipReason::Unknown));
            continue;
        };
        let Some(target) = targets.get_mut(idx) else {
            report.skipped.push((info.name.clone(), SkipReason::Unknown));
            continue;
        };
        if target.shape() != info.shape.as_slice() {
            report.skipped.push((
                info.name.clone(),
                SkipReason::Shape {
                    expected: target.shape().to_vec(),
                    found: info.shape.clone(),
                },
            ));
            continue;
        }

        *target.data_mut() = Array1::from(values.to_vec());
        report.loaded.push(target_name);
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> (Vec<String>, Vec<Tensor>) {
        (
            vec!["backbone.weight".into(), "head.bias".into()],
            vec![
                Tensor::zeros(&[2, 2], true),
                Tensor::from_vec(vec![9.0], true),
            ],
        )
    }

    #[test]
    fn test_subset_loads_and_leaves_rest() {
        let (names, mut params) = target();
        let w = Tensor::new(Array1::from(vec![1.0, 2.0, 3.0, 4.0]), vec![2, 2], false);
        let source = ParamState::from_named("x", [("backbone.weight", &w)]);

        let report = merge_parameters(&names, &mut params, &source, "");
        assert!(report.is_complete());
        assert_eq!(report.loaded, vec!["backbone.weight".to_string()]);
        assert_eq!(params[0].data().to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(params[1].data()[0], 9.0);
    }

    #[test]
    fn test_prefix_and_multi_device_names() {
        let (names, mut params) = target();
        let w = Tensor::new(Array1::from(vec![1.0; 4]), vec![2, 2], false);
        let source = ParamState::from_named("x", [("module.weight", &w)]);

        let report = merge_parameters(&names, &mut params, &source, "backbone.");
        assert_eq!(report.loaded, vec!["backbone.weight".to_string()]);
    }

    #[test]
    fn test_mismatches_are_reported_not_fatal() {
        let (names, mut params) = target();
        let wrong = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], false);
        let extra = Tensor::from_vec(vec![1.0], false);
        let source =
            ParamState::from_named("x", [("backbone.weight", &wrong), ("decoder.bias", &extra)]);

        let report = merge_parameters(&names, &mut params, &source, "");
        assert!(report.loaded.is_empty());
        assert_eq!(report.skipped.len(), 2);
        assert!(matches!(report.skipped[0].1, SkipReason::Shape { .. }));
        assert_eq!(report.skipped[1].1, SkipReason::Unknown);
        assert!(params[0].data().iter().all(|&v| v == 0.0));
    }
}
