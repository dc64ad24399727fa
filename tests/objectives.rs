//! Loss and metric behaviour on loader-produced batches

use approx::assert_abs_diff_eq;
use ndarray::Array4;
use segdepth::data::{DataLoader, LoaderOptions, SyntheticConfig, SyntheticDepthDataset};
use segdepth::loss::{
    DepthCriterion, LossAggregator, LossBreakdown, LossWeights, Phase, SmoothEdgeLoss,
};
use segdepth::metrics::{DepthMetrics, MetricKind};
use segdepth::model::ModelOutput;
use std::sync::Arc;

fn first_batch(workers: usize) -> segdepth::data::Batch {
    let dataset = Arc::new(SyntheticDepthDataset::new(4, SyntheticConfig::default()));
    let loader = DataLoader::new(
        dataset,
        LoaderOptions {
            batch_size: 2,
            num_workers: workers,
            ..LoaderOptions::default()
        },
    )
    .unwrap();
    loader.iter(0).unwrap().next().unwrap().unwrap()
}

/// Perfect depth everywhere, uniform segmentation logits
fn oracle_output(batch: &segdepth::data::Batch) -> ModelOutput {
    let (n, _, h, w) = batch.depth.dim();
    ModelOutput {
        coarse_depth: batch.depth.clone(),
        depth_class: batch.depth.clone(),
        depth: batch.depth.clone(),
        segmentation: Array4::zeros((n, SyntheticDepthDataset::num_classes(), h, w)),
        auxiliary: None,
    }
}

#[test]
fn test_unit_sub_losses_combine_to_known_totals() {
    let agg = LossAggregator::new(LossWeights::default(), DepthCriterion::Mse);
    let unit = LossBreakdown {
        total: 0.0,
        coarse: 1.0,
        class: 1.0,
        depth: 1.0,
        segmentation: 1.0,
        edge: 1.0,
    };
    assert_abs_diff_eq!(agg.combine(unit, Phase::Train).total, 10.24, epsilon = 1e-5);
    assert_abs_diff_eq!(agg.combine(unit, Phase::Validate).total, 5.24, epsilon = 1e-5);
}

#[test]
fn test_perfect_depth_scores_zero() {
    let batch = first_batch(0);
    let output = oracle_output(&batch);

    let mut metrics = DepthMetrics::new(255.0);
    metrics.calculate(output.depth.view(), batch.depth.view()).unwrap();
    assert!(metrics.num() > 0);
    assert_eq!(metrics.get_metric(MetricKind::Rmse), 0.0);
    assert_eq!(metrics.get_metric(MetricKind::Mae), 0.0);

    let agg = LossAggregator::new(LossWeights::default(), DepthCriterion::Mae);
    let (parts, _) = agg.compute(&output, &batch, Phase::Validate).unwrap();
    assert_eq!(parts.coarse, 0.0);
    assert_eq!(parts.depth, 0.0);
    // uniform logits over every class
    let classes = SyntheticDepthDataset::num_classes() as f32;
    assert_abs_diff_eq!(parts.segmentation, classes.ln(), epsilon = 1e-5);
}

#[test]
fn test_constant_depth_edge_loss_on_background_scene() {
    let batch = first_batch(2);
    let depth = Array4::from_elem(batch.depth.raw_dim(), 12.0);
    // road/sky only: no foreground class, so no segmentation edges
    let background = batch.segmentation.mapv(|c| if c == 5.0 || c == 7.0 { 1.0 } else { c });
    let image = SmoothEdgeLoss::image_from_input(batch.input.view()).unwrap();

    let terms = SmoothEdgeLoss::default()
        .forward(depth.view(), image.view(), background.view())
        .unwrap();
    assert_eq!(terms.total(), 0.0);
}

#[test]
fn test_worker_and_inline_loading_agree() {
    let inline = first_batch(0);
    let threaded = first_batch(3);
    assert_eq!(inline.input, threaded.input);
    assert_eq!(inline.depth, threaded.depth);
    assert_eq!(inline.segmentation, threaded.segmentation);
}
