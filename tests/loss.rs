use candle_core::{Device, Tensor};
use chromtrain::{Criterion, PoissonNllLoss};

fn vector(values: &[f32]) -> Tensor {
    Tensor::from_vec(values.to_vec(), values.len(), &Device::Cpu).unwrap()
}

#[test]
fn perfect_predictions_give_near_zero_loss() {
    let criterion = PoissonNllLoss::new();
    let targets = vector(&[1.0, 2.0, 3.0, 5.0]);
    let output = criterion.compute(&targets, &targets, None).unwrap();
    assert!(output.metrics.mean_loss() >= 0.0);
    assert!(output.metrics.mean_loss() < 1e-4);
    assert_eq!(output.metrics.examples(), 4);
}

#[test]
fn loss_is_never_negative() {
    let criterion = PoissonNllLoss::new();
    let cases = [
        (vec![0.5f32, 1.0, 2.0], vec![0.0f32, 3.0, 1.0]),
        (vec![4.0, 0.1, 7.5], vec![4.0, 0.0, 2.0]),
        (vec![0.01, 0.01, 0.01], vec![5.0, 0.0, 1.0]),
    ];
    for (rates, targets) in cases {
        let output = criterion
            .compute(&vector(&rates), &vector(&targets), None)
            .unwrap();
        assert!(
            output.metrics.mean_loss() >= 0.0,
            "mean loss {} went negative",
            output.metrics.mean_loss()
        );
    }
}

#[test]
fn map_mask_excludes_unmapped_examples() {
    let criterion = PoissonNllLoss::new().with_map_mask(true);
    let rates = vector(&[1.0, 1.0, 1.0, 1.0]);
    let targets = vector(&[0.0, 2.0, 1.0, 3.0]);
    let mask = vector(&[1.0, 1.0, 1.0, 0.0]);

    let output = criterion.compute(&rates, &targets, Some(&mask)).unwrap();
    assert_eq!(output.metrics.examples(), 3);

    // Without the flag the same mask is ignored.
    let unmasked = PoissonNllLoss::new()
        .compute(&rates, &targets, Some(&mask))
        .unwrap();
    assert_eq!(unmasked.metrics.examples(), 4);
}

#[test]
fn fully_masked_batch_is_an_error() {
    let criterion = PoissonNllLoss::new().with_map_mask(true);
    let rates = vector(&[1.0, 2.0]);
    let targets = vector(&[1.0, 2.0]);
    let mask = vector(&[0.0, 0.0]);
    assert!(criterion.compute(&rates, &targets, Some(&mask)).is_err());
}

#[test]
fn mismatched_shapes_are_rejected() {
    let criterion = PoissonNllLoss::new();
    let rates = vector(&[1.0, 2.0]);
    let targets = vector(&[1.0, 2.0, 3.0]);
    assert!(criterion.compute(&rates, &targets, None).is_err());
}
