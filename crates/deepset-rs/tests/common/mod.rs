#![allow(dead_code)]

use candle_core::{Device, Tensor};
use candle_nn::Linear;
use rand::{rngs::StdRng, Rng, SeedableRng};

pub const ATOL: f64 = 1e-5;
pub const RTOL: f64 = 1e-4;

pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

pub fn random_vec(rng: &mut StdRng, len: usize) -> Vec<f32> {
    (0..len).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect()
}

pub fn random_tensor(rng: &mut StdRng, dims: &[usize]) -> Tensor {
    let len = dims.iter().product();
    Tensor::from_vec(random_vec(rng, len), dims, &Device::Cpu).expect("random tensor")
}

/// Dense replicate set with `replicates` rows of `width` features.
pub fn random_set(rng: &mut StdRng, replicates: usize, width: usize) -> Tensor {
    random_tensor(rng, &[replicates, width])
}

pub fn random_linear(rng: &mut StdRng, in_dim: usize, out_dim: usize) -> Linear {
    let weight = random_tensor(rng, &[out_dim, in_dim]);
    let bias = random_tensor(rng, &[out_dim]);
    Linear::new(weight, Some(bias))
}

pub fn to_vec(tensor: &Tensor) -> Vec<f32> {
    tensor
        .flatten_all()
        .and_then(|t| t.to_vec1::<f32>())
        .expect("tensor to host vec")
}

pub fn to_rows(tensor: &Tensor) -> Vec<Vec<f32>> {
    tensor.to_vec2::<f32>().expect("tensor to host rows")
}

pub fn assert_close(expected: &[f32], actual: &[f32]) {
    assert_close_tol(expected, actual, ATOL, RTOL);
}

pub fn assert_close_tol(expected: &[f32], actual: &[f32], atol: f64, rtol: f64) {
    assert_eq!(expected.len(), actual.len());
    for (idx, (&e, &a)) in expected.iter().zip(actual.iter()).enumerate() {
        let diff = (e as f64 - a as f64).abs();
        let thresh = atol + rtol * e.abs().max(a.abs()) as f64;
        assert!(
            diff <= thresh,
            "value mismatch at index {idx}: expected {e}, actual {a}, diff {diff}, thresh {thresh}"
        );
    }
}

pub fn assert_tensors_close(expected: &Tensor, actual: &Tensor) {
    assert_eq!(expected.dims(), actual.dims(), "shape mismatch");
    assert_close(&to_vec(expected), &to_vec(actual));
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
