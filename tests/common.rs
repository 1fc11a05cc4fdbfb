/// Shared helpers: synthetic trials and a minimal safetensors reader.
use ndarray::{Array, Array2, IxDyn};
use std::collections::HashMap;
use std::convert::Infallible;
use std::f64::consts::PI;
use std::path::{Path, PathBuf};

#[allow(unused)]
/// Uniform noise in `[-1, 1)` from a 64-bit LCG; never all zeros.
pub fn noise(seed: u64, n: usize) -> Vec<f64> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    (0..n)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((state >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
        })
        .collect()
}

#[allow(unused)]
/// `[n_ch, n_times]` trial: channel `c` carries `(c + 1) · sin(2π f t)` plus
/// a 1e-3 noise floor, so no spectral bin is exactly zero.
pub fn sine_trial(n_ch: usize, n_times: usize, sfreq: f64, freq: f64, seed: u64) -> Array2<f64> {
    let mut out = Array2::<f64>::zeros((n_ch, n_times));
    for c in 0..n_ch {
        let floor = noise(seed * 131 + c as u64, n_times);
        for t in 0..n_times {
            out[[c, t]] = (c + 1) as f64 * (2.0 * PI * freq * t as f64 / sfreq).sin() + 1e-3 * floor[t];
        }
    }
    out
}

#[allow(unused)]
/// Noise-only trial.
pub fn noise_trial(n_ch: usize, n_times: usize, seed: u64) -> Array2<f64> {
    let v = noise(seed, n_ch * n_times);
    Array2::from_shape_vec((n_ch, n_times), v).unwrap()
}

#[allow(unused)]
/// Wrap in-memory trials as an infallible epoch source.
pub fn source(trials: Vec<Array2<f64>>) -> impl Iterator<Item = Result<Array2<f64>, Infallible>> {
    trials.into_iter().map(Ok)
}

#[allow(unused)]
/// Index of the grid point equal to `f` (within 1e-9).
pub fn bin_of(freqs: &ndarray::Array1<f64>, f: f64) -> usize {
    freqs
        .iter()
        .position(|&g| (g - f).abs() < 1e-9)
        .unwrap_or_else(|| panic!("{f} Hz not on the grid"))
}

#[allow(unused)]
/// Unique scratch path under the system temp dir.
pub fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("trialpsd_{}_{name}.safetensors", std::process::id()))
}

#[allow(unused)]
/// Load all numeric tensors of a safetensors file, converted to f64.
/// Handles F32, F64, I32, I64.
pub fn load_tensors_f64(path: &Path) -> HashMap<String, Array<f64, IxDyn>> {
    let bytes = std::fs::read(path)
        .unwrap_or_else(|_| panic!("tensor file not found: {}", path.display()));

    let n = u64::from_le_bytes(bytes[..8].try_into().unwrap()) as usize;
    let header: serde_json::Value = serde_json::from_slice(&bytes[8..8 + n]).unwrap();
    let data_start = 8 + n;

    let mut out = HashMap::new();
    for (key, val) in header.as_object().unwrap() {
        if key == "__metadata__" { continue; }
        let dtype = val["dtype"].as_str().unwrap();
        let offsets = val["data_offsets"].as_array().unwrap();
        let s = offsets[0].as_u64().unwrap() as usize;
        let e = offsets[1].as_u64().unwrap() as usize;
        let raw = &bytes[data_start + s..data_start + e];
        let shape: Vec<usize> = val["shape"].as_array().unwrap()
            .iter().map(|v| v.as_u64().unwrap() as usize).collect();

        let vals: Vec<f64> = match dtype {
            "F32" => raw.chunks_exact(4)
                .map(|b| f32::from_le_bytes(b.try_into().unwrap()) as f64)
                .collect(),
            "F64" => raw.chunks_exact(8)
                .map(|b| f64::from_le_bytes(b.try_into().unwrap()))
                .collect(),
            "I32" => raw.chunks_exact(4)
                .map(|b| i32::from_le_bytes(b.try_into().unwrap()) as f64)
                .collect(),
            "I64" => raw.chunks_exact(8)
                .map(|b| i64::from_le_bytes(b.try_into().unwrap()) as f64)
                .collect(),
            _ => continue,
        };

        let arr = Array::from_shape_vec(IxDyn(&shape), vals).unwrap();
        out.insert(key.clone(), arr);
    }
    out
}

#[allow(unused)]
/// Maximum absolute difference between two 2-D arrays.
pub fn max_abs_diff(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    assert_eq!(a.dim(), b.dim(), "shape mismatch");
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).fold(0.0_f64, f64::max)
}
