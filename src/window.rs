//! Segment tapers for the Welch estimator.
//!
//! Symmetric windows, matching `numpy.hanning` / `numpy.hamming` (the
//! default taper of `matplotlib.mlab.psd` is `numpy.hanning(NFFT)`).
use std::f64::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Window {
    /// `0.5 - 0.5·cos(2πn / (N-1))`
    #[default]
    Hann,
    /// `0.54 - 0.46·cos(2πn / (N-1))`
    Hamming,
    /// All ones (plain periodogram).
    Boxcar,
}

impl Window {
    /// Window coefficients of length `n`.
    pub fn coefficients(self, n: usize) -> Vec<f64> {
        match self {
            Window::Hann => cosine(n, 0.5, 0.5),
            Window::Hamming => cosine(n, 0.54, 0.46),
            Window::Boxcar => vec![1.0; n],
        }
    }
}

/// Generalised two-term cosine window `a0 - a1·cos(2πi / (n-1))`.
///
/// Length 1 yields `[1.0]` as NumPy does.
fn cosine(n: usize, a0: f64, a1: f64) -> Vec<f64> {
    if n == 1 {
        return vec![1.0];
    }
    (0..n)
        .map(|i| a0 - a1 * (2.0 * PI * i as f64 / (n - 1) as f64).cos())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hann_endpoints_are_zero() {
        let w = Window::Hann.coefficients(256);
        approx::assert_abs_diff_eq!(w[0], 0.0, epsilon = 1e-15);
        approx::assert_abs_diff_eq!(w[255], 0.0, epsilon = 1e-15);
    }

    #[test]
    fn windows_are_symmetric() {
        for win in [Window::Hann, Window::Hamming] {
            let w = win.coefficients(101);
            for i in 0..50 {
                approx::assert_abs_diff_eq!(w[i], w[100 - i], epsilon = 1e-12);
            }
            // Odd length peaks at exactly 1 in the middle.
            approx::assert_abs_diff_eq!(w[50], 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn hann_energy_matches_numpy() {
        // np.sum(np.hanning(256)**2) == 0.375 * 255
        let w = Window::Hann.coefficients(256);
        let e: f64 = w.iter().map(|v| v * v).sum();
        approx::assert_abs_diff_eq!(e, 0.375 * 255.0, epsilon = 1e-9);
    }

    #[test]
    fn single_point_window() {
        assert_eq!(Window::Hann.coefficients(1), vec![1.0]);
    }
}
