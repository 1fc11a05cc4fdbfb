//! Welch power-spectral-density estimation, one spectrum per epoch.
//!
//! Matches `matplotlib.mlab.psd` as called by MNE's `compute_epochs_psd`:
//!   1. Cut the channel into segments of `n_fft` samples, stepping by
//!      `n_fft - n_overlap`; trailing samples that do not fill a segment
//!      are ignored.
//!   2. Multiply each segment by the window and FFT it.
//!   3. Average `|X_k|²` over segments for `k = 0..=n_fft/2`.
//!   4. Scale to a one-sided density: divide by `sfreq · Σw²`, double every
//!      bin except DC and (even `n_fft`) Nyquist.
//!   5. Keep the bins whose frequency lies in `[fmin, fmax]`.
//!
//! Picked channels are transformed independently on a rayon pool of
//! `n_jobs` workers; rows come back in pick order.
use std::ops::Range;
use std::sync::Arc;

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;
use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::config::PsdConfig;
use crate::error::{PsdError, SourceError};
use crate::window::Window;

/// One-sided FFT bin frequencies `k · sfreq / n_fft`, `k = 0..=n_fft/2`.
pub fn frequency_grid(n_fft: usize, sfreq: f64) -> Array1<f64> {
    let df = sfreq / n_fft as f64;
    Array1::from_iter((0..=n_fft / 2).map(|k| k as f64 * df))
}

/// Index range of the grid points inside `[fmin, fmax]`.
///
/// `freqs` must be ascending; the result may be empty.
pub fn band_bins(freqs: &Array1<f64>, fmin: f64, fmax: f64) -> Range<usize> {
    let start = freqs.iter().take_while(|&&f| f < fmin).count();
    let end = start + freqs.iter().skip(start).take_while(|&&f| f <= fmax).count();
    start..end
}

// ── Welch kernel ─────────────────────────────────────────────────────────────

/// Planned FFT + window shared by every channel and epoch of a run.
struct Welch {
    n_fft: usize,
    step: usize,
    window: Vec<f64>,
    /// `1 / (sfreq · Σw²)`
    norm: f64,
    fft: Arc<dyn Fft<f64>>,
}

impl Welch {
    fn new(n_fft: usize, n_overlap: usize, window: Window, sfreq: f64) -> Self {
        let window = window.coefficients(n_fft);
        let energy: f64 = window.iter().map(|w| w * w).sum();
        let mut planner: FftPlanner<f64> = FftPlanner::new();
        Self {
            n_fft,
            step: n_fft - n_overlap,
            window,
            norm: 1.0 / (sfreq * energy),
            fft: planner.plan_fft_forward(n_fft),
        }
    }

    fn n_segments(&self, n_times: usize) -> usize {
        if n_times < self.n_fft { 0 } else { 1 + (n_times - self.n_fft) / self.step }
    }

    /// One-sided PSD of `x` (length `n_fft/2 + 1`).  `x.len() >= n_fft`.
    fn density(&self, x: ArrayView1<f64>) -> Vec<f64> {
        let n_out = self.n_fft / 2 + 1;
        let n_seg = self.n_segments(x.len());

        let mut acc = vec![0.0_f64; n_out];
        let mut buf = vec![Complex::<f64>::default(); self.n_fft];
        let mut scratch = vec![Complex::<f64>::default(); self.fft.get_inplace_scratch_len()];

        for seg in 0..n_seg {
            let start = seg * self.step;
            let segment = x.slice(s![start..start + self.n_fft]);
            for ((b, &v), &w) in buf.iter_mut().zip(segment.iter()).zip(self.window.iter()) {
                *b = Complex { re: v * w, im: 0.0 };
            }
            self.fft.process_with_scratch(&mut buf, &mut scratch);
            for (a, c) in acc.iter_mut().zip(buf.iter()) {
                *a += c.norm_sqr();
            }
        }

        let scale = self.norm / n_seg as f64;
        // DC is never doubled; Nyquist only exists for even n_fft.
        let doubled = if self.n_fft % 2 == 0 { 1..n_out - 1 } else { 1..n_out };
        for (k, a) in acc.iter_mut().enumerate() {
            *a *= scale;
            if doubled.contains(&k) {
                *a *= 2.0;
            }
        }
        acc
    }
}

/// Full one-sided Welch PSD of a single signal.
///
/// Returns `(freqs, psd)`, both of length `n_fft/2 + 1`.
pub fn psd_welch_1d(
    x: &[f64],
    sfreq: f64,
    n_fft: usize,
    n_overlap: usize,
    window: Window,
) -> Result<(Array1<f64>, Array1<f64>), PsdError> {
    validate_transform(n_fft, n_overlap, sfreq)?;
    if x.len() < n_fft {
        return Err(PsdError::invalid(format!(
            "signal has {} samples, fewer than n_fft ({n_fft})",
            x.len()
        )));
    }
    let welch = Welch::new(n_fft, n_overlap, window, sfreq);
    let psd = welch.density(ArrayView1::from(x));
    Ok((frequency_grid(n_fft, sfreq), Array1::from(psd)))
}

pub(crate) fn validate_transform(n_fft: usize, n_overlap: usize, sfreq: f64) -> Result<(), PsdError> {
    if !(sfreq.is_finite() && sfreq > 0.0) {
        return Err(PsdError::invalid(format!("sample rate must be positive, got {sfreq}")));
    }
    if n_fft == 0 {
        return Err(PsdError::invalid("n_fft must be at least 1"));
    }
    if n_overlap >= n_fft {
        return Err(PsdError::invalid(format!(
            "n_overlap ({n_overlap}) must be smaller than n_fft ({n_fft})"
        )));
    }
    Ok(())
}

// ── Estimator ────────────────────────────────────────────────────────────────

/// Band-limited Welch estimator with a fixed frequency grid and worker pool.
///
/// Build once per run; [`estimate`](Self::estimate) is then a pure function of
/// the epoch and the picks.
pub struct PsdEstimator {
    welch: Welch,
    bins: Range<usize>,
    freqs: Array1<f64>,
    pool: rayon::ThreadPool,
}

impl std::fmt::Debug for PsdEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PsdEstimator")
            .field("n_fft", &self.welch.n_fft)
            .field("step", &self.welch.step)
            .field("bins", &self.bins)
            .field("n_jobs", &self.pool.current_num_threads())
            .finish()
    }
}

impl PsdEstimator {
    /// Validate `cfg`, compute the frequency grid and spin up the worker pool.
    pub fn new(cfg: &PsdConfig, sfreq: f64) -> Result<Self, PsdError> {
        cfg.validate(sfreq)?;

        let full = frequency_grid(cfg.n_fft, sfreq);
        let bins = band_bins(&full, cfg.fmin, cfg.fmax);
        if bins.is_empty() {
            return Err(PsdError::invalid(format!(
                "no frequency bin within [{}, {}] Hz (resolution {:.3} Hz, Nyquist {} Hz)",
                cfg.fmin,
                cfg.fmax,
                cfg.freq_resolution(sfreq),
                sfreq / 2.0
            )));
        }
        let freqs = full.slice(s![bins.clone()]).to_owned();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(cfg.n_jobs)
            .thread_name(|i| format!("psd-worker-{i}"))
            .build()
            .map_err(|e| PsdError::invalid(format!("cannot start {} PSD workers: {e}", cfg.n_jobs)))?;

        log::debug!(
            "PSD estimator: n_fft={} n_overlap={} window={:?}, {} bins in [{:.2}, {:.2}] Hz, {} workers",
            cfg.n_fft,
            cfg.n_overlap,
            cfg.window,
            freqs.len(),
            freqs[0],
            freqs[freqs.len() - 1],
            pool.current_num_threads(),
        );

        Ok(Self {
            welch: Welch::new(cfg.n_fft, cfg.n_overlap, cfg.window, sfreq),
            bins,
            freqs,
            pool,
        })
    }

    /// Frequency grid (Hz) shared by every spectrum of this run.
    pub fn freqs(&self) -> &Array1<f64> {
        &self.freqs
    }

    /// Number of grid points `F`.
    pub fn n_freqs(&self) -> usize {
        self.freqs.len()
    }

    /// Power spectrum of one epoch (`[C, T]`), shape `[picks.len(), F]`.
    pub fn estimate(&self, epoch: ArrayView2<f64>, picks: &[usize]) -> Result<Array2<f64>, PsdError> {
        let (n_ch, n_times) = epoch.dim();
        if picks.is_empty() {
            return Err(PsdError::invalid("channel selection is empty"));
        }
        if let Some(&bad) = picks.iter().find(|&&ch| ch >= n_ch) {
            return Err(PsdError::invalid(format!(
                "picked channel {bad} out of range for an epoch with {n_ch} channels"
            )));
        }
        if n_times < self.welch.n_fft {
            return Err(PsdError::invalid(format!(
                "epoch has {n_times} samples, fewer than n_fft ({})",
                self.welch.n_fft
            )));
        }

        let rows: Vec<Vec<f64>> = self.pool.install(|| {
            picks
                .par_iter()
                .map(|&ch| {
                    let mut full = self.welch.density(epoch.row(ch));
                    full.truncate(self.bins.end);
                    full.drain(..self.bins.start);
                    full
                })
                .collect()
        });

        let mut out = Array2::<f64>::zeros((picks.len(), self.n_freqs()));
        for (mut dst, src) in out.rows_mut().into_iter().zip(rows.iter()) {
            dst.assign(&ArrayView1::from(src.as_slice()));
        }
        Ok(out)
    }

    /// Lazily map an epoch source to `(psd, freqs)` pairs.
    ///
    /// Nothing is pulled from `epochs` until the returned iterator is
    /// advanced.  Source failures become [`PsdError::Source`]; estimator
    /// failures are wrapped with the epoch index.
    pub fn spectra<'a, I, E>(&'a self, epochs: I, picks: &'a [usize]) -> EpochSpectra<'a, I::IntoIter>
    where
        I: IntoIterator<Item = Result<Array2<f64>, E>>,
        E: Into<SourceError>,
    {
        EpochSpectra { estimator: self, picks, epochs: epochs.into_iter(), next_epoch: 0 }
    }
}

/// Iterator returned by [`PsdEstimator::spectra`].
pub struct EpochSpectra<'a, I> {
    estimator: &'a PsdEstimator,
    picks: &'a [usize],
    epochs: I,
    next_epoch: usize,
}

impl<'a, I, E> Iterator for EpochSpectra<'a, I>
where
    I: Iterator<Item = Result<Array2<f64>, E>>,
    E: Into<SourceError>,
{
    type Item = Result<(Array2<f64>, &'a Array1<f64>), PsdError>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.epochs.next()?;
        let epoch = self.next_epoch;
        self.next_epoch += 1;

        let est = self.estimator;
        Some(match item {
            Ok(data) => est
                .estimate(data.view(), self.picks)
                .map(|psd| (psd, &est.freqs))
                .map_err(|e| e.at_epoch(epoch)),
            Err(e) => Err(PsdError::Source { epoch, source: e.into() }),
        })
    }
}
