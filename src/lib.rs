//! # trialpsd: single-trial power spectra in pure Rust
//!
//! `trialpsd` estimates a power spectrum for every trial of an EEG/MEG
//! recording and averages the first N trials in log-power (dB) space, keeping
//! the first trial's spectrum for comparison.  It follows MNE-Python's
//! "single trial power spectra" example (`compute_epochs_psd` +
//! `10 * log10` + running average).
//!
//! ## Pipeline overview
//!
//! ```text
//! [C, T] recording + events
//!   │
//!   ├─ epochs::EventEpochs     windows [tmin, tmax] around each event,
//!   │                          baseline (None, 0), peak-to-peak rejection
//!   ├─ psd::PsdEstimator       Welch (Hann, n_fft) per picked channel,
//!   │                          rayon pool of n_jobs workers, band [fmin, fmax]
//!   ├─ accumulate::to_db       10·log10(psd)
//!   └─ accumulate::accumulate  first-trial snapshot + running dB sum,
//!        │                     stops after max_trials epochs
//!        └─→ SingleTrialSpectra { first [C, F], average [C, F], freqs [F] }
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use std::convert::Infallible;
//! use trialpsd::{single_trial_spectra, EpochParams, EventEpochs, PsdConfig};
//! use trialpsd::io::Recording;
//!
//! let rec = Recording::load("data/sample_audvis.safetensors".as_ref()).unwrap();
//! let epochs = EventEpochs::new(rec.data.view(), rec.sfreq, &rec.events,
//!                               &EpochParams::default()).unwrap();
//!
//! let picks: Vec<usize> = (0..rec.data.nrows()).collect();
//! let out = single_trial_spectra(
//!     epochs.map(Ok::<_, Infallible>),
//!     &picks,
//!     rec.sfreq,
//!     &PsdConfig::default(),
//! ).unwrap();
//!
//! println!("{} trials, {} bins", out.n_trials, out.freqs.len());
//! ```
//!
//! ## Running individual steps
//!
//! ```no_run
//! use trialpsd::{accumulate, AverageDenominator, PsdConfig, PsdEstimator};
//! use ndarray::Array2;
//!
//! let epochs: Vec<Array2<f64>> = vec![Array2::zeros((4, 601)); 10];
//! let picks = [0, 1, 2, 3];
//!
//! let est = PsdEstimator::new(&PsdConfig::default(), 600.0).unwrap();
//! let psd = est.estimate(epochs[0].view(), &picks).unwrap();   // [4, F] linear power
//!
//! let spectra = est.spectra(epochs.into_iter().map(Ok::<_, std::convert::Infallible>), &picks);
//! let out = accumulate(spectra, 20, AverageDenominator::Processed).unwrap();
//! ```

pub mod accumulate;
pub mod config;
pub mod epochs;
pub mod error;
pub mod io;
pub mod psd;
pub mod window;

use ndarray::Array2;

// ── Crate-root re-exports ─────────────────────────────────────────────────

// config
pub use config::{AverageDenominator, PsdConfig};

// error
pub use error::{PsdError, SourceError};

// window
pub use window::Window;

// psd: grid helpers, estimator, lazy per-epoch mapping
pub use psd::{band_bins, frequency_grid, psd_welch_1d, EpochSpectra, PsdEstimator};

// accumulate: dB conversion + trial averaging
pub use accumulate::{accumulate, to_db, SingleTrialSpectra, TrialAccumulator};

// epochs: in-memory event-locked epoch source
pub use epochs::{
    baseline_correct_inplace, events_from_array, peak_to_peak,
    EpochParams, Event, EventEpochs, RejectGroup,
};

// io: safetensors helpers
pub use io::{write_spectra, Recording, StWriter};

/// Compute the **single-trial and trial-averaged log-power spectra** of an
/// epoch sequence.
///
/// This is the main entry point of the library.
///
/// # Steps
///
/// 1. Validate `cfg` against `sfreq`, build the frequency grid
///    (`[cfg.fmin, cfg.fmax]`) and the `cfg.n_jobs` worker pool.
/// 2. Pull epochs one at a time and estimate a Welch PSD for every channel in
///    `picks`.
/// 3. Convert each spectrum to dB, keep the first one, add it to the running
///    sum.
/// 4. Stop after [`PsdConfig::max_trials`] epochs (remaining epochs are never
///    pulled) or when the source is exhausted, and divide the sum as
///    [`PsdConfig::average`] says.
///
/// # Arguments
///
/// * `epochs` – Lazy epoch source; every item is `[C, T]` with `T >= cfg.n_fft`.
///   Infallible sources can be adapted with `.map(Ok::<_, Infallible>)`.
/// * `picks`  – Row indices analysed in each epoch, in output order.
/// * `sfreq`  – Sampling rate of the epochs in Hz.
/// * `cfg`    – Analysis configuration (see [`PsdConfig`]).
///
/// # Errors
///
/// * [`PsdError::InvalidInput`] for bad parameters or an epoch shorter than
///   `n_fft`.  Bad parameters and an empty `picks` are reported before the
///   source is touched; a pick beyond the channel count is reported at the
///   first epoch, which is where the channel count becomes known.
/// * [`PsdError::EmptySequence`] if the source yields nothing.
/// * [`PsdError::DomainError`] if a power value is zero (e.g. a flat channel).
/// * [`PsdError::Source`] if the source fails.
///
/// Per-epoch failures are wrapped in [`PsdError::AtEpoch`]; no partial
/// average is ever returned.
///
/// # Examples
///
/// ```
/// use std::convert::Infallible;
/// use trialpsd::{single_trial_spectra, PsdConfig};
/// use ndarray::Array2;
///
/// // Three 2-channel trials of a 10 Hz sine sampled at 256 Hz.
/// let trial = Array2::from_shape_fn((2, 512), |(c, t)| {
///     (c + 1) as f64 * (2.0 * std::f64::consts::PI * 10.0 * t as f64 / 256.0).sin()
///         + 1e-3 * ((t * 7 + c * 13) % 11) as f64
/// });
/// let cfg = PsdConfig { fmax: 100.0, max_trials: 3, ..PsdConfig::default() };
/// let out = single_trial_spectra(
///     vec![trial.clone(), trial.clone(), trial].into_iter().map(Ok::<_, Infallible>),
///     &[0, 1],
///     256.0,
///     &cfg,
/// ).unwrap();
/// assert_eq!(out.first.dim(), (2, out.freqs.len()));
/// assert_eq!(out.n_trials, 3);
/// ```
pub fn single_trial_spectra<I, E>(
    epochs: I,
    picks: &[usize],
    sfreq: f64,
    cfg: &PsdConfig,
) -> Result<SingleTrialSpectra, PsdError>
where
    I: IntoIterator<Item = Result<Array2<f64>, E>>,
    E: Into<SourceError>,
{
    if picks.is_empty() {
        return Err(PsdError::InvalidInput("channel selection is empty".into()));
    }
    let estimator = PsdEstimator::new(cfg, sfreq)?;
    let spectra = estimator.spectra(epochs, picks);
    let out = accumulate(spectra, cfg.max_trials, cfg.average)?;
    log::debug!(
        "averaged {} trials over {} channels × {} bins",
        out.n_trials,
        picks.len(),
        out.freqs.len()
    );
    Ok(out)
}
