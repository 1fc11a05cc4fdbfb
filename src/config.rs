//! Analysis configuration.
//!
//! [`PsdConfig`] holds every tunable parameter of the single-trial spectra
//! analysis.  The defaults are the values of the MNE "single trial power
//! spectra" example: 256-point Hann-windowed FFT, 2–200 Hz, two workers and
//! a cap of 20 trials.
use crate::error::PsdError;
use crate::psd::validate_transform;
use crate::window::Window;

/// What the running sum is divided by when the average is finalised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AverageDenominator {
    /// Number of epochs actually folded into the sum.
    #[default]
    Processed,
    /// The configured [`PsdConfig::max_trials`], even when the source ran
    /// short.  Reproduces the MNE example script for regression parity.
    TrialCap,
}

/// Configuration for PSD estimation and trial averaging.
///
/// All fields are `pub` so you can construct one with struct-update syntax:
///
/// ```
/// use trialpsd::PsdConfig;
///
/// let cfg = PsdConfig {
///     n_fft:      512,   // finer spectral resolution
///     max_trials: 50,
///     ..PsdConfig::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct PsdConfig {
    /// FFT length of one Welch segment.  Controls spectral resolution:
    /// bins are spaced `sfreq / n_fft` Hz apart.
    ///
    /// Every epoch must have at least this many samples.
    ///
    /// Default: `256`.
    pub n_fft: usize,

    /// Samples shared by consecutive Welch segments.  Must be `< n_fft`.
    ///
    /// Default: `0` (non-overlapping segments).
    pub n_overlap: usize,

    /// Taper applied to every segment before the FFT.
    ///
    /// Default: [`Window::Hann`].
    pub window: Window,

    /// Lower edge of the returned band in Hz (inclusive).
    ///
    /// Default: `2.0`.
    pub fmin: f64,

    /// Upper edge of the returned band in Hz (inclusive).
    ///
    /// Default: `200.0`.
    pub fmax: f64,

    /// Worker threads used for the per-channel transforms.
    /// `0` lets rayon pick (one per logical CPU).
    ///
    /// Default: `2`.
    pub n_jobs: usize,

    /// Maximum number of epochs folded into the average.  Epochs past the
    /// cap are never pulled from the source.
    ///
    /// Default: `20`.
    pub max_trials: usize,

    /// Denominator used to finalise the average.
    ///
    /// Default: [`AverageDenominator::Processed`].
    pub average: AverageDenominator,
}

impl Default for PsdConfig {
    fn default() -> Self {
        Self {
            n_fft: 256,
            n_overlap: 0,
            window: Window::Hann,
            fmin: 2.0,
            fmax: 200.0,
            n_jobs: 2,
            max_trials: 20,
            average: AverageDenominator::Processed,
        }
    }
}

impl PsdConfig {
    /// Spacing of the frequency grid in Hz: `sfreq / n_fft`.
    ///
    /// ```
    /// use trialpsd::PsdConfig;
    /// let cfg = PsdConfig::default();
    /// assert_eq!(cfg.freq_resolution(512.0), 2.0);
    /// ```
    pub fn freq_resolution(&self, sfreq: f64) -> f64 {
        sfreq / self.n_fft as f64
    }

    /// Check the parameters that do not depend on any particular epoch.
    pub fn validate(&self, sfreq: f64) -> Result<(), PsdError> {
        validate_transform(self.n_fft, self.n_overlap, sfreq)?;
        if !(self.fmin < self.fmax) {
            return Err(PsdError::invalid(format!(
                "fmin ({}) must be below fmax ({})",
                self.fmin, self.fmax
            )));
        }
        if self.max_trials == 0 {
            return Err(PsdError::invalid("max_trials must be at least 1"));
        }
        Ok(())
    }
}
