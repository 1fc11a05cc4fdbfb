//! Log-power conversion and trial averaging.
//!
//! Every spectrum is converted to dB *before* it is summed, so the result is
//! the mean of `10·log10(psd)` over trials, not `10·log10` of the mean power.
//! The first converted spectrum is kept verbatim for comparison.
use std::borrow::Borrow;

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2};

use crate::config::AverageDenominator;
use crate::error::PsdError;

/// `10·log10(psd)`, element-wise.
///
/// Power that is zero, negative or non-finite has no log-power and yields
/// [`PsdError::DomainError`] (`channel` is the row index, i.e. the position
/// in the channel selection).  `-inf` never leaves this function.
pub fn to_db(psd: &Array2<f64>, freqs: &Array1<f64>) -> Result<Array2<f64>, PsdError> {
    if let Some(((channel, k), &value)) = psd.indexed_iter().find(|(_, p)| !(**p > 0.0 && p.is_finite())) {
        return Err(PsdError::DomainError {
            channel,
            freq: freqs.get(k).copied().unwrap_or(f64::NAN),
            value,
        });
    }
    Ok(psd.mapv(|p| 10.0 * p.log10()))
}

/// First-trial and trial-averaged log-power spectra.
#[derive(Debug, Clone)]
pub struct SingleTrialSpectra {
    /// dB spectrum of the first epoch, `[C, F]`.
    pub first: Array2<f64>,
    /// Mean dB spectrum over the folded epochs, `[C, F]`.
    pub average: Array2<f64>,
    /// Frequency grid (Hz), length `F`.
    pub freqs: Array1<f64>,
    /// Epochs folded into `average`.
    pub n_trials: usize,
}

impl SingleTrialSpectra {
    /// Views restricted to `freqs < fmax`, in `(first, average, freqs)` order.
    ///
    /// Handy for display: the power-line harmonics near the top of the band
    /// tend to dominate a heatmap's colour scale.
    pub fn below(&self, fmax: f64) -> (ArrayView2<'_, f64>, ArrayView2<'_, f64>, ArrayView1<'_, f64>) {
        let n = self.freqs.iter().take_while(|&&f| f < fmax).count();
        (
            self.first.slice(s![.., ..n]),
            self.average.slice(s![.., ..n]),
            self.freqs.slice(s![..n]),
        )
    }
}

/// Running dB sum over at most `max_trials` spectra.
///
/// Processes one spectrum at a time; no locking is involved.
#[derive(Debug)]
pub struct TrialAccumulator {
    max_trials: usize,
    denominator: AverageDenominator,
    first: Option<Array2<f64>>,
    sum: Option<Array2<f64>>,
    freqs: Option<Array1<f64>>,
    n_trials: usize,
}

impl TrialAccumulator {
    pub fn new(max_trials: usize, denominator: AverageDenominator) -> Self {
        Self { max_trials, denominator, first: None, sum: None, freqs: None, n_trials: 0 }
    }

    /// `true` once `max_trials` spectra were folded in.
    pub fn is_full(&self) -> bool {
        self.n_trials >= self.max_trials
    }

    pub fn n_trials(&self) -> usize {
        self.n_trials
    }

    /// Convert `psd` to dB and fold it into the running sum.
    ///
    /// Errors are tagged with the index of the spectrum being pushed.
    pub fn push(&mut self, psd: &Array2<f64>, freqs: &Array1<f64>) -> Result<(), PsdError> {
        let epoch = self.n_trials;
        self.fold(psd, freqs).map_err(|e| e.at_epoch(epoch))
    }

    fn fold(&mut self, psd: &Array2<f64>, freqs: &Array1<f64>) -> Result<(), PsdError> {
        if self.is_full() {
            return Err(PsdError::invalid(format!("trial cap of {} already reached", self.max_trials)));
        }
        if psd.ncols() != freqs.len() {
            return Err(PsdError::invalid(format!(
                "spectrum has {} bins but the frequency grid has {}",
                psd.ncols(),
                freqs.len()
            )));
        }

        let db = to_db(psd, freqs)?;
        match &mut self.sum {
            None => {
                self.sum = Some(db.clone());
                self.first = Some(db);
                self.freqs = Some(freqs.clone());
            }
            Some(sum) => {
                if self.freqs.as_ref() != Some(freqs) {
                    return Err(PsdError::invalid(
                        "frequency grid differs from the first trial's",
                    ));
                }
                if sum.dim() != db.dim() {
                    return Err(PsdError::invalid(format!(
                        "spectrum shape {:?} differs from the first trial's {:?}",
                        db.dim(),
                        sum.dim()
                    )));
                }
                *sum += &db;
            }
        }
        self.n_trials += 1;
        Ok(())
    }

    /// Divide the sum by the configured denominator.
    pub fn finish(self) -> Result<SingleTrialSpectra, PsdError> {
        let (Some(sum), Some(first), Some(freqs)) = (self.sum, self.first, self.freqs) else {
            return Err(PsdError::EmptySequence);
        };
        let denom = match self.denominator {
            AverageDenominator::Processed => self.n_trials,
            AverageDenominator::TrialCap => self.max_trials,
        };
        if self.n_trials < self.max_trials {
            log::info!(
                "epoch source ran short: {} of {} trials, averaging over {denom}",
                self.n_trials,
                self.max_trials
            );
        }
        let inv = 1.0 / denom as f64;
        Ok(SingleTrialSpectra {
            first,
            average: sum.mapv_into(|v| v * inv),
            freqs,
            n_trials: self.n_trials,
        })
    }
}

/// Fold a lazy `(psd, freqs)` sequence into a [`SingleTrialSpectra`].
///
/// Pulls at most `max_trials` items; the sequence is dropped before this
/// returns, whether it was exhausted or not.  The first error aborts the run.
pub fn accumulate<I, F>(
    spectra: I,
    max_trials: usize,
    denominator: AverageDenominator,
) -> Result<SingleTrialSpectra, PsdError>
where
    I: IntoIterator<Item = Result<(Array2<f64>, F), PsdError>>,
    F: Borrow<Array1<f64>>,
{
    if max_trials == 0 {
        return Err(PsdError::invalid("max_trials must be at least 1"));
    }
    let mut acc = TrialAccumulator::new(max_trials, denominator);
    let mut spectra = spectra.into_iter();
    while !acc.is_full() {
        let Some(item) = spectra.next() else { break };
        let (psd, freqs) = item?;
        acc.push(&psd, freqs.borrow())?;
    }
    drop(spectra);
    acc.finish()
}
