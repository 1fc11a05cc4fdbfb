mod common;
use common::{max_abs_diff, noise_trial, source};
use ndarray::Array2;
use std::cell::Cell;
use std::rc::Rc;
use trialpsd::{
    accumulate, single_trial_spectra, to_db, AverageDenominator, PsdConfig, PsdError, PsdEstimator,
};

const SFREQ: f64 = 512.0;
const PICKS: [usize; 3] = [0, 1, 2];

fn trials(n: usize) -> Vec<Array2<f64>> {
    (0..n).map(|i| noise_trial(3, 512, 100 + i as u64)).collect()
}

/// dB spectra of `trials`, computed one by one outside the accumulator.
fn db_spectra(est: &PsdEstimator, trials: &[Array2<f64>]) -> Vec<Array2<f64>> {
    trials
        .iter()
        .map(|t| to_db(&est.estimate(t.view(), &PICKS).unwrap(), est.freqs()).unwrap())
        .collect()
}

/// Epoch source that counts pulls and records when it is dropped.
struct CountingSource {
    trials: std::vec::IntoIter<Array2<f64>>,
    pulls: Rc<Cell<usize>>,
    dropped: Rc<Cell<bool>>,
}

impl Iterator for CountingSource {
    type Item = Result<Array2<f64>, std::io::Error>;
    fn next(&mut self) -> Option<Self::Item> {
        let t = self.trials.next()?;
        self.pulls.set(self.pulls.get() + 1);
        Some(Ok(t))
    }
}

impl Drop for CountingSource {
    fn drop(&mut self) {
        self.dropped.set(true);
    }
}

#[test]
fn first_trial_is_exact_db_of_epoch_zero() {
    let cfg = PsdConfig { max_trials: 4, ..PsdConfig::default() };
    let data = trials(4);
    let est = PsdEstimator::new(&cfg, SFREQ).unwrap();
    let expected = db_spectra(&est, &data[..1]).remove(0);

    let out = single_trial_spectra(source(data), &PICKS, SFREQ, &cfg).unwrap();
    assert_eq!(out.first, expected);
}

#[test]
fn full_run_average_is_elementwise_mean() {
    let k = 5;
    let cfg = PsdConfig { max_trials: k, ..PsdConfig::default() };
    let data = trials(k);
    let est = PsdEstimator::new(&cfg, SFREQ).unwrap();
    let spectra = db_spectra(&est, &data);
    let mut mean = Array2::<f64>::zeros(spectra[0].dim());
    for s in &spectra {
        mean += s;
    }
    mean /= k as f64;

    for denominator in [AverageDenominator::Processed, AverageDenominator::TrialCap] {
        let cfg = PsdConfig { average: denominator, ..cfg.clone() };
        let out = single_trial_spectra(source(data.clone()), &PICKS, SFREQ, &cfg).unwrap();
        assert_eq!(out.n_trials, k);
        let err = max_abs_diff(&out.average, &mean);
        assert!(err < 1e-10, "{denominator:?}: max error {err:.2e}");
    }
}

#[test]
fn short_source_divides_by_processed_count() {
    let cfg = PsdConfig { max_trials: 5, ..PsdConfig::default() };
    let data = trials(3);
    let est = PsdEstimator::new(&cfg, SFREQ).unwrap();
    let spectra = db_spectra(&est, &data);
    let mean = (&spectra[0] + &spectra[1] + &spectra[2]) / 3.0;

    let out = single_trial_spectra(source(data), &PICKS, SFREQ, &cfg).unwrap();
    assert_eq!(out.n_trials, 3);
    assert!(max_abs_diff(&out.average, &mean) < 1e-10);
}

#[test]
fn short_source_with_trial_cap_divides_by_cap() {
    let cfg = PsdConfig {
        max_trials: 5,
        average: AverageDenominator::TrialCap,
        ..PsdConfig::default()
    };
    let data = trials(3);
    let est = PsdEstimator::new(&cfg, SFREQ).unwrap();
    let spectra = db_spectra(&est, &data);
    let scaled = (&spectra[0] + &spectra[1] + &spectra[2]) / 5.0;

    let out = single_trial_spectra(source(data), &PICKS, SFREQ, &cfg).unwrap();
    assert_eq!(out.n_trials, 3);
    assert!(max_abs_diff(&out.average, &scaled) < 1e-10);
}

#[test]
fn empty_source_is_empty_sequence() {
    let err = single_trial_spectra(source(vec![]), &PICKS, SFREQ, &PsdConfig::default()).unwrap_err();
    assert!(matches!(err, PsdError::EmptySequence), "{err}");
}

#[test]
fn cap_stops_pulling_and_releases_source() {
    let pulls = Rc::new(Cell::new(0));
    let dropped = Rc::new(Cell::new(false));
    let src = CountingSource {
        trials: trials(10).into_iter(),
        pulls: Rc::clone(&pulls),
        dropped: Rc::clone(&dropped),
    };
    let cfg = PsdConfig { max_trials: 3, ..PsdConfig::default() };
    let out = single_trial_spectra(src, &PICKS, SFREQ, &cfg).unwrap();
    assert_eq!(out.n_trials, 3);
    assert_eq!(pulls.get(), 3);
    assert!(dropped.get(), "source still alive after the run");
}

#[test]
fn source_failure_aborts_with_epoch_index() {
    let items: Vec<Result<Array2<f64>, std::io::Error>> = vec![
        Ok(noise_trial(3, 512, 1)),
        Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "recording truncated")),
        Ok(noise_trial(3, 512, 2)),
    ];
    let err = single_trial_spectra(items, &PICKS, SFREQ, &PsdConfig::default()).unwrap_err();
    match err {
        PsdError::Source { epoch, source } => {
            assert_eq!(epoch, 1);
            assert_eq!(source.to_string(), "recording truncated");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn flat_channel_is_domain_error_at_its_epoch() {
    let mut data = trials(3);
    data[1].row_mut(2).fill(0.0);
    let err = single_trial_spectra(source(data), &PICKS, SFREQ, &PsdConfig::default()).unwrap_err();
    assert_eq!(err.epoch(), Some(1));
    match err.root() {
        PsdError::DomainError { channel, value, .. } => {
            assert_eq!(*channel, 2);
            assert_eq!(*value, 0.0);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn accumulate_accepts_owned_grids() {
    let est = PsdEstimator::new(&PsdConfig::default(), SFREQ).unwrap();
    let items: Vec<Result<_, PsdError>> = trials(2)
        .iter()
        .map(|t| Ok((est.estimate(t.view(), &PICKS).unwrap(), est.freqs().clone())))
        .collect();
    let out = accumulate(items, 10, AverageDenominator::Processed).unwrap();
    assert_eq!(out.n_trials, 2);
    assert_eq!(&out.freqs, est.freqs());
}

#[test]
fn empty_picks_rejected_before_source_is_pulled() {
    let err = single_trial_spectra(source(vec![]), &[], SFREQ, &PsdConfig::default()).unwrap_err();
    assert!(matches!(err, PsdError::InvalidInput(_)), "{err}");

    let pulls = Rc::new(Cell::new(0));
    let src = CountingSource {
        trials: trials(3).into_iter(),
        pulls: Rc::clone(&pulls),
        dropped: Rc::new(Cell::new(false)),
    };
    let err = single_trial_spectra(src, &[], SFREQ, &PsdConfig::default()).unwrap_err();
    assert!(matches!(err, PsdError::InvalidInput(_)), "{err}");
    assert_eq!(pulls.get(), 0);
}

#[test]
fn zero_trial_cap_is_invalid() {
    let cfg = PsdConfig { max_trials: 0, ..PsdConfig::default() };
    let err = single_trial_spectra(source(trials(2)), &PICKS, SFREQ, &cfg).unwrap_err();
    assert!(matches!(err, PsdError::InvalidInput(_)), "{err}");
}
