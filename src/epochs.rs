//! Event-locked epoching of a continuous recording.
//!
//! Cuts `[C, T]` data into windows `[tmin, tmax]` around each matching event,
//! applies per-channel baseline correction and drops epochs whose
//! peak-to-peak amplitude exceeds a threshold on designated channels.
//! Matches `mne.Epochs(raw, events, event_id, tmin, tmax,
//! baseline=(None, 0), reject=...)` for a preloaded recording.
//!
//! [`EventEpochs`] is lazy: nothing is copied until the next epoch is pulled,
//! and it only borrows the recording.
use std::ops::Range;

use ndarray::{s, Array2, ArrayView2};

use crate::error::PsdError;

/// One event marker.  `sample` is relative to the first column of the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub sample: usize,
    pub id: i32,
}

/// Parse an MNE event array `[N, 3]` (`sample, previous value, id`).
pub fn events_from_array(events: &Array2<i64>) -> Result<Vec<Event>, PsdError> {
    if events.ncols() != 3 {
        return Err(PsdError::invalid(format!(
            "event array must have 3 columns, got {}",
            events.ncols()
        )));
    }
    events
        .rows()
        .into_iter()
        .enumerate()
        .map(|(i, row)| {
            let sample = usize::try_from(row[0])
                .map_err(|_| PsdError::invalid(format!("event {i} has negative sample {}", row[0])))?;
            let id = i32::try_from(row[2])
                .map_err(|_| PsdError::invalid(format!("event {i} id {} out of range", row[2])))?;
            Ok(Event { sample, id })
        })
        .collect()
}

/// Channels sharing one peak-to-peak rejection threshold
/// (MNE's `reject=dict(grad=4000e-13)` with the channel type resolved to
/// indices by the caller).
#[derive(Debug, Clone, PartialEq)]
pub struct RejectGroup {
    pub channels: Vec<usize>,
    pub max_ptp: f64,
}

/// Epoching parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochParams {
    /// Window start relative to the event, in seconds.  Default `-1.0`.
    pub tmin: f64,
    /// Window end relative to the event, in seconds (inclusive).  Default `1.0`.
    pub tmax: f64,
    /// Only events with this id are epoched.  Default `1`.
    pub event_id: i32,
    /// Baseline interval in seconds; `None` bounds mean the epoch edge.
    /// `None` disables baseline correction.  Default `(None, Some(0.0))`.
    pub baseline: Option<(Option<f64>, Option<f64>)>,
    /// Rejection thresholds, checked after baseline correction.
    pub reject: Vec<RejectGroup>,
}

impl Default for EpochParams {
    fn default() -> Self {
        Self {
            tmin: -1.0,
            tmax: 1.0,
            event_id: 1,
            baseline: Some((None, Some(0.0))),
            reject: vec![],
        }
    }
}

/// Subtract, per channel, the mean over `interval` (sample indices).
pub fn baseline_correct_inplace(epoch: &mut Array2<f64>, interval: Range<usize>) {
    for mut row in epoch.rows_mut() {
        let m = row.slice(s![interval.clone()]).mean().unwrap_or(0.0);
        row.mapv_inplace(|v| v - m);
    }
}

/// `max - min` of a channel.
pub fn peak_to_peak(x: ndarray::ArrayView1<f64>) -> f64 {
    let (lo, hi) = x
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    hi - lo
}

/// Largest `|t · sfreq|` accepted for a window edge (2^52 samples).
const MAX_OFFSET: f64 = 4_503_599_627_370_496.0;

/// `round(t · sfreq)` as a sample offset; out-of-range or non-finite
/// times are rejected before the integer cast.
fn sample_offset(t: f64, sfreq: f64) -> Result<i64, PsdError> {
    let offset = (t * sfreq).round();
    if !(offset.abs() <= MAX_OFFSET) {
        return Err(PsdError::invalid(format!(
            "epoch edge {t} s is out of range at {sfreq} Hz"
        )));
    }
    Ok(offset as i64)
}

/// Lazy iterator of baseline-corrected, artifact-free epochs `[C, n_times]`.
#[derive(Debug)]
pub struct EventEpochs<'a> {
    data: ArrayView2<'a, f64>,
    events: std::slice::Iter<'a, Event>,
    event_id: i32,
    /// `round(tmin · sfreq)`
    offset: i64,
    n_times: usize,
    baseline: Option<Range<usize>>,
    reject: Vec<RejectGroup>,
    n_rejected: usize,
    n_out_of_bounds: usize,
}

impl<'a> EventEpochs<'a> {
    pub fn new(
        data: ArrayView2<'a, f64>,
        sfreq: f64,
        events: &'a [Event],
        params: &EpochParams,
    ) -> Result<Self, PsdError> {
        if !(sfreq.is_finite() && sfreq > 0.0) {
            return Err(PsdError::invalid(format!("sample rate must be positive, got {sfreq}")));
        }
        if !(params.tmin <= params.tmax) {
            return Err(PsdError::invalid(format!(
                "tmin ({}) must not exceed tmax ({})",
                params.tmin, params.tmax
            )));
        }
        let first = sample_offset(params.tmin, sfreq)?;
        let last = sample_offset(params.tmax, sfreq)?;
        let n_times = (last - first + 1) as usize;

        let baseline = match params.baseline {
            None => None,
            Some((bmin, bmax)) => {
                let bmin = bmin.unwrap_or(params.tmin);
                let bmax = bmax.unwrap_or(params.tmax);
                if !(bmin >= params.tmin && bmax <= params.tmax && bmin <= bmax) {
                    return Err(PsdError::invalid(format!(
                        "baseline ({bmin}, {bmax}) not inside epoch window ({}, {})",
                        params.tmin, params.tmax
                    )));
                }
                let i0 = ((bmin * sfreq).round() as i64 - first).max(0) as usize;
                let i1 = (((bmax * sfreq).round() as i64 - first) as usize).min(n_times - 1);
                Some(i0..i1 + 1)
            }
        };

        let n_ch = data.nrows();
        for group in &params.reject {
            if let Some(&bad) = group.channels.iter().find(|&&ch| ch >= n_ch) {
                return Err(PsdError::invalid(format!(
                    "reject channel {bad} out of range for {n_ch} channels"
                )));
            }
            if !(group.max_ptp > 0.0) {
                return Err(PsdError::invalid(format!(
                    "reject threshold must be positive, got {}",
                    group.max_ptp
                )));
            }
        }

        Ok(Self {
            data,
            events: events.iter(),
            event_id: params.event_id,
            offset: first,
            n_times,
            baseline,
            reject: params.reject.clone(),
            n_rejected: 0,
            n_out_of_bounds: 0,
        })
    }

    /// Samples per epoch.
    pub fn n_times(&self) -> usize {
        self.n_times
    }

    /// Epochs dropped so far by the peak-to-peak criterion.
    pub fn n_rejected(&self) -> usize {
        self.n_rejected
    }

    /// Matching events skipped so far because their window left the data.
    pub fn n_out_of_bounds(&self) -> usize {
        self.n_out_of_bounds
    }

    fn window(&self, ev: &Event) -> Option<Range<usize>> {
        let start = ev.sample as i64 + self.offset;
        let end = start + self.n_times as i64;
        (start >= 0 && end <= self.data.ncols() as i64).then(|| start as usize..end as usize)
    }

    /// First `(channel, ptp, threshold)` that exceeds its threshold.
    fn rejection(&self, epoch: &Array2<f64>) -> Option<(usize, f64, f64)> {
        self.reject.iter().find_map(|group| {
            group.channels.iter().find_map(|&ch| {
                let ptp = peak_to_peak(epoch.row(ch));
                (ptp > group.max_ptp).then_some((ch, ptp, group.max_ptp))
            })
        })
    }
}

impl Iterator for EventEpochs<'_> {
    type Item = Array2<f64>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(ev) = self.events.next() {
            if ev.id != self.event_id {
                continue;
            }
            let Some(range) = self.window(ev) else {
                self.n_out_of_bounds += 1;
                log::debug!("event at sample {} skipped: window outside the recording", ev.sample);
                continue;
            };

            let mut epoch = self.data.slice(s![.., range]).to_owned();
            if let Some(interval) = &self.baseline {
                baseline_correct_inplace(&mut epoch, interval.clone());
            }
            if let Some((ch, ptp, max)) = self.rejection(&epoch) {
                self.n_rejected += 1;
                log::debug!(
                    "epoch at sample {} rejected: channel {ch} peak-to-peak {ptp:e} > {max:e}",
                    ev.sample
                );
                continue;
            }
            return Some(epoch);
        }
        None
    }
}
