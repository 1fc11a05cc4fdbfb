/// single_trial_psd: epoch a recording around one event type, estimate the
/// PSD of every trial and write the first-trial and trial-averaged dB spectra.
///
/// Input  (safetensors): data [C, T], sfreq [1], events [N, 3], ch_names?
/// Output (safetensors): first [C, F], average [C, F], freqs [F], picks [C],
///                       n_trials [1]
///
/// Verbosity is controlled with `RUST_LOG` (e.g. `RUST_LOG=debug`).
use anyhow::{bail, Context, Result};
use clap::Parser;
use std::convert::Infallible;
use std::path::PathBuf;

use trialpsd::{
    io::{write_spectra, Recording},
    single_trial_spectra, AverageDenominator, EpochParams, EventEpochs, PsdConfig, RejectGroup,
};

#[derive(Parser, Debug)]
#[command(name = "single_trial_psd", about = "Single-trial and trial-averaged power spectra")]
struct Args {
    /// Input recording (safetensors).
    #[arg(long)]
    input: PathBuf,

    /// Output spectra (safetensors).
    #[arg(long)]
    output: PathBuf,

    /// Event id to epoch around.
    #[arg(long, default_value_t = 1)]
    event_id: i32,

    /// Epoch start relative to the event (s).
    #[arg(long, default_value_t = -1.0, allow_negative_numbers = true)]
    tmin: f64,

    /// Epoch end relative to the event (s).
    #[arg(long, default_value_t = 1.0, allow_negative_numbers = true)]
    tmax: f64,

    /// Skip baseline correction (default baseline: epoch start → 0 s).
    #[arg(long)]
    no_baseline: bool,

    /// Peak-to-peak rejection, `CH,CH,...=THRESH` (repeatable).
    #[arg(long, value_parser = parse_reject)]
    reject: Vec<RejectGroup>,

    /// FFT size per Welch segment.
    #[arg(long, default_value_t = 256)]
    n_fft: usize,

    /// Overlap between Welch segments (samples).
    #[arg(long, default_value_t = 0)]
    n_overlap: usize,

    /// Lower band edge (Hz).
    #[arg(long, default_value_t = 2.0)]
    fmin: f64,

    /// Upper band edge (Hz).
    #[arg(long, default_value_t = 200.0)]
    fmax: f64,

    /// PSD worker threads (0 = one per CPU).
    #[arg(long, default_value_t = 2)]
    n_jobs: usize,

    /// Maximum number of trials folded into the average.
    #[arg(long, default_value_t = 20)]
    max_trials: usize,

    /// Divide the dB sum by --max-trials even when fewer trials exist.
    #[arg(long)]
    divide_by_cap: bool,

    /// Channel indices to analyse, comma-separated (default: all).
    #[arg(long, value_delimiter = ',')]
    picks: Vec<usize>,

    /// Channel names to leave out (comma-separated, case/space-insensitive).
    #[arg(long, value_delimiter = ',')]
    exclude: Vec<String>,

    /// Only write frequencies below this value (Hz).
    #[arg(long)]
    display_fmax: Option<f64>,
}

/// `"0,1,2=4e-10"` → channels [0, 1, 2], threshold 4e-10.
fn parse_reject(s: &str) -> Result<RejectGroup> {
    let (chs, thresh) = s.split_once('=').context("expected CH,CH,...=THRESH")?;
    let channels = chs
        .split(',')
        .map(|c| c.trim().parse::<usize>().with_context(|| format!("bad channel index '{c}'")))
        .collect::<Result<Vec<_>>>()?;
    let max_ptp: f64 = thresh.trim().parse().with_context(|| format!("bad threshold '{thresh}'"))?;
    Ok(RejectGroup { channels, max_ptp })
}

/// Resolve `--picks` / `--exclude` against the recording's channel list.
fn resolve_picks(args: &Args, rec: &Recording) -> Result<Vec<usize>> {
    let n_ch = rec.data.nrows();
    let mut picks = if args.picks.is_empty() { (0..n_ch).collect() } else { args.picks.clone() };
    if !args.exclude.is_empty() {
        if rec.ch_names.is_empty() {
            bail!("--exclude needs channel names in the input file");
        }
        let norm = |s: &str| s.replace(' ', "").to_lowercase();
        let excluded: Vec<String> = args.exclude.iter().map(|s| norm(s.as_str())).collect();
        picks.retain(|&i| rec.ch_names.get(i).map_or(true, |n| !excluded.contains(&norm(n.as_str()))));
    }
    Ok(picks)
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let rec = Recording::load(&args.input)?;
    log::info!(
        "loaded {} ch × {} samples @ {} Hz, {} events",
        rec.data.nrows(),
        rec.data.ncols(),
        rec.sfreq,
        rec.events.len()
    );

    let picks = resolve_picks(&args, &rec)?;

    let params = EpochParams {
        tmin: args.tmin,
        tmax: args.tmax,
        event_id: args.event_id,
        baseline: if args.no_baseline { None } else { Some((None, Some(0.0))) },
        reject: args.reject.clone(),
    };
    let mut epochs = EventEpochs::new(rec.data.view(), rec.sfreq, &rec.events, &params)?;

    let cfg = PsdConfig {
        n_fft: args.n_fft,
        n_overlap: args.n_overlap,
        fmin: args.fmin,
        fmax: args.fmax,
        n_jobs: args.n_jobs,
        max_trials: args.max_trials,
        average: if args.divide_by_cap {
            AverageDenominator::TrialCap
        } else {
            AverageDenominator::Processed
        },
        ..PsdConfig::default()
    };

    let t0 = std::time::Instant::now();
    let mut spectra = single_trial_spectra(
        epochs.by_ref().map(Ok::<_, Infallible>),
        &picks,
        rec.sfreq,
        &cfg,
    )
    .context("single-trial PSD analysis failed")?;
    log::info!(
        "{} trials averaged in {:.1} ms ({} rejected, {} outside the recording)",
        spectra.n_trials,
        t0.elapsed().as_secs_f64() * 1000.0,
        epochs.n_rejected(),
        epochs.n_out_of_bounds()
    );

    if let Some(fmax) = args.display_fmax {
        let (first, average, freqs) = spectra.below(fmax);
        let (first, average, freqs) = (first.to_owned(), average.to_owned(), freqs.to_owned());
        spectra.first = first;
        spectra.average = average;
        spectra.freqs = freqs;
    }

    write_spectra(&spectra, &picks, &args.output)?;
    log::info!("written → {}", args.output.display());
    Ok(())
}
