//! Safetensors I/O for recordings and analysis results.
//!
//! Reader: a preloaded continuous recording
//!   `data` [C, T] F32|F64, `sfreq` [1] F32|F64, `events` [N, 3] I32|I64,
//!   optional `ch_names` (U8, newline separated).
//!
//! Writer: `first` [C, F], `average` [C, F], `freqs` [F] (F64),
//!   `picks` [C] and `n_trials` [1] (I32).
use anyhow::{bail, ensure, Context, Result};
use ndarray::{Array1, Array2};
use std::collections::HashMap;
use std::path::Path;

use crate::accumulate::SingleTrialSpectra;
use crate::epochs::{events_from_array, Event};

// ── Low-level safetensors parser (raw bytes → ndarray, no tensor library) ───

type Header = HashMap<String, serde_json::Value>;

fn parse_header(bytes: &[u8]) -> Result<(Header, usize)> {
    ensure!(bytes.len() >= 8, "safetensors file too small");
    let mut len = [0u8; 8];
    len.copy_from_slice(&bytes[..8]);
    let end = usize::try_from(u64::from_le_bytes(len))
        .ok()
        .and_then(|n| n.checked_add(8))
        .filter(|&end| end <= bytes.len())
        .context("safetensors header truncated")?;
    let header: Header = serde_json::from_slice(&bytes[8..end])
        .context("failed to parse safetensors header")?;
    Ok((header, end))
}

fn tensor_bytes<'b>(bytes: &'b [u8], data_start: usize, entry: &serde_json::Value) -> Result<&'b [u8]> {
    let offsets = entry["data_offsets"]
        .as_array()
        .filter(|o| o.len() == 2)
        .context("tensor without data_offsets")?;
    let offset = |v: &serde_json::Value| {
        v.as_u64()
            .and_then(|o| usize::try_from(o).ok())
            .and_then(|o| o.checked_add(data_start))
            .context("bad data offset")
    };
    let (s, e) = (offset(&offsets[0])?, offset(&offsets[1])?);
    ensure!(s <= e && e <= bytes.len(), "tensor data out of bounds");
    Ok(&bytes[s..e])
}

fn shape_of(entry: &serde_json::Value) -> Result<Vec<usize>> {
    entry["shape"]
        .as_array()
        .context("tensor without shape")?
        .iter()
        .map(|v| v.as_u64().map(|d| d as usize).context("bad shape entry"))
        .collect()
}

/// Any numeric tensor, widened to f64.
fn read_numeric(bytes: &[u8], data_start: usize, entry: &serde_json::Value) -> Result<Vec<f64>> {
    let raw = tensor_bytes(bytes, data_start, entry)?;
    let dtype = entry["dtype"].as_str().context("tensor without dtype")?;
    let vals = match dtype {
        "F32" => raw
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64)
            .collect(),
        "F64" => raw
            .chunks_exact(8)
            .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
            .collect(),
        "I32" => raw
            .chunks_exact(4)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64)
            .collect(),
        "I64" => raw
            .chunks_exact(8)
            .map(|b| i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f64)
            .collect(),
        other => bail!("unsupported dtype {other}"),
    };
    Ok(vals)
}

fn read_2d(bytes: &[u8], data_start: usize, header: &Header, key: &str) -> Result<Array2<f64>> {
    let entry = header.get(key).with_context(|| format!("missing '{key}' key"))?;
    let shape = shape_of(entry)?;
    ensure!(shape.len() == 2, "'{key}' must be 2-D, got shape {shape:?}");
    let vals = read_numeric(bytes, data_start, entry)?;
    Array2::from_shape_vec((shape[0], shape[1]), vals).with_context(|| format!("'{key}' shape mismatch"))
}

// ── Recording ───────────────────────────────────────────────────────────────

/// A preloaded continuous recording with its event markers.
#[derive(Debug, Clone)]
pub struct Recording {
    /// [C, T] in original units.
    pub data: Array2<f64>,
    /// Sampling rate (Hz).
    pub sfreq: f64,
    /// Event markers, sample indices relative to the first column of `data`.
    pub events: Vec<Event>,
    /// Channel names (may be empty if not saved).
    pub ch_names: Vec<String>,
}

impl Recording {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let (header, data_start) = parse_header(&bytes)?;

        let data = read_2d(&bytes, data_start, &header, "data")?;

        let sfreq_entry = header.get("sfreq").context("missing 'sfreq' key")?;
        let sfreq = *read_numeric(&bytes, data_start, sfreq_entry)?
            .first()
            .context("'sfreq' is empty")?;

        let events = read_2d(&bytes, data_start, &header, "events")?.mapv(|v| v as i64);
        let events = events_from_array(&events)?;

        // Channel names are optional.
        let ch_names = match header.get("ch_names") {
            Some(e) => std::str::from_utf8(tensor_bytes(&bytes, data_start, e)?)?
                .split('\n')
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            None => vec![],
        };
        if !ch_names.is_empty() {
            ensure!(
                ch_names.len() == data.nrows(),
                "{} channel names for {} channels",
                ch_names.len(),
                data.nrows()
            );
        }

        Ok(Recording { data, sfreq, events, ch_names })
    }
}

// ── Generic safetensors builder ───────────────────────────────────────────────

/// Simple safetensors file writer for F64, I32 and U8 tensors.
///
/// Usage:
/// ```rust,no_run
/// use trialpsd::io::StWriter;
/// use std::path::Path;
/// let mut w = StWriter::new();
/// w.add_f64("freqs", &[2.0, 4.0, 6.0], &[3]);
/// w.add_i32("n_trials", &[20], &[1]);
/// w.write(Path::new("/tmp/out.safetensors")).unwrap();
/// ```
#[derive(Debug, Default)]
pub struct StWriter {
    entries: Vec<(String, Vec<u8>, &'static str, Vec<usize>)>,
}

impl StWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_f64(&mut self, name: &str, data: &[f64], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, "F64", shape.to_vec()));
    }

    pub fn add_f64_arr1(&mut self, name: &str, arr: &Array1<f64>) {
        let data: Vec<f64> = arr.iter().copied().collect();
        self.add_f64(name, &data, &[arr.len()]);
    }

    pub fn add_f64_arr2(&mut self, name: &str, arr: &Array2<f64>) {
        let data: Vec<f64> = arr.iter().copied().collect();
        self.add_f64(name, &data, &[arr.nrows(), arr.ncols()]);
    }

    pub fn add_i32(&mut self, name: &str, data: &[i32], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, "I32", shape.to_vec()));
    }

    pub fn add_bytes(&mut self, name: &str, data: &[u8]) {
        self.entries.push((name.to_string(), data.to_vec(), "U8", vec![data.len()]));
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        use std::io::Write;
        let mut header_map = serde_json::Map::new();
        let mut offset: usize = 0;
        for (name, data, dtype, shape) in &self.entries {
            header_map.insert(name.clone(), serde_json::json!({
                "dtype": dtype,
                "shape": shape,
                "data_offsets": [offset, offset + data.len()],
            }));
            offset += data.len();
        }
        let hdr_bytes = serde_json::to_vec(&header_map)?;
        let pad = (8 - hdr_bytes.len() % 8) % 8;
        let padded: Vec<u8> = hdr_bytes.into_iter()
            .chain(std::iter::repeat(b' ').take(pad))
            .collect();
        let mut f = std::fs::File::create(path)
            .with_context(|| format!("creating {}", path.display()))?;
        f.write_all(&(padded.len() as u64).to_le_bytes())?;
        f.write_all(&padded)?;
        for (_, data, _, _) in &self.entries {
            f.write_all(data)?;
        }
        Ok(())
    }
}

// ── Result writer ─────────────────────────────────────────────────────────────

/// Write the analysis result for an external heatmap renderer.
pub fn write_spectra(spectra: &SingleTrialSpectra, picks: &[usize], path: &Path) -> Result<()> {
    let picks: Vec<i32> = picks
        .iter()
        .map(|&p| i32::try_from(p).context("channel index does not fit in i32"))
        .collect::<Result<_>>()?;
    let mut w = StWriter::new();
    w.add_f64_arr2("first", &spectra.first);
    w.add_f64_arr2("average", &spectra.average);
    w.add_f64_arr1("freqs", &spectra.freqs);
    w.add_i32("picks", &picks, &[picks.len()]);
    w.add_i32("n_trials", &[spectra.n_trials as i32], &[1]);
    w.write(path)
}
