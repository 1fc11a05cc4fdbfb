//! Error type shared by the estimator, the accumulator and the epoch source.
use thiserror::Error;

/// Boxed error produced by an external epoch source.
pub type SourceError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum PsdError {
    /// Bad parameters or an epoch that does not fit them.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The epoch source yielded nothing to average.
    #[error("no epochs available to average")]
    EmptySequence,

    /// `10 * log10(p)` is undefined for this power value.
    #[error("log-power undefined for channel {channel} at {freq:.2} Hz (power = {value:e})")]
    DomainError { channel: usize, freq: f64, value: f64 },

    /// The epoch source itself failed while producing an epoch.
    #[error("epoch source failed at epoch {epoch}")]
    Source {
        epoch: usize,
        #[source]
        source: SourceError,
    },

    /// Context wrapper naming the epoch that triggered `source`.
    #[error("epoch {epoch}: {source}")]
    AtEpoch {
        epoch: usize,
        #[source]
        source: Box<PsdError>,
    },
}

impl PsdError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        PsdError::InvalidInput(msg.into())
    }

    /// Attach the index of the epoch being processed.
    pub fn at_epoch(self, epoch: usize) -> Self {
        PsdError::AtEpoch { epoch, source: Box::new(self) }
    }

    /// Strip any [`PsdError::AtEpoch`] layers.
    pub fn root(&self) -> &PsdError {
        match self {
            PsdError::AtEpoch { source, .. } => source.root(),
            other => other,
        }
    }

    /// Index of the failing epoch, if one is known.
    pub fn epoch(&self) -> Option<usize> {
        match self {
            PsdError::AtEpoch { epoch, .. } | PsdError::Source { epoch, .. } => Some(*epoch),
            _ => None,
        }
    }
}
