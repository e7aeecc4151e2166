//! Error types shared across the compilation pipeline.

use thiserror::Error;
use crate::session::SessionError;

/// Any fatal condition raised while building, compiling, or driving an OBE
/// system.
///
/// Nothing here is retried: each variant aborts the current pass and requires
/// the caller to correct its inputs.
#[derive(Debug, Error)]
pub enum ObeError {
    /// One or more symbols could not be resolved. The list is complete,
    /// sorted, and free of duplicates.
    #[error("{context}: undefined symbols {symbols:?}")]
    UndefinedSymbols { context: String, symbols: Vec<String> },

    /// A parameter was assigned a value of the wrong kind.
    #[error("parameter `{name}` is a {expected} parameter and cannot hold a {found} value")]
    TypeLock { name: String, expected: &'static str, found: &'static str },

    /// Compound expressions are fixed once the registry is constructed.
    #[error("compound parameter `{0}` cannot be redefined after construction")]
    FrozenCompound(String),

    #[error("compound parameters form a dependency cycle: {0:?}")]
    CyclicDependency(Vec<String>),

    #[error("unknown parameter `{0}`")]
    UnknownParameter(String),

    #[error("parameter `{0}` is not a leaf parameter")]
    NotALeaf(String),

    #[error("parameter `{0}` defined more than once")]
    DuplicateParameter(String),

    #[error("`{0}` is reserved and cannot be used as a parameter name")]
    ReservedName(String),

    #[error("could not parse `{input}` at byte {position}: {message}")]
    Parse { input: String, position: usize, message: String },

    #[error("could not evaluate expression: {0}")]
    Evaluation(String),

    /// A requested transition has no non-zero coupling elements.
    #[error("transition {0} has no non-zero coupling elements")]
    DisconnectedCoupling(String),

    /// An excited state has no allowed decay channel.
    #[error("excited state {0} has no allowed decay channel")]
    DisconnectedDecay(String),

    #[error("state {0} has no overlap with the system basis")]
    StateNotFound(String),

    #[error("states selected for compaction are coupled: {0}")]
    CompactCoupled(String),

    #[error("transitions imply an inconsistent rotating frame at transition {0}")]
    InconsistentFrame(String),

    #[error("invalid shape: {0}")]
    Shape(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Linalg(#[from] ndarray_linalg::error::LinalgError),

    #[error(transparent)]
    NdShape(#[from] ndarray::ShapeError),

    #[error(transparent)]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Npz(#[from] ndarray_npy::WriteNpzError),

    /// Failures reported by the external solver are passed through untouched.
    #[error(transparent)]
    Session(#[from] SessionError),
}

pub type ObeResult<T> = Result<T, ObeError>;

/// Collect a list of offending names into the canonical (sorted, deduplicated)
/// form used by [`ObeError::UndefinedSymbols`].
pub(crate) fn undefined<I, T>(context: &str, symbols: I) -> ObeError
where
    I: IntoIterator<Item = T>,
    T: Into<String>,
{
    let mut symbols: Vec<String> = symbols.into_iter().map(Into::into).collect();
    symbols.sort();
    symbols.dedup();
    ObeError::UndefinedSymbols { context: context.to_string(), symbols }
}
