use thiserror::Error;

/// Failures of the numeric core. Masked pixels are not errors: they stay NAN
/// in the response maps.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("shape mismatch of {what}: {left:?} vs {right:?}")]
    ShapeMismatch {
        what: &'static str,
        left: Vec<usize>,
        right: Vec<usize>,
    },

    #[error("numerical degeneracy: {0}")]
    NumericalDegeneracy(String),

    #[error("no {0} events detected")]
    NoEvents(&'static str),

    #[error("piezo onset not found at or after sample {0}")]
    OnsetNotFound(usize),

    #[error("{what} window [{start}, {end}) out of range({nframes})")]
    WindowOutOfRange {
        what: &'static str,
        start: isize,
        end: isize,
        nframes: usize,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn shape_mismatch(what: &'static str, left: &[usize], right: &[usize]) -> Self {
        Self::ShapeMismatch {
            what,
            left: left.to_vec(),
            right: right.to_vec(),
        }
    }
}
