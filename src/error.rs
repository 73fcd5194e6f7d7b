/// Invalid-input errors. These are caller mistakes and are always returned,
/// never converted into a failed fit.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Paired input arrays disagree in shape.
    #[error("array shapes differ: {0:?} vs {1:?}")]
    ShapeMismatch(Vec<usize>, Vec<usize>),
    /// Parameter vector length does not name a model kind (expects 5, 6 or 7).
    #[error("expected 5, 6 or 7 model parameters, got {0}")]
    ParameterCount(usize),
    /// A fitting window must be at least one pixel wide.
    #[error("window width must be positive")]
    ZeroWindowWidth,
    /// The stack has no pixels along at least one axis.
    #[error("stack has an empty axis: {0:?}")]
    EmptyStack(Vec<usize>),
    /// A requested slice lies beyond the stack depth.
    #[error("slice {slice} out of range for stack depth {depth}")]
    SliceOutOfRange { slice: usize, depth: usize },
    /// The name does not match any model kind (sym, norot, full or their aliases).
    #[error("unknown model kind: {0}")]
    UnknownModelKind(String),
}

pub type Result<T> = std::result::Result<T, Error>;
