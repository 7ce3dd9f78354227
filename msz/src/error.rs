//! Error type shared by every stage of the pipeline.

use thiserror::Error;

/// Failure kinds surfaced by the library.
///
/// Every public operation returns one of these; there are no retries and no
/// partial successes. Worker threads report their own failure through the
/// join path, and the pipeline surfaces the first failure in partition order
/// once all workers have finished.
#[derive(Debug, Error)]
pub enum MszError {
    /// The input declares a format this implementation does not handle:
    /// an unknown accession, a transform incompatible with the source
    /// element type, or an unknown container version.
    #[error("unsupported input: {0}")]
    Unsupported(String),

    /// The mzML source is structurally broken: the tokeniser rejected it,
    /// an expected marker is missing or out of order, or the spectrum count
    /// in the markup does not match the number of binary pairs found.
    #[error("malformed mzML source: {0}")]
    MalformedSource(String),

    /// The msz container is damaged: bad magic, out-of-range trailer
    /// offsets, block-length tables inconsistent with stream lengths, or a
    /// block that does not decompress to its declared size.
    #[error("corrupt msz container: {0}")]
    CorruptContainer(String),

    /// A read, write, or mapping syscall failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The caller supplied an inconsistent configuration, e.g. a scan
    /// number absent from the partition table.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, MszError>;
