use thiserror::Error;

use crate::image::ImageFormat;

/// Reasons an image can be rejected by [`Flash::load_image`](crate::flash::Flash::load_image).
///
/// A failed load never modifies the installed flash contents.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("image is empty")]
    Empty,
    #[error("{format} image truncated: need {needed} bytes, got {actual}")]
    Truncated {
        format: ImageFormat,
        needed: usize,
        actual: usize,
    },
    #[error("{format} image too large: {size} bytes (limit {limit})")]
    TooLarge {
        format: ImageFormat,
        size: usize,
        limit: usize,
    },
    #[error("unrecognized image format: {0}")]
    UnknownFormat(String),
    #[error("invalid {format} header: {reason}")]
    BadHeader {
        format: ImageFormat,
        reason: &'static str,
    },
}
