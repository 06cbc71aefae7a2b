//! Typed failures for the seams where callers branch on the kind of error

use thiserror::Error;

/// Failure to retrieve a page
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("fetch of {url} was cancelled")]
    Cancelled { url: String },
}

impl FetchError {
    /// Network failures, throttling and server errors are worth retrying.
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Cancelled { .. } => false,
        }
    }
}

/// Why a product reference produced no raw records
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SkipReason {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("required field `{0}` not found on the page")]
    MissingField(&'static str),

    #[error("no product data found on the page")]
    NoProductData,
}

impl SkipReason {
    /// Short stable label used when tallying skips.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Fetch(FetchError::Cancelled { .. }) => "cancelled",
            Self::Fetch(_) => "fetch-error",
            Self::MissingField(_) => "missing-field",
            Self::NoProductData => "no-product-data",
        }
    }
}

/// Why a raw record failed normalization
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Rejection {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("no price could be read from {0:?}")]
    UnparsablePrice(String),

    #[error("negative price {0:?}")]
    NegativePrice(String),

    #[error("invalid product url {0:?}")]
    InvalidUrl(String),
}

impl Rejection {
    pub const fn label(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "rejected-missing-field",
            Self::UnparsablePrice(_) => "rejected-price",
            Self::NegativePrice(_) => "rejected-negative-price",
            Self::InvalidUrl(_) => "rejected-url",
        }
    }
}
