//! # Ember Error Handling
//!
//! Error types for the command queue stack.
//!
//! Error handling in Ember follows these principles:
//! - Errors are typed and categorized
//! - No panics in production code paths
//! - Errors discovered on the completion thread reach clients only through
//!   event status, never through an unrelated caller

use core::fmt;

// =============================================================================
// RESULT TYPE
// =============================================================================

/// Ember Result type alias
pub type Result<T> = core::result::Result<T, Error>;

// =============================================================================
// ERROR ENUM
// =============================================================================

/// Ember unified error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // Generic Errors
    // =========================================================================
    /// Invalid parameter provided
    InvalidParameter,
    /// Object is in the wrong state for the operation
    InvalidState,
    /// Operation not supported
    NotSupported,
    /// Operation timed out
    Timeout,

    // =========================================================================
    // Lane / Serial Errors
    // =========================================================================
    /// Serial or event belongs to a different lane
    LaneMismatch,
    /// No free lane index left on the device
    LanesExhausted,

    // =========================================================================
    // Memory Errors
    // =========================================================================
    /// Out of host or staging resources
    OutOfResources,
    /// Access past the end of a buffer
    BufferOverflow,

    // =========================================================================
    // Submission Errors
    // =========================================================================
    /// Device rejected a batch
    SubmissionFailed,
    /// Device is lost; the lane can no longer make progress
    DeviceLost,
    /// Completion worker could not accept work before the timeout
    DeviceUnresponsive,
    /// An event in a wait list finished with an error
    WaitListEventFailed,
    /// A deferred host transfer could not be performed
    HostTransferFailed,
    /// Completion worker has been shut down
    QueueTerminated,
}

impl Error {
    /// Check if the error means the lane cannot make further progress
    pub const fn is_device_loss(&self) -> bool {
        matches!(self, Self::DeviceLost | Self::DeviceUnresponsive)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Generic
            Self::InvalidParameter => write!(f, "invalid parameter"),
            Self::InvalidState => write!(f, "invalid state"),
            Self::NotSupported => write!(f, "operation not supported"),
            Self::Timeout => write!(f, "operation timed out"),

            // Lane
            Self::LaneMismatch => write!(f, "serial belongs to a different lane"),
            Self::LanesExhausted => write!(f, "no free lane index"),

            // Memory
            Self::OutOfResources => write!(f, "out of resources"),
            Self::BufferOverflow => write!(f, "buffer overflow"),

            // Submission
            Self::SubmissionFailed => write!(f, "submission failed"),
            Self::DeviceLost => write!(f, "device lost"),
            Self::DeviceUnresponsive => write!(f, "device unresponsive"),
            Self::WaitListEventFailed => write!(f, "event in wait list failed"),
            Self::HostTransferFailed => write!(f, "host transfer failed"),
            Self::QueueTerminated => write!(f, "queue terminated"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
