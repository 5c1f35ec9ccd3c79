use ash::vk;
use thiserror::Error;

/// Coarse classification of a [`GPUError`], used by callers to pick a
/// recovery policy without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    IllegalState,
    OutOfRange,
    ResourceExhausted,
    UnsupportedOperation,
    Backend,
}

impl ErrorKind {
    /// Recoverable errors can be retried with a different size, range or pool.
    pub fn is_recoverable(self) -> bool {
        matches!(self, ErrorKind::ResourceExhausted | ErrorKind::OutOfRange)
    }
}

#[derive(Error, Debug)]
pub enum GPUError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("range {offset}+{size} exceeds {limit} bytes")]
    OutOfRange { offset: u64, size: u64, limit: u64 },

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("binding {binding}: {reason}")]
    InvalidBindTableBinding { binding: u32, reason: String },

    #[error("Vulkan Error: {0}")]
    VulkanError(vk::Result),
}

impl GPUError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GPUError::InvalidArgument(_) | GPUError::InvalidBindTableBinding { .. } => {
                ErrorKind::InvalidArgument
            }
            GPUError::IllegalState(_) => ErrorKind::IllegalState,
            GPUError::OutOfRange { .. } => ErrorKind::OutOfRange,
            GPUError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            GPUError::UnsupportedOperation(_) => ErrorKind::UnsupportedOperation,
            GPUError::VulkanError(res) => match *res {
                vk::Result::ERROR_OUT_OF_POOL_MEMORY
                | vk::Result::ERROR_FRAGMENTED_POOL
                | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
                | vk::Result::ERROR_OUT_OF_HOST_MEMORY => ErrorKind::ResourceExhausted,
                vk::Result::ERROR_MEMORY_MAP_FAILED => ErrorKind::UnsupportedOperation,
                _ => ErrorKind::Backend,
            },
        }
    }
}

/// Convenient crate-wide result type.
pub type Result<T, E = GPUError> = std::result::Result<T, E>;

impl From<vk::Result> for GPUError {
    fn from(res: vk::Result) -> Self {
        match res {
            vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL => {
                GPUError::ResourceExhausted(format!("bind pool: {}", res))
            }
            _ => GPUError::VulkanError(res),
        }
    }
}

/// Bounds check shared by map, update and view creation.
pub(crate) fn check_range(offset: u64, size: u64, limit: u64) -> Result<()> {
    match offset.checked_add(size) {
        Some(end) if end <= limit => Ok(()),
        _ => Err(GPUError::OutOfRange {
            offset,
            size,
            limit,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_exhaustion_maps_to_resource_exhausted() {
        let err: GPUError = vk::Result::ERROR_OUT_OF_POOL_MEMORY.into();
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
        assert!(err.kind().is_recoverable());

        let err: GPUError = vk::Result::ERROR_DEVICE_LOST.into();
        assert_eq!(err.kind(), ErrorKind::Backend);
    }

    #[test]
    fn range_check_rejects_overflow() {
        assert!(check_range(0, 256, 256).is_ok());
        assert!(check_range(200, 57, 256).is_err());
        let err = check_range(u64::MAX, 2, 256).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
        assert!(!ErrorKind::IllegalState.is_recoverable());
    }
}
