pub type Result<T> = core::result::Result<T, Error>;

// Kernel error codes. The syscall boundary returns these as
// negative values in a0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(isize)]
pub enum Error {
    Uncategorized = -1,
    NotFound = -2,
    OutOfMemory = -3,
    InvalidArgument = -4,
    Interrupted = -5,
    NoChild = -6,
}

impl Error {
    pub fn from_isize(v: isize) -> Self {
        match v {
            -2 => Self::NotFound,
            -3 => Self::OutOfMemory,
            -4 => Self::InvalidArgument,
            -5 => Self::Interrupted,
            -6 => Self::NoChild,
            _ => Self::Uncategorized,
        }
    }
}
