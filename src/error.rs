use std::fmt;

#[derive(Debug)]
pub enum CoreError {
    Fft(FftError),
    Patch(PatchError),
}

#[derive(Debug)]
pub enum FftError {
    /// The requested transform size is not a supported power of two.
    UnsupportedSize { size: usize },
}

#[derive(Debug)]
pub enum PatchError {
    InvalidJson { message: String },
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::Fft(e) => write!(f, "FFT error: {e}"),
            CoreError::Patch(e) => write!(f, "Patch error: {e}"),
        }
    }
}

impl std::error::Error for CoreError {}

impl fmt::Display for FftError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FftError::UnsupportedSize { size } => {
                write!(
                    f,
                    "Unsupported FFT size {size} (expected a power of two in 128..=65536)"
                )
            }
        }
    }
}

impl std::error::Error for FftError {}

impl fmt::Display for PatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchError::InvalidJson { message } => write!(f, "Invalid patch JSON: {message}"),
        }
    }
}

impl std::error::Error for PatchError {}

impl From<FftError> for CoreError {
    fn from(e: FftError) -> Self {
        CoreError::Fft(e)
    }
}

impl From<PatchError> for CoreError {
    fn from(e: PatchError) -> Self {
        CoreError::Patch(e)
    }
}
