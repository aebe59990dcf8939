pub type ComposeResult<T> = Result<T, ComposeError>;

#[derive(thiserror::Error, Debug)]
pub enum ComposeError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("ffmpeg error: {0}")]
    Ffmpeg(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ComposeError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn ffmpeg(msg: impl Into<String>) -> Self {
        Self::Ffmpeg(msg.into())
    }

    /// True when the failure was caused by the caller's input rather than the
    /// environment (missing encoder, broken pipe, unreadable file).
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            ComposeError::validation("x")
                .to_string()
                .contains("validation error:")
        );
        assert!(ComposeError::ffmpeg("x").to_string().contains("ffmpeg error:"));
    }

    #[test]
    fn io_errors_convert() {
        let err: ComposeError = std::io::Error::other("boom").into();
        assert!(err.to_string().contains("boom"));
        assert!(!err.is_validation());
    }
}
