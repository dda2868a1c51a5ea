//! Renderer error types.

use std::fmt;

use facelens_graphics::GraphicsError;

/// Errors raised while setting up the renderer or building its inputs.
#[derive(Debug, Clone, PartialEq)]
pub enum RendererError {
    /// An error from the graphics layer.
    Graphics(GraphicsError),
    /// The configuration could not be read or is invalid.
    Config(String),
    /// An overlay asset or tracking record is malformed.
    InvalidAsset(String),
}

impl fmt::Display for RendererError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Graphics(err) => write!(f, "graphics error: {err}"),
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::InvalidAsset(msg) => write!(f, "invalid asset: {msg}"),
        }
    }
}

impl std::error::Error for RendererError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Graphics(err) => Some(err),
            _ => None,
        }
    }
}

impl From<GraphicsError> for RendererError {
    fn from(err: GraphicsError) -> Self {
        Self::Graphics(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RendererError::from(GraphicsError::PoolExhausted);
        assert_eq!(err.to_string(), "graphics error: no pixel buffer available");

        let err = RendererError::Config("frames_in_flight must be at least 1".to_string());
        assert_eq!(
            err.to_string(),
            "configuration error: frames_in_flight must be at least 1"
        );
    }

    #[test]
    fn test_error_source() {
        use std::error::Error;

        assert!(RendererError::from(GraphicsError::DeviceLost).source().is_some());
        assert!(RendererError::InvalidAsset("empty".into()).source().is_none());
    }
}
