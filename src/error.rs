//! Error taxonomy for image customization.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors raised while customizing an image.
///
/// Causes from the process layer are kept as `anyhow` sources so the CLI
/// prints the whole chain.
#[derive(Debug, Error)]
pub enum CustomizeError {
    /// Bad input detected before anything was touched.
    #[error("{0}")]
    Precondition(String),

    #[error("Failed to stage {} for modification", .input.display())]
    Staging {
        input: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("Could not determine partition offset of {}", .image.display())]
    Offset {
        image: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to {action} {}", .target.display())]
    Mount {
        action: &'static str,
        target: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to {action} resolv.conf in {}", .root.display())]
    Shim {
        action: &'static str,
        root: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// The customization delegate or provenance generation failed; the
    /// mount has been removed and the working image discarded.
    #[error("Customization of {} failed", .root.display())]
    Delegation {
        root: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("File {} already exists. Use --overwrite to overwrite existing files.", .0.display())]
    ArtifactCollision(PathBuf),

    #[error("Failed to generate {artifact}")]
    Artifact {
        artifact: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to produce {}", .output.display())]
    Finalize {
        output: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

impl CustomizeError {
    pub(crate) fn staging(input: impl Into<PathBuf>, source: impl Into<anyhow::Error>) -> Self {
        CustomizeError::Staging {
            input: input.into(),
            source: source.into(),
        }
    }

    pub(crate) fn finalize(output: impl Into<PathBuf>, source: impl Into<anyhow::Error>) -> Self {
        CustomizeError::Finalize {
            output: output.into(),
            source: source.into(),
        }
    }
}
