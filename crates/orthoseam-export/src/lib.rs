//! orthoseam-export: Pure format serializers (sans-IO)
//!
//! Converts merge results into output formats: the per-patch telemetry
//! record as `key = value` text, masks as PNG bytes, and an SVG overlay
//! of the seams. Nothing here touches the filesystem.

pub mod png;
pub mod svg;
pub mod telemetry;

pub use crate::png::encode_mask_png;
pub use crate::svg::{SvgMetadata, to_seam_svg};
pub use crate::telemetry::{parse_telemetry, to_telemetry};

/// Errors from export serializers.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// PNG encoding failed.
    #[error("PNG encoding failed: {0}")]
    PngEncode(#[from] image::ImageError),

    /// A telemetry line could not be understood.
    #[error("telemetry line {line}: {reason}")]
    TelemetryParse {
        /// 1-based line number.
        line: usize,
        /// What went wrong.
        reason: String,
    },

    /// A required telemetry key never appeared.
    #[error("telemetry is missing key `{0}`")]
    MissingKey(&'static str),
}
