//! Deterministic output file names.

use crate::stats::StatisticKind;

/// Render a shift like a Python float: integral values keep a trailing `.0`.
pub fn format_shift(shift: f32) -> String {
    if shift.is_finite() && shift.fract() == 0.0 {
        format!("{shift:.1}")
    } else {
        format!("{shift}")
    }
}

/// `{content}_{style}_{kind}_{shift}.{ext}`
pub fn output_file_name(content: &str, style: &str, kind: StatisticKind, shift: f32, ext: &str) -> String {
    format!("{content}_{style}_{kind}_{}.{ext}", format_shift(shift))
}
