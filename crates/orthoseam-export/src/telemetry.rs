//! Telemetry text serializer.
//!
//! Writes a [`PatchTelemetry`] record as a small `key = value` text file
//! and parses it back. Lines beginning with `#` are comments; blank
//! lines are ignored. Keys may appear in any order, and unknown keys are
//! rejected so typos do not pass silently.
//!
//! ```text
//! # orthoseam patch telemetry
//! # Patch: 0
//! transform = 0.5, 0, 1005, 0, -0.5, 498
//! rows = 26
//! cols = 15
//! pixel_count = 390
//! start = 7, 0
//! end = 7, 25
//! ```
//!
//! Floating-point values use Rust's shortest round-trip formatting, so
//! `parse_telemetry(&to_telemetry(t, ..))` reproduces `t` exactly.

use std::fmt::Write;
use std::str::FromStr;

use orthoseam_pipeline::PatchTelemetry;

use crate::ExportError;

/// Serialize a telemetry record.
///
/// `patch` is emitted as a comment naming which overlap patch the record
/// belongs to.
#[must_use]
pub fn to_telemetry(telemetry: &PatchTelemetry, patch: Option<usize>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# orthoseam patch telemetry");
    if let Some(patch) = patch {
        let _ = writeln!(out, "# Patch: {patch}");
    }
    let t = telemetry.transform;
    let _ = writeln!(
        out,
        "transform = {}, {}, {}, {}, {}, {}",
        t[0], t[1], t[2], t[3], t[4], t[5]
    );
    let _ = writeln!(out, "rows = {}", telemetry.rows);
    let _ = writeln!(out, "cols = {}", telemetry.cols);
    let _ = writeln!(out, "pixel_count = {}", telemetry.pixel_count);
    let _ = writeln!(out, "start = {}, {}", telemetry.start[0], telemetry.start[1]);
    let _ = writeln!(out, "end = {}, {}", telemetry.end[0], telemetry.end[1]);
    out
}

/// Parse a telemetry record written by [`to_telemetry`].
///
/// # Errors
///
/// Returns [`ExportError::TelemetryParse`] for a malformed, duplicated or
/// unknown line and [`ExportError::MissingKey`] when a key is absent.
pub fn parse_telemetry(text: &str) -> Result<PatchTelemetry, ExportError> {
    let mut transform = None;
    let mut rows = None;
    let mut cols = None;
    let mut pixel_count = None;
    let mut start = None;
    let mut end = None;

    for (i, raw) in text.lines().enumerate() {
        let line_no = i + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let err = |reason: String| ExportError::TelemetryParse {
            line: line_no,
            reason,
        };
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| err(format!("expected `key = value`, got `{line}`")))?;
        let (key, value) = (key.trim(), value.trim());

        match key {
            "transform" => store(&mut transform, key, parse_list::<f64, 6>(value)),
            "rows" => store(&mut rows, key, parse_one(value)),
            "cols" => store(&mut cols, key, parse_one(value)),
            "pixel_count" => store(&mut pixel_count, key, parse_one(value)),
            "start" => store(&mut start, key, parse_list::<i64, 2>(value)),
            "end" => store(&mut end, key, parse_list::<i64, 2>(value)),
            other => Err(format!("unknown key `{other}`")),
        }
        .map_err(err)?;
    }

    Ok(PatchTelemetry {
        transform: transform.ok_or(ExportError::MissingKey("transform"))?,
        rows: rows.ok_or(ExportError::MissingKey("rows"))?,
        cols: cols.ok_or(ExportError::MissingKey("cols"))?,
        pixel_count: pixel_count.ok_or(ExportError::MissingKey("pixel_count"))?,
        start: start.ok_or(ExportError::MissingKey("start"))?,
        end: end.ok_or(ExportError::MissingKey("end"))?,
    })
}

fn store<T>(slot: &mut Option<T>, key: &str, parsed: Result<T, String>) -> Result<(), String> {
    if slot.is_some() {
        return Err(format!("duplicate key `{key}`"));
    }
    *slot = Some(parsed?);
    Ok(())
}

fn parse_one<T: FromStr>(value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("cannot parse `{value}` as a number"))
}

fn parse_list<T: FromStr + Copy + Default, const N: usize>(value: &str) -> Result<[T; N], String> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    if parts.len() != N {
        return Err(format!("expected {N} comma-separated values, got {}", parts.len()));
    }
    let mut out = [T::default(); N];
    for (slot, part) in out.iter_mut().zip(parts) {
        *slot = parse_one(part)?;
    }
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> PatchTelemetry {
        PatchTelemetry {
            transform: [0.5, 0.0, 1005.0, 0.0, -0.5, 498.0],
            rows: 26,
            cols: 15,
            pixel_count: 390,
            start: [7, 0],
            end: [-3, 25],
        }
    }

    #[test]
    fn header_and_patch_comment() {
        let text = to_telemetry(&sample(), Some(4));
        assert!(text.starts_with("# orthoseam patch telemetry\n# Patch: 4\n"));
        assert!(text.contains("rows = 26\n"));
        assert!(text.contains("end = -3, 25\n"));
    }

    #[test]
    fn round_trip_is_exact() {
        let mut t = sample();
        t.transform[2] = 1_234_567.123_456_789;
        let back = parse_telemetry(&to_telemetry(&t, None)).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn keys_in_any_order_with_comments() {
        let text = "end = 1, 2\n# note\n\nstart = 0, 0\npixel_count = 4\ncols = 2\nrows = 2\n\
                    transform = 1, 0, 0, 0, -1, 2\n";
        let t = parse_telemetry(text).unwrap();
        assert_eq!(t.end, [1, 2]);
        assert_eq!(t.affine().to_array(), [1.0, 0.0, 0.0, 0.0, -1.0, 2.0]);
    }

    #[test]
    fn missing_key_is_reported() {
        let text = to_telemetry(&sample(), None).replace("rows = 26\n", "");
        assert!(matches!(parse_telemetry(&text), Err(ExportError::MissingKey("rows"))));
    }

    #[test]
    fn bad_lines_are_reported_with_line_number() {
        let text = "# header\nrows = twenty\n";
        assert!(matches!(
            parse_telemetry(text),
            Err(ExportError::TelemetryParse { line: 2, .. })
        ));
        assert!(matches!(
            parse_telemetry("start = 1\n"),
            Err(ExportError::TelemetryParse { line: 1, .. })
        ));
        assert!(matches!(
            parse_telemetry("colour = red\n"),
            Err(ExportError::TelemetryParse { line: 1, .. })
        ));
        assert!(matches!(
            parse_telemetry("rows = 1\nrows = 2\n"),
            Err(ExportError::TelemetryParse { line: 2, .. })
        ));
    }
}
