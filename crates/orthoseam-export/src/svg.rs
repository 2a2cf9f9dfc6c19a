//! SVG seam overlay.
//!
//! Renders the seams of a [`MergeResult`] over the union frame: each
//! patch's centerline as a dashed grey path, its solved cutline as a red
//! path, and the straight connectors between patches as blue lines.
//! Coordinates are union-frame pixels, with every pixel drawn at its
//! centre, so the overlay can be laid over a PNG of the cutline mask.
//!
//! This is a pure function with no I/O -- it returns a `String`.

use svg::Document;
use svg::node::element::path::Data;
use svg::node::element::{Description, Group, Line, Path, Title};
use svg::node::{Text, Value};

use orthoseam_pipeline::{MergeResult, PixelCoord};

/// Metadata to embed in the SVG document.
///
/// Text values are XML-escaped automatically by the `svg` crate.
#[derive(Debug, Clone, Default)]
pub struct SvgMetadata<'a> {
    /// Document title, emitted as `<title>`.
    pub title: Option<&'a str>,
    /// Document description, emitted as `<desc>`.
    pub description: Option<&'a str>,
}

/// Build an SVG path `d` attribute string through pixel centres.
///
/// Returns an empty string for fewer than 2 pixels.
fn pixel_path_data(pixels: &[PixelCoord]) -> String {
    let [first, rest @ ..] = pixels else {
        return String::new();
    };
    if rest.is_empty() {
        return String::new();
    }
    let mut data = Data::new().move_to(centre(*first));
    for &p in rest {
        data = data.line_to(centre(p));
    }
    String::from(Value::from(data))
}

fn centre(p: PixelCoord) -> (f64, f64) {
    (f64::from(p.x) + 0.5, f64::from(p.y) + 0.5)
}

/// Serialize the seams of a merge into an SVG overlay.
///
/// Patches are emitted as `<g id="patch-N">` groups in patch order; the
/// connectors share one `<g id="connectors">` group.
#[must_use]
pub fn to_seam_svg(result: &MergeResult, metadata: &SvgMetadata<'_>) -> String {
    let w = result.union_dimensions.width;
    let h = result.union_dimensions.height;
    let mut doc = Document::new()
        .set("width", w)
        .set("height", h)
        .set("viewBox", (0, 0, w, h));

    if let Some(title) = metadata.title {
        doc = doc.add(Title::new(title));
    }
    if let Some(description) = metadata.description {
        doc = doc.add(Description::new().add(Text::new(description)));
    }

    for seam in &result.patches {
        let mut group = Group::new().set("id", format!("patch-{}", seam.index));
        let centerline = pixel_path_data(&seam.centerline.full);
        if !centerline.is_empty() {
            group = group.add(
                Path::new()
                    .set("class", "centerline")
                    .set("d", centerline)
                    .set("fill", "none")
                    .set("stroke", "#888888")
                    .set("stroke-width", 1)
                    .set("stroke-dasharray", "4 2"),
            );
        }
        let cutline = pixel_path_data(&seam.path.pixels);
        if !cutline.is_empty() {
            group = group.add(
                Path::new()
                    .set("class", "cutline")
                    .set("d", cutline)
                    .set("fill", "none")
                    .set("stroke", "red")
                    .set("stroke-width", 1),
            );
        }
        doc = doc.add(group);
    }

    if !result.connectors.is_empty() {
        let mut group = Group::new().set("id", "connectors");
        for &(a, b) in &result.connectors {
            let (x1, y1) = centre(a);
            let (x2, y2) = centre(b);
            group = group.add(
                Line::new()
                    .set("x1", x1)
                    .set("y1", y1)
                    .set("x2", x2)
                    .set("y2", y2)
                    .set("stroke", "blue")
                    .set("stroke-width", 1),
            );
        }
        doc = doc.add(group);
    }

    // The svg crate omits the XML declaration, so we prepend it.
    format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{doc}\n")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn path_data_uses_pixel_centres() {
        let d = pixel_path_data(&[PixelCoord::new(0, 0), PixelCoord::new(1, 1), PixelCoord::new(2, 1)]);
        assert_eq!(d, "M0.5,0.5 L1.5,1.5 L2.5,1.5");
    }

    #[test]
    fn short_paths_are_skipped() {
        assert!(pixel_path_data(&[]).is_empty());
        assert!(pixel_path_data(&[PixelCoord::new(3, 3)]).is_empty());
    }
}
