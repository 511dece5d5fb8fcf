use std::fmt::Write as FmtWrite;

use anyhow::Result;

use crate::layout::{
    CONNECTOR_RADIUS, CONTROL_OFFSET, CONTROL_RADIUS, MapLayout, PlacedNode, Size, ViewTransform,
    font_size,
};
use crate::tree::NodeType;
use crate::utils::escape_xml;

const LINK_COLOR: &str = "#90A4AE";
const TEXT_COLOR: &str = "#1F2933";
const GROUP_FILL: &str = "#E3F2FD";
const DIVERGED_STROKE: &str = "#E65100";

/// How the map is framed in the exported document.
#[derive(Debug, Clone, PartialEq)]
pub enum Framing {
    /// Crop to the diagram bounds plus `padding` on every side.
    Fit { padding: f32 },
    /// Reproduce the interactive view: a `viewport`-sized canvas with the
    /// pan/zoom transform applied to the map group.
    View {
        viewport: Size,
        transform: ViewTransform,
    },
}

impl Default for Framing {
    fn default() -> Self {
        Framing::Fit { padding: 40.0 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SvgOptions {
    pub background: String,
    pub framing: Framing,
    /// Draw the collapse controls and reparent connectors.
    pub controls: bool,
}

impl Default for SvgOptions {
    fn default() -> Self {
        Self {
            background: "white".to_string(),
            framing: Framing::default(),
            controls: true,
        }
    }
}

/// Serializes a laid-out map as a standalone SVG document.
pub fn render_svg(map: &MapLayout, options: &SvgOptions) -> Result<String> {
    let (width, height, view_box, group_transform) = match &options.framing {
        Framing::Fit { padding } => {
            let bounds = map
                .bounds()
                .map(|bounds| bounds.inflate(CONTROL_OFFSET + CONTROL_RADIUS * 2.0 + padding));
            match bounds {
                Some(bounds) => (
                    bounds.width(),
                    bounds.height(),
                    format!(
                        "{:.0} {:.0} {:.0} {:.0}",
                        bounds.min_x,
                        bounds.min_y,
                        bounds.width(),
                        bounds.height()
                    ),
                    None,
                ),
                None => (padding * 2.0, padding * 2.0, format!("0 0 {0:.0} {0:.0}", padding * 2.0), None),
            }
        }
        Framing::View {
            viewport,
            transform,
        } => (
            viewport.width,
            viewport.height,
            format!("0 0 {:.0} {:.0}", viewport.width, viewport.height),
            Some(transform.svg_attr()),
        ),
    };

    let mut svg = String::new();
    write!(
        svg,
        r##"<?xml version="1.0" encoding="UTF-8"?>
<svg xmlns="http://www.w3.org/2000/svg" width="{:.0}" height="{:.0}" viewBox="{}" font-family="Inter, system-ui, sans-serif">
  <rect x="-50%" y="-50%" width="200%" height="200%" fill="{}" />
"##,
        width,
        height,
        view_box,
        escape_xml(&options.background)
    )?;

    match &group_transform {
        Some(transform) => writeln!(svg, "  <g class=\"map\" transform=\"{transform}\">")?,
        None => writeln!(svg, "  <g class=\"map\">")?,
    }

    for link in &map.links {
        writeln!(
            svg,
            "    <path class=\"link\" data-source=\"{}\" data-target=\"{}\" d=\"{}\" fill=\"none\" stroke=\"{}\" stroke-width=\"2\" />",
            escape_xml(&link.source),
            escape_xml(&link.target),
            link.path(),
            LINK_COLOR
        )?;
    }

    for node in &map.nodes {
        write_node(&mut svg, node, options.controls)?;
    }

    svg.push_str("  </g>\n</svg>\n");
    Ok(svg)
}

fn write_node(svg: &mut String, node: &PlacedNode, controls: bool) -> Result<()> {
    let fill = match node.node_type {
        NodeType::Issue => node.color,
        NodeType::Team | NodeType::Project => GROUP_FILL,
    };
    let opacity = if node.is_greyed_out { "0.45" } else { "1" };
    let stroke = if node.diverged {
        format!(" stroke=\"{DIVERGED_STROKE}\" stroke-width=\"2\" stroke-dasharray=\"6 4\"")
    } else {
        " stroke=\"#546E7A\" stroke-width=\"1\"".to_string()
    };
    let weight = if node.depth == 0 { "700" } else { "500" };

    writeln!(
        svg,
        "    <g class=\"node {}\" data-id=\"{}\" transform=\"{}\" opacity=\"{}\">",
        node.node_type,
        escape_xml(&node.id),
        node.transform(),
        opacity
    )?;
    writeln!(
        svg,
        "      <rect x=\"{:.1}\" y=\"{:.1}\" width=\"{:.1}\" height=\"{:.1}\" rx=\"8\" ry=\"8\" fill=\"{}\"{} />",
        -node.size.width / 2.0,
        -node.size.height / 2.0,
        node.size.width,
        node.size.height,
        fill,
        stroke
    )?;
    writeln!(
        svg,
        "      <text x=\"0\" y=\"0\" fill=\"{}\" font-size=\"{:.0}\" font-weight=\"{}\" text-anchor=\"middle\" dominant-baseline=\"middle\">{}</text>",
        TEXT_COLOR,
        font_size(node.depth),
        weight,
        escape_xml(&node.label)
    )?;

    if controls {
        let half = node.size.width / 2.0;
        if node.has_children {
            let cx = half + CONTROL_OFFSET + CONTROL_RADIUS / 2.0;
            let glyph = if node.collapsed { "+" } else { "\u{2212}" };
            writeln!(
                svg,
                "      <circle class=\"collapse-control\" cx=\"{cx:.1}\" cy=\"0\" r=\"{:.0}\" fill=\"white\" stroke=\"{LINK_COLOR}\" />",
                CONTROL_RADIUS / 2.0
            )?;
            writeln!(
                svg,
                "      <text x=\"{cx:.1}\" y=\"0\" font-size=\"12\" text-anchor=\"middle\" dominant-baseline=\"central\" fill=\"{TEXT_COLOR}\">{glyph}</text>"
            )?;
        }
        if node.parent_id.is_some() {
            let cx = node.connector_point().x - node.center.x;
            writeln!(
                svg,
                "      <circle class=\"connector\" cx=\"{cx:.1}\" cy=\"0\" r=\"{:.0}\" fill=\"{LINK_COLOR}\" />",
                CONNECTOR_RADIUS / 2.0
            )?;
        }
    }

    svg.push_str("    </g>\n");
    Ok(())
}
