//! strokestrip-export: Pure SVG renderings (sans-IO)
//!
//! Converts pipeline results into SVG documents for inspection:
//! stroke direction, the shared parameter `u`, isolines of `u`, the
//! pairwise orientation evidence, and the alignment terms behind `u`.

pub mod svg;

pub use svg::{
    SvgMetadata, build_path_data, to_isolines_svg, to_orientation_debug_svg, to_orientation_svg,
    to_parameter_svg, to_parameterization_debug_svg,
};
