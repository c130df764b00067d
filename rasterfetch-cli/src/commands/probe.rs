//! Probe command - report the encoding of an image without transferring its pixels.

use std::path::PathBuf;

use clap::Args;
use rasterfetch::{ChannelLayout, Encoding, ImageFactory};

use super::{open_source, TileSize};
use crate::error::CliError;

#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Image file to inspect
    pub input: PathBuf,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

fn describe_layout(layout: &ChannelLayout) -> String {
    match layout {
        ChannelLayout::Gray { bits } => format!("gray, {} bits", bits),
        ChannelLayout::Packed(masks) => format!(
            "packed, red={:#010x} green={:#010x} blue={:#010x} alpha={:#010x}",
            masks.red, masks.green, masks.blue, masks.alpha
        ),
        ChannelLayout::Indexed { palette } => format!("indexed, {} palette entries", palette.len()),
    }
}

/// Render the report printed by `probe`.
pub fn render(width: u32, height: u32, encoding: Option<&Encoding>, json: bool) -> Result<String, CliError> {
    if json {
        let report = serde_json::json!({
            "width": width,
            "height": height,
            "encoding": encoding,
        });
        return Ok(serde_json::to_string_pretty(&report)?);
    }

    let mut lines = vec![format!("Size:          {}×{}", width, height)];
    match encoding {
        Some(encoding) => {
            lines.push(format!("Samples:       {}", encoding.kind()));
            lines.push(format!("Layout:        {}", describe_layout(encoding.layout())));
            lines.push(format!("Alpha:         {}", if encoding.has_alpha() { "yes" } else { "no" }));
            lines.push(format!(
                "Premultiplied: {}",
                if encoding.is_premultiplied() { "yes" } else { "no" }
            ));
        }
        None => lines.push("Encoding:      not reported".to_string()),
    }
    Ok(lines.join("\n"))
}

/// Run the probe command.
pub fn run(args: ProbeArgs) -> Result<(), CliError> {
    let source = open_source(&args.input, TileSize { width: 64, height: 64 })?;
    let (width, height) = (source.width(), source.height());

    let factory = ImageFactory::new(source);
    let encoding = factory.get_encoding()?;

    println!("{}", render(width, height, encoding.as_ref(), args.json)?);
    Ok(())
}
