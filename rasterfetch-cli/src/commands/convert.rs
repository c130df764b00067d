//! Convert command - stream an image file through the factory and write the result.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use image::{DynamicImage, ImageFormat};
use indicatif::{ProgressBar, ProgressStyle};
use rasterfetch::{FactoryId, ImageFactory, ImageProducer, Region, Subsampling, ThreadedSource};
use tracing::info;

use super::{open_source, parse_region, parse_subsampling, parse_tile_size, TileSize};
use crate::error::CliError;

#[derive(Debug, Args)]
pub struct ConvertArgs {
    /// Image file to read
    pub input: PathBuf,

    /// Image file to write; the format follows the extension
    pub output: PathBuf,

    /// Region of interest as X,Y,W,H (-1 for W or H reaches the source edge)
    #[arg(long, value_parser = parse_region, allow_hyphen_values = true)]
    pub region: Option<Region>,

    /// Keep every Xth column and Yth row, as X,Y
    #[arg(long, value_parser = parse_subsampling)]
    pub subsample: Option<Subsampling>,

    /// Tile size the input is streamed in, as WxH
    #[arg(long, value_parser = parse_tile_size, default_value = "64x64")]
    pub tile: TileSize,

    /// Deliver tiles from a worker thread pool
    #[arg(long)]
    pub threaded: bool,

    /// Show a progress bar
    #[arg(long)]
    pub progress: bool,
}

fn progress_bar(factory: &ImageFactory) -> ProgressBar {
    let bar = ProgressBar::new(100);
    let style = ProgressStyle::with_template("{spinner} [{bar:40}] {pos:>3}%")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    bar.set_style(style);

    let listener_bar = bar.clone();
    factory.add_progress_listener(Arc::new(move |_factory: FactoryId, percent: u32| {
        listener_bar.set_position(u64::from(percent));
    }));
    bar
}

/// JPEG and friends cannot store alpha.
fn fit_format(image: DynamicImage, format: ImageFormat) -> DynamicImage {
    match format {
        ImageFormat::Jpeg | ImageFormat::Pnm if image.color().has_alpha() => DynamicImage::ImageRgb8(image.to_rgb8()),
        _ => image,
    }
}

/// Run the convert command.
pub fn run(args: ConvertArgs) -> Result<(), CliError> {
    let format = ImageFormat::from_path(&args.output)
        .map_err(|_| CliError::InvalidArgument(format!("unknown output format for {}", args.output.display())))?;

    let source = open_source(&args.input, args.tile)?;
    let runtime = if args.threaded {
        Some(tokio::runtime::Builder::new_multi_thread().build()?)
    } else {
        None
    };
    let producer: Arc<dyn ImageProducer> = match &runtime {
        Some(runtime) => Arc::new(ThreadedSource::new(source, runtime.handle().clone())),
        None => source,
    };

    let factory = ImageFactory::new(producer);
    if let Some(region) = args.region {
        factory.set_region(region);
    }
    if let Some(subsampling) = args.subsample {
        factory.set_subsampling(subsampling.x_step() as i32, subsampling.y_step() as i32);
    }

    let bar = args.progress.then(|| progress_bar(&factory));
    let result = factory.get_image();
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }
    let image = result?.ok_or(CliError::Aborted)?;

    info!(
        width = image.width(),
        height = image.height(),
        encoding = ?image.encoding().kind(),
        "Materialized image"
    );

    fit_format(image.to_dynamic_image(), format)
        .save_with_format(&args.output, format)
        .map_err(|source| CliError::ImageWrite {
            path: args.output.clone(),
            source,
        })?;

    println!(
        "Wrote {}×{} image to {}",
        image.width(),
        image.height(),
        args.output.display()
    );
    Ok(())
}
