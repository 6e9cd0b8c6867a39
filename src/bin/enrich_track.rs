//! Enrich one GPX track segment and write the result as JSON and/or GPX.
//!
//! ```text
//! enrich-track ride.gpx --config enrich.toml --json ride.json --gpx ride.gcj02.gpx --export-transformed
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};

use track_enricher::track::save_gpx;
use track_enricher::{
    load_gpx, CoordinateSystem, EnrichConfig, EnrichContext, MapOptions, Result, Route,
};

#[derive(Parser, Debug)]
#[command(name = "enrich-track")]
#[command(about = "Add transformed coordinates, regions and kinematics to a GPX track", long_about = None)]
#[command(version)]
struct Args {
    /// GPX file to read
    input: PathBuf,

    /// TOML configuration file
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Track index within the GPX file
    #[arg(long, default_value_t = 0)]
    track: usize,

    /// Segment index within the track
    #[arg(long, default_value_t = 0)]
    segment: usize,

    /// Native coordinate system of the input (overrides config)
    #[arg(long)]
    source: Option<CoordinateSystem>,

    /// Target coordinate system (overrides config)
    #[arg(long)]
    target: Option<CoordinateSystem>,

    /// Worker threads (overrides config)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Skip coordinate transformation
    #[arg(long)]
    no_transform: bool,

    /// Skip region resolution
    #[arg(long)]
    no_regions: bool,

    /// Write enriched route JSON here
    #[arg(long)]
    json: Option<PathBuf>,

    /// Write a GPX export here
    #[arg(long)]
    gpx: Option<PathBuf>,

    /// Use transformed coordinates in the GPX export
    #[arg(long)]
    export_transformed: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("[enrich-track] {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => EnrichConfig::from_file(path)?,
        None => EnrichConfig::default(),
    };
    if let Some(source) = args.source {
        config.coordinate.source = source;
    }
    if let Some(target) = args.target {
        config.coordinate.target = target;
    }
    if let Some(concurrency) = args.concurrency {
        config.executor.concurrency = concurrency;
    }
    if args.no_transform {
        config.enrich.transform = false;
    }
    if args.no_regions {
        config.enrich.resolve_regions = false;
    }
    config.validate()?;

    let raw = load_gpx(&args.input, args.track, args.segment)?;
    let context = EnrichContext::new(config)?;
    if context.config().enrich.resolve_regions {
        context.preload()?;
    }

    let total = raw.len() as u32;
    let step = (total / 10).max(1);
    let progress = MapOptions::default().with_progress(Arc::new(move |done: u32, total: u32| {
        if done % step == 0 || done == total {
            info!("[enrich-track] {}/{} points", done, total);
        }
    }));
    let enricher = context.enricher()?.with_map_options(progress);
    let track = enricher.enrich(&raw, &context.config().enrich)?;

    for failure in track.task.failures() {
        error!(
            "[enrich-track] Point {} failed: {}",
            failure.index,
            failure.error.as_deref().unwrap_or("unknown error")
        );
    }
    info!(
        "[enrich-track] {} points, {} succeeded, {} failed",
        track.task.total(),
        track.task.succeeded(),
        track.task.failed()
    );

    let name = args
        .input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let route = Route::from_enriched(track, &context.config().coordinate).with_name(name);
    info!(
        "[enrich-track] {:.1} km in {:.0} s",
        route.total_distance() / 1000.0,
        route.duration_seconds()
    );

    if let Some(path) = &args.json {
        route.save_json(path)?;
        info!("[enrich-track] Wrote {}", path.display());
    }
    if let Some(path) = &args.gpx {
        save_gpx(&route, path, args.export_transformed)?;
        info!("[enrich-track] Wrote {}", path.display());
    }
    if args.json.is_none() && args.gpx.is_none() {
        println!("{}", route.to_json()?);
    }
    Ok(())
}
