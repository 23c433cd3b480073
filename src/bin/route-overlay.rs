//! route-overlay CLI - render an activity's route overlay to PNG or SVG
//!
//! Usage:
//!   route-overlay render --activity <id> --out overlay.png
//!   route-overlay render --activity-json a.json [--streams-json s.json] --out overlay.svg
//!   route-overlay decode <polyline>
//!
//! Activities fetched by id need STRAVA_ACCESS_TOKEN. Place search uses
//! Nominatim (NOMINATIM_URL, NOMINATIM_USER_AGENT) unless --no-places.

use clap::{Parser, Subcommand};
use image::ImageFormat;
use log::info;
use route_overlay::http::parse_stream_set;
use route_overlay::polyline::decode_with_precision;
use route_overlay::{
    Activity, ApiConfig, GpsStream, NominatimClient, OverlayConfig, OverlayError,
    RasterSurface, RecordingSurface, RenderOutcome, Result, RouteOverlayRenderer, StravaClient,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "route-overlay")]
#[command(about = "Route map overlays for activity posts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose debug output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the overlay for one activity
    Render {
        /// Strava activity id (fetched from the API)
        #[arg(long, conflicts_with = "activity_json")]
        activity: Option<String>,

        /// Activity JSON file (Strava shape)
        #[arg(long)]
        activity_json: Option<PathBuf>,

        /// GPS stream file: {coordinates, timestamps, ...} or a Strava stream set
        #[arg(long)]
        streams_json: Option<PathBuf>,

        /// Canvas width in pixels
        #[arg(long, default_value = "1080")]
        width: u32,

        /// Canvas height in pixels
        #[arg(long, default_value = "1350")]
        height: u32,

        /// Output file, .png or .svg
        #[arg(short, long)]
        out: PathBuf,

        /// PNG to draw on instead of a transparent canvas (sets the size;
        /// embedded as the bottom layer of SVG output)
        #[arg(long)]
        background: Option<PathBuf>,

        /// TrueType/OpenType font for labels and numerals (PNG output)
        #[arg(long)]
        font: Option<PathBuf>,

        /// Overlay config JSON
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Skip place-name search
        #[arg(long)]
        no_places: bool,
    },

    /// Decode an encoded polyline and print its points
    Decode {
        polyline: String,

        /// Decimal digits of precision
        #[arg(long, default_value = "5")]
        precision: u32,
    },
}

struct RenderArgs {
    activity: Option<String>,
    activity_json: Option<PathBuf>,
    streams_json: Option<PathBuf>,
    width: u32,
    height: u32,
    out: PathBuf,
    background: Option<PathBuf>,
    font: Option<PathBuf>,
    config: Option<PathBuf>,
    no_places: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format(|buf, record| writeln!(buf, "[{:5}] {}", record.level(), record.args()))
        .init();

    let result = match cli.command {
        Commands::Render {
            activity,
            activity_json,
            streams_json,
            width,
            height,
            out,
            background,
            font,
            config,
            no_places,
        } => {
            run_render(RenderArgs {
                activity,
                activity_json,
                streams_json,
                width,
                height,
                out,
                background,
                font,
                config,
                no_places,
            })
            .await
        }
        Commands::Decode {
            polyline,
            precision,
        } => run_decode(&polyline, precision),
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run_decode(polyline: &str, precision: u32) -> Result<()> {
    let points = decode_with_precision(polyline, precision)?;
    for (i, p) in points.iter().enumerate() {
        println!("{:4}  {:.6}, {:.6}", i, p.latitude, p.longitude);
    }
    println!("{} points", points.len());
    Ok(())
}

async fn run_render(args: RenderArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => OverlayConfig::from_file(path)?,
        None => OverlayConfig::default(),
    };
    let api = ApiConfig::from_env()?;
    let results_per_query = config.places.results_per_query;
    let mut renderer = RouteOverlayRenderer::new(config);

    let activity = match (&args.activity, &args.activity_json) {
        (_, Some(path)) => load_activity(path)?,
        (Some(id), None) => {
            let strava = Arc::new(StravaClient::from_config(&api)?);
            let activity = strava.fetch_activity(id).await?;
            renderer = renderer.with_stream_provider(strava);
            activity
        }
        (None, None) => {
            return Err(OverlayError::Config {
                message: "either --activity or --activity-json is required".to_string(),
            })
        }
    };

    let stream = args.streams_json.as_deref().map(load_stream).transpose()?;

    if !args.no_places {
        let nominatim = NominatimClient::from_config(&api, results_per_query)?;
        renderer = renderer.with_place_search(Arc::new(nominatim));
    }

    let is_svg = args
        .out
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("svg"));

    let outcome = if is_svg {
        let mut surface = match &args.background {
            Some(path) => {
                let png = std::fs::read(path)?;
                let background = image::load_from_memory_with_format(&png, ImageFormat::Png)?;
                RecordingSurface::new(background.width(), background.height())
                    .with_background_png(&png)
            }
            None => RecordingSurface::new(args.width, args.height),
        };
        let outcome = renderer
            .render(&mut surface, &activity, stream.as_ref())
            .await?;
        std::fs::write(&args.out, surface.to_svg())?;
        outcome
    } else {
        let mut surface = match &args.background {
            Some(path) => RasterSurface::from_image(image::open(path)?.into_rgba8()),
            None => RasterSurface::new(args.width, args.height),
        };
        if let Some(path) = &args.font {
            surface = surface.with_font(std::fs::read(path)?)?;
        }
        let outcome = renderer
            .render(&mut surface, &activity, stream.as_ref())
            .await?;
        surface.save_png(&args.out)?;
        outcome
    };

    match outcome {
        RenderOutcome::Drawn(summary) => info!(
            "Wrote {} ({} points, {} stops, {} labels)",
            args.out.display(),
            summary.route_points,
            summary.stops,
            summary.labels_placed
        ),
        RenderOutcome::Skipped(reason) => info!(
            "Nothing to draw ({:?}), wrote empty canvas to {}",
            reason,
            args.out.display()
        ),
    }
    Ok(())
}

fn load_activity(path: &Path) -> Result<Activity> {
    let json = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

/// Processed bundle first, then the raw Strava stream-set shape.
fn load_stream(path: &Path) -> Result<GpsStream> {
    let json = std::fs::read_to_string(path)?;
    match GpsStream::from_json_str(&json) {
        Ok(stream) => Ok(stream),
        Err(bundle_err) => parse_stream_set(&json)?.ok_or_else(|| OverlayError::InvalidStream {
            message: format!("{} has no usable streams: {}", path.display(), bundle_err),
        }),
    }
}
