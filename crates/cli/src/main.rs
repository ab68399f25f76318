//! TerraFill CLI - parallel priority-flood depression filling

use anyhow::{bail, Result};
use clap::{ArgAction, Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use terrafill_engine::{execute, prepare, Mode, RunConfig};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    /// The input is a layout file listing one raster file per tile
    Many,
    /// The input is a single raster file divided into blocks
    One,
}

#[derive(Parser)]
#[command(
    name = "terrafill",
    about = "Fill depressions in a tiled digital elevation model",
    long_about = "Fills every depression in a raster DEM so that water placed on any \
                  interior cell can flow monotonically downhill to the raster boundary. \
                  Tiles are flooded in parallel by consumer workers; a compact spillover \
                  graph joins them into the exact global solution.",
    disable_help_flag = true
)]
struct Cli {
    /// Print help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,

    /// Treat tiles as vertically flipped
    #[arg(short = 'V', long = "flipV")]
    flip_v: bool,

    /// Treat tiles as horizontally flipped
    #[arg(short = 'H', long = "flipH")]
    flip_h: bool,

    /// Block width in cells for <one> mode; -1 uses the full raster width
    #[arg(short = 'w', long = "bwidth", default_value_t = -1, allow_negative_numbers = true)]
    bwidth: i64,

    /// Block height in cells for <one> mode; -1 uses the full raster height
    #[arg(short = 'h', long = "bheight", default_value_t = -1, allow_negative_numbers = true)]
    bheight: i64,

    /// Number of consumer workers (the producer makes the total one more)
    #[arg(long, default_value_t = default_workers())]
    workers: usize,

    /// Whether <input> is a layout file (many) or a single raster (one)
    #[arg(value_enum)]
    mode: ModeArg,

    /// @evict, @retain, or a cache path template containing %f or %n
    retention: String,

    /// Input layout file (many) or raster file (one)
    input: PathBuf,

    /// Output path template containing %f or %n
    output: String,
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

fn setup_logging() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn validate(cli: &Cli) -> Result<()> {
    if cli.retention.starts_with('@') && cli.retention != "@evict" && cli.retention != "@retain" {
        bail!("retention must be @evict or @retain or a path");
    }
    if !cli.retention.starts_with('@')
        && !cli.retention.contains("%n")
        && !cli.retention.contains("%f")
    {
        bail!("retention filename must indicate the tile with '%n' or '%f'");
    }
    if !(cli.output.contains("%f") ^ cli.output.contains("%n")) {
        bail!("output filename must indicate either file number (%n) or name (%f)");
    }
    if cli.retention == cli.output {
        bail!("retention and output filenames must differ");
    }
    if cli.bwidth != -1 && cli.bwidth < 300 {
        bail!("block width must be at least 300");
    }
    if cli.bheight != -1 && cli.bheight < 300 {
        bail!("block height must be at least 300");
    }
    if cli.workers == 0 {
        bail!("must run with at least two participants: one producer and one consumer");
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    validate(&cli)?;

    let config = RunConfig {
        mode: match cli.mode {
            ModeArg::Many => Mode::Many,
            ModeArg::One => Mode::One,
        },
        retention: cli.retention,
        input: cli.input,
        output: cli.output,
        bwidth: cli.bwidth,
        bheight: cli.bheight,
        flip_h: cli.flip_h,
        flip_v: cli.flip_v,
        workers: cli.workers,
    };

    info!("c Many or one = {:?}", config.mode);
    info!("c Input file = {}", config.input.display());
    info!("c Retention strategy = {}", config.retention);
    info!("c Block width = {}", config.bwidth);
    info!("c Block height = {}", config.bheight);
    info!("c Flip horizontal = {}", config.flip_h);
    info!("c Flip vertical = {}", config.flip_v);
    info!("c World size = {}", config.workers + 1);

    let pb = spinner("Partitioning input...");
    let prepared = prepare(&config);
    pb.finish_and_clear();
    let (tiles, kind) = prepared?;

    execute(tiles, kind, &config)?;
    Ok(())
}

fn main() {
    setup_logging();

    info!("A TerraFill parallel priority-flood");
    info!(
        "C Barnes, R., 2016. \"Parallel priority-flood depression filling for trillion cell \
         digital elevation models on desktops or clusters\". Computers & Geosciences. \
         doi:10.1016/j.cageo.2016.07.001"
    );

    let cli = Cli::parse();
    let start = Instant::now();

    match run(cli) {
        Ok(()) => {
            info!("t Total wall-time = {} s", start.elapsed().as_secs_f64());
        }
        Err(e) => {
            error!("E {}", e);
            eprintln!(
                "terrafill [--flipV] [--flipH] [--bwidth #] [--bheight #] \
                 <many|one> <retention> <input> <output>"
            );
            eprintln!("\tUse '--help' to show help.");
            std::process::exit(-1);
        }
    }
}
