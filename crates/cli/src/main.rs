//! imgcalc CLI - clustering and image calculations on GeoTIFF stacks

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use imgcalc_algorithms::classification::{
    CentreSet, InitStrategy, IsodataClassifier, IsodataParams, StepOrder, label_with_centres,
};
use imgcalc_algorithms::imagecalc::{
    bands_equal, border_edges, count_pixels_of_value, images_equal, unique_values,
    zonal_mean_image, zonal_means,
};
use imgcalc_core::io::{GeoTiffSink, read_geotiff};
use imgcalc_core::{MultiBandRaster, RasterSink, RasterSource};
use imgcalc_engine::{EngineConfig, ProcessingMode};

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "imgcalc")]
#[command(author, version, about = "Out-of-core image calculations and ISODATA clustering", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Rows per processing block
    #[arg(long, global = true, default_value = "256")]
    block_rows: usize,

    /// Worker threads (0 = all cores, 1 = sequential)
    #[arg(short = 'j', long, global = true, default_value = "0")]
    threads: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Init {
    Random,
    Kpp,
}

#[derive(Subcommand)]
enum Commands {
    /// Show information about raster files
    Info {
        /// Input raster files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Cluster a band stack with ISODATA and write a label image
    Isodata {
        /// Output label image
        #[arg(short, long)]
        output: PathBuf,
        /// Write the final centres as JSON
        #[arg(long)]
        centres: Option<PathBuf>,
        /// Initial number of clusters
        #[arg(short = 'k', long, default_value = "5")]
        clusters: usize,
        /// Seeding strategy
        #[arg(long, value_enum, default_value = "kpp")]
        init: Init,
        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Converged once centre movement drops below this
        #[arg(long, default_value = "0.01")]
        terminal_threshold: f64,
        #[arg(long, default_value = "50")]
        max_iterations: usize,
        /// Minimum pixels to keep a cluster
        #[arg(long, default_value = "10")]
        min_num_vals: u64,
        /// Merge clusters closer than this
        #[arg(long, default_value = "5.0")]
        min_distance: f64,
        /// Split clusters whose standard deviation exceeds this
        #[arg(long, default_value = "10.0")]
        stddev_thres: f64,
        /// Split only clusters with average distance above this multiple of the global one
        #[arg(long, default_value = "1.0")]
        prop_over_avg_dist: f64,
        /// Split offset as a fraction of the standard deviation
        #[arg(long, default_value = "0.5")]
        split_fraction: f64,
        /// Upper bound on the number of clusters
        #[arg(long)]
        max_clusters: Option<usize>,
        /// Split before merging within each iteration
        #[arg(long)]
        split_first: bool,
        /// Converge on centre movement alone, even right after a merge or split
        #[arg(long)]
        converge_on_movement: bool,
        /// Input rasters, stacked in order
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Label a band stack against saved cluster centres
    Label {
        /// Centre set (JSON) written by `isodata --centres`
        centres: PathBuf,
        /// Output label image
        output: PathBuf,
        /// Also label border pixels (band 1 == 0)
        #[arg(long)]
        keep_zeros: bool,
        /// Input rasters, stacked in order
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Count pixels equal to the given values
    CountValues {
        input: PathBuf,
        /// Values to count
        #[arg(short, long, value_delimiter = ',', required = true)]
        values: Vec<f64>,
        /// Band to inspect (1-based); all bands when omitted
        #[arg(short, long)]
        band: Option<usize>,
    },
    /// List the unique integer values of a band
    Unique {
        input: PathBuf,
        /// Band (1-based)
        #[arg(short, long, default_value = "1")]
        band: usize,
    },
    /// Compare two images pixel by pixel
    Compare {
        first: PathBuf,
        second: PathBuf,
        /// Compare only this band of the first image (1-based)
        #[arg(long, requires = "band_b")]
        band_a: Option<usize>,
        /// ...against this band of the second image (1-based)
        #[arg(long, requires = "band_a")]
        band_b: Option<usize>,
    },
    /// Mean of each band within every zone of an integer zone raster
    Zonal {
        /// Zone raster (band 1, zone 0 is ignored)
        zones: PathBuf,
        /// Write an image of zone means
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Value rasters, stacked in order
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Count valid pixels near the border (band 1 == 0)
    Edges {
        input: PathBuf,
        /// Window size (odd)
        #[arg(short, long, default_value = "3")]
        window: usize,
        /// Write a 1/0 edge mask
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")
}

fn spinner(msg: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    Ok(pb)
}

fn read_raster(path: &Path) -> Result<MultiBandRaster> {
    let pb = spinner(&format!("Reading {}...", path.display()))?;
    let raster = read_geotiff(path)
        .with_context(|| format!("Failed to read raster {}", path.display()))?;
    pb.finish_and_clear();
    info!("Input: {} x {} x {} bands", raster.cols(), raster.rows(), raster.band_count());
    Ok(raster)
}

fn read_all(paths: &[PathBuf]) -> Result<Vec<MultiBandRaster>> {
    paths.iter().map(|p| read_raster(p)).collect()
}

fn engine_config(block_rows: usize, threads: usize) -> EngineConfig {
    let processing = match threads {
        0 => ProcessingMode::Parallel,
        1 => ProcessingMode::Sequential,
        n => ProcessingMode::ParallelWith(n),
    };
    EngineConfig {
        processing,
        ..EngineConfig::default().with_block_rows(block_rows)
    }
}

/// 1-based band argument to a 0-based index
fn band_index(band: usize) -> Result<usize> {
    band.checked_sub(1).context("bands are numbered from 1")
}

fn done(name: &str, path: &Path, elapsed: std::time::Duration) {
    println!("{} saved to: {}", name, path.display());
    println!("  Processing time: {:.2?}", elapsed);
}

// ─── Main ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;
    let config = engine_config(cli.block_rows, cli.threads);

    match cli.command {
        Commands::Info { inputs } => {
            for input in inputs {
                let raster = read_raster(&input)?;
                let (rows, cols) = raster.shape();
                let t = raster.transform();
                let bounds = t.bounds(cols, rows);

                println!("File: {}", input.display());
                println!("Dimensions: {} x {} ({} bands)", cols, rows, raster.band_count());
                println!("Pixel size: {} x {}", t.pixel_width, t.pixel_height);
                println!(
                    "Bounds: ({:.6}, {:.6}) - ({:.6}, {:.6})",
                    bounds.min_x, bounds.min_y, bounds.max_x, bounds.max_y
                );
                if let Some(projection) = raster.projection() {
                    println!("Projection: {}", projection);
                }
                let border = raster.band(0).iter().filter(|&&v| v == 0.0).count();
                println!(
                    "Border pixels: {} ({:.1}%)",
                    border,
                    100.0 * border as f64 / (rows * cols).max(1) as f64
                );
            }
        }

        Commands::Isodata {
            output,
            centres,
            clusters,
            init,
            seed,
            terminal_threshold,
            max_iterations,
            min_num_vals,
            min_distance,
            stddev_thres,
            prop_over_avg_dist,
            split_fraction,
            max_clusters,
            split_first,
            converge_on_movement,
            inputs,
        } => {
            let rasters = read_all(&inputs)?;
            let sources: Vec<&dyn RasterSource> = rasters.iter().map(|r| r as &dyn RasterSource).collect();
            let params = IsodataParams {
                terminal_threshold,
                max_iterations,
                min_num_vals,
                min_distance_between_centres: min_distance,
                stddev_thres,
                prop_over_avg_dist,
                split_fraction,
                max_clusters,
                order: if split_first { StepOrder::SplitThenMerge } else { StepOrder::MergeThenSplit },
                settle_after_restructure: !converge_on_movement,
            };
            let strategy = match init {
                Init::Random => InitStrategy::Random,
                Init::Kpp => InitStrategy::KMeansPlusPlus,
            };

            let start = Instant::now();
            let mut rng = StdRng::seed_from_u64(seed);
            let mut classifier = IsodataClassifier::new(sources, config)?;
            classifier
                .initialize(clusters, strategy, &mut rng)
                .context("Failed to seed cluster centres")?;

            let pb = spinner("Clustering...")?;
            let outcome = classifier.iterate(&params).context("ISODATA failed")?;
            pb.finish_and_clear();
            println!(
                "{} clusters after {} iterations ({})",
                outcome.centres,
                outcome.iterations,
                if outcome.converged() { "converged" } else { "iteration limit reached" }
            );

            let pb = spinner("Writing labels...")?;
            let mut sink = GeoTiffSink::new(&output);
            classifier.generate_labels(&mut sink).context("Failed to write labels")?;
            pb.finish_and_clear();

            if let Some(path) = centres {
                classifier
                    .centres()
                    .to_centre_set()
                    .write_json(&path)
                    .with_context(|| format!("Failed to write centres to {}", path.display()))?;
                println!("Centres saved to: {}", path.display());
            }
            done("Labels", &output, start.elapsed());
        }

        Commands::Label {
            centres,
            output,
            keep_zeros,
            inputs,
        } => {
            let set = CentreSet::read_json(&centres)
                .with_context(|| format!("Failed to read centres {}", centres.display()))?;
            let rasters = read_all(&inputs)?;
            let sources: Vec<&dyn RasterSource> = rasters.iter().map(|r| r as &dyn RasterSource).collect();

            let start = Instant::now();
            let mut sink = GeoTiffSink::new(&output);
            label_with_centres(sources, &set, !keep_zeros, config, &mut sink)
                .context("Failed to label image")?;
            done("Labels", &output, start.elapsed());
        }

        Commands::CountValues { input, values, band } => {
            let raster = read_raster(&input)?;
            let band = band.map(band_index).transpose()?;
            let counts = count_pixels_of_value(vec![&raster], &values, band, config)?;
            for (value, count) in values.iter().zip(counts) {
                println!("{}\t{}", value, count);
            }
        }

        Commands::Unique { input, band } => {
            let raster = read_raster(&input)?;
            let values = unique_values(vec![&raster], band_index(band)?, config)?;
            println!("{} unique values", values.len());
            for v in values {
                println!("{}", v);
            }
        }

        Commands::Compare {
            first,
            second,
            band_a,
            band_b,
        } => {
            let a = read_raster(&first)?;
            let b = read_raster(&second)?;
            let (equal, proportion) = match (band_a, band_b) {
                (Some(ba), Some(bb)) => bands_equal(&a, band_index(ba)?, &b, band_index(bb)?, config)?,
                _ => images_equal(&a, &b, config)?,
            };
            println!(
                "{} ({:.2}% of pixels match)",
                if equal { "Images are equal" } else { "Images differ" },
                100.0 * proportion
            );
        }

        Commands::Zonal {
            zones,
            output,
            inputs,
        } => {
            let zone_raster = read_raster(&zones)?;
            let rasters = read_all(&inputs)?;
            let sources: Vec<&dyn RasterSource> = rasters.iter().map(|r| r as &dyn RasterSource).collect();

            let start = Instant::now();
            let means = match &output {
                Some(path) => {
                    let mut sink = GeoTiffSink::new(path);
                    zonal_mean_image(sources, &zone_raster, config, &mut sink)?
                }
                None => zonal_means(sources, &zone_raster, config)?,
            };
            for (zone, stats) in &means {
                let mean: Vec<String> = stats.mean.iter().map(|m| format!("{:.4}", m)).collect();
                println!("{}\t{}\t{}", zone, stats.count, mean.join("\t"));
            }
            if let Some(path) = output {
                done("Zone means", &path, start.elapsed());
            }
        }

        Commands::Edges {
            input,
            window,
            output,
        } => {
            let raster = read_raster(&input)?;
            let start = Instant::now();
            let mut sink = output.as_ref().map(GeoTiffSink::new);
            let hits = border_edges(
                vec![&raster],
                window,
                config,
                sink.as_mut().map(|s| s as &mut dyn RasterSink),
            )?;
            println!("{} pixels within {} cells of the border", hits, window / 2);
            if let Some(path) = output {
                done("Edge mask", &path, start.elapsed());
            }
        }
    }

    Ok(())
}
