#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use statmunge::annotate::table::VariantColumns;
use statmunge::annotate::{AnnotationMode, annotate_file};
use statmunge::columns::{ColumnMap, guess};
use statmunge::config::RunConfig;
use statmunge::harmonize::{harmonize, save_harmonized};
use statmunge::io::{LoadOptions, load_sumstats, read_canonical};
use statmunge::pipeline::run_munge;
use statmunge::reference::{ReferenceBuilder, open_store};

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(
    name = "statmunge",
    about = "Canonicalize, annotate and harmonize GWAS summary statistics",
    long_about = "Turns heterogeneous GWAS summary-statistics files into one canonical schema, \
                 cross-references them against position- and identifier-indexed reference \
                 stores, and aligns effect directions between studies."
)]
struct Cli {
    /// Log per-step row deltas and individual range queries
    #[arg(short, long, global = true)]
    verbose: bool,

    /// TOML run configuration with [munge], [annotate] and [reference] sections
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct AnnotateArgs {
    /// Tab-separated input table with a header line
    input: PathBuf,

    /// Output table (header plus annotated rows)
    output: PathBuf,

    /// Reference store; queried through tabix when a .tbi/.csi index sits next to it
    #[arg(long, value_name = "PATH")]
    store: PathBuf,

    /// Width of one range query
    #[arg(long, value_name = "UNITS")]
    window: Option<u64>,

    /// Input rows held in memory at once
    #[arg(long, value_name = "ROWS")]
    chunk_rows: Option<usize>,

    /// Replace input values with the reference's instead of only filling gaps
    #[arg(long)]
    overwrite: bool,

    #[arg(long, default_value = "CHR")]
    chrom_col: String,

    #[arg(long, default_value = "BP")]
    pos_col: String,

    #[arg(long, default_value = "rsID")]
    rsid_col: String,

    #[arg(long, default_value = "EA")]
    ea_col: String,

    #[arg(long, default_value = "NEA")]
    nea_col: String,
}

impl AnnotateArgs {
    fn columns(&self) -> VariantColumns {
        VariantColumns {
            chrom: self.chrom_col.clone(),
            pos: self.pos_col.clone(),
            rsid: self.rsid_col.clone(),
            ea: self.ea_col.clone(),
            nea: self.nea_col.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Guess a column mapping from an input header and print it as JSON
    #[command(about = "Guess the column mapping of a raw file (outputs: JSON)")]
    Mapheader {
        input: PathBuf,

        /// Write the mapping here instead of standard output
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Canonicalize a raw summary-statistics file
    #[command(about = "Canonicalize a raw file (outputs: TSV, optional .gz/.tbi, report JSON)")]
    Munge {
        input: PathBuf,
        output: PathBuf,

        /// JSON column mapping {raw column: canonical field}; guessed from the header if absent
        #[arg(long, value_name = "PATH")]
        colmap: Option<PathBuf>,

        /// Leave the output as plain text without bgzip/tabix
        #[arg(long)]
        no_index: bool,

        /// P-value threshold for the significant-row count in the report
        #[arg(long, value_name = "P")]
        threshold: Option<f64>,
    },

    /// Build the pos→id, id→pos and merged→current reference stores
    #[command(about = "Build reference stores from a variant feed")]
    BuildReference {
        /// VCF-like reference feed (plain or gzip)
        feed: PathBuf,

        /// Merge-history feed (JSON lines, plain or gzip)
        #[arg(long, value_name = "PATH")]
        merges: Option<PathBuf>,

        #[arg(long, value_name = "DIR")]
        out_dir: Option<PathBuf>,

        /// Release label embedded in output file names
        #[arg(long)]
        release: Option<String>,

        /// Leave the stores as plain text without bgzip/tabix
        #[arg(long)]
        no_compress: bool,
    },

    /// Assign identifiers by position against the pos→id store
    #[command(name = "annotate-rsid", about = "Fill identifiers from positions")]
    AnnotateRsid(AnnotateArgs),

    /// Recover chromosome, position and alleles by identifier against the id→pos store
    #[command(name = "annotate-position", about = "Fill positions and alleles from identifiers")]
    AnnotatePosition {
        #[command(flatten)]
        args: AnnotateArgs,

        /// Drop rows still missing chromosome, position or either allele
        #[arg(long)]
        remove_failed: bool,
    },

    /// Replace obsolete identifiers using the merged→current store
    #[command(name = "update-merged", about = "Replace merged identifiers by current ones")]
    UpdateMerged(AnnotateArgs),

    /// Join two canonical tables and align the second's effect direction to the first
    #[command(about = "Harmonize two canonical tables (outputs: TSV)")]
    Harmonize {
        first: PathBuf,
        second: PathBuf,
        output: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    let Cli {
        verbose,
        config,
        command,
    } = cli;

    let log_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let result = match load_config(config.as_deref()) {
        Err(e) => Err(e),
        Ok(config) => match command {
            Some(Commands::Mapheader { input, output }) => run_mapheader(&input, output.as_deref()),
            Some(Commands::Munge {
                input,
                output,
                colmap,
                no_index,
                threshold,
            }) => run_munge_cmd(config, &input, &output, colmap.as_deref(), no_index, threshold),
            Some(Commands::BuildReference {
                feed,
                merges,
                out_dir,
                release,
                no_compress,
            }) => run_build(config, &feed, merges.as_deref(), out_dir, release, no_compress),
            Some(Commands::AnnotateRsid(args)) => {
                run_annotate(config, AnnotationMode::AssignIdentifier, &args, false)
            }
            Some(Commands::AnnotatePosition {
                args,
                remove_failed,
            }) => run_annotate(
                config,
                AnnotationMode::AssignCoordinates,
                &args,
                remove_failed,
            ),
            Some(Commands::UpdateMerged(args)) => {
                run_annotate(config, AnnotationMode::UpdateMerged, &args, false)
            }
            Some(Commands::Harmonize {
                first,
                second,
                output,
            }) => run_harmonize(&first, &second, &output),
            None => Cli::command().print_help().map_err(Into::into),
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<RunConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(RunConfig::from_toml_file(path)?),
        None => Ok(RunConfig::default()),
    }
}

fn run_mapheader(input: &Path, output: Option<&Path>) -> CliResult {
    let options = LoadOptions {
        nrows: Some(0),
        ..LoadOptions::default()
    };
    let raw = load_sumstats(input, &options)?;
    let colmap = guess(&raw.header);
    let json = colmap.to_json_string()?;
    match output {
        Some(path) => {
            fs::write(path, format!("{json}\n"))?;
            info!("Wrote column mapping to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn run_munge_cmd(
    mut config: RunConfig,
    input: &Path,
    output: &Path,
    colmap: Option<&Path>,
    no_index: bool,
    threshold: Option<f64>,
) -> CliResult {
    if no_index {
        config.munge.build_index = false;
    }
    if let Some(threshold) = threshold {
        config.munge.significance_threshold = threshold;
    }
    config.validate()?;

    let colmap = match colmap {
        Some(path) => ColumnMap::from_json_file(path)?,
        None => {
            let options = LoadOptions {
                nrows: Some(0),
                ..LoadOptions::from(&config.munge)
            };
            let header = load_sumstats(input, &options)?.header;
            let guessed = guess(&header);
            info!("No column mapping given; guessed {}", guessed.to_json_string()?);
            guessed
        }
    };

    let outcome = run_munge(input, output, &colmap, &config)?;
    info!(
        "Canonical table written to {}; report at {}",
        outcome.output.display(),
        outcome.report_path.display()
    );
    Ok(())
}

fn run_build(
    mut config: RunConfig,
    feed: &Path,
    merges: Option<&Path>,
    out_dir: Option<PathBuf>,
    release: Option<String>,
    no_compress: bool,
) -> CliResult {
    if let Some(dir) = out_dir {
        config.reference.out_dir = dir;
    }
    if let Some(release) = release {
        config.reference.release = release;
    }
    if no_compress {
        config.reference.compress = false;
    }
    config.validate()?;

    let outputs = ReferenceBuilder::new(&config.reference).build(feed, merges)?;
    info!("pos→id store: {}", outputs.pos_to_id.display());
    info!("id→pos store: {}", outputs.id_to_pos.display());
    if let Some(merged) = &outputs.merged {
        info!("merged→current store: {}", merged.display());
    }
    Ok(())
}

fn run_annotate(
    mut config: RunConfig,
    mode: AnnotationMode,
    args: &AnnotateArgs,
    remove_failed: bool,
) -> CliResult {
    if let Some(window) = args.window {
        config.annotate.window = window;
    }
    if let Some(rows) = args.chunk_rows {
        config.annotate.read_chunk_rows = rows;
    }
    config.annotate.overwrite |= args.overwrite;
    config.annotate.remove_failed |= remove_failed;
    config.validate()?;

    let store = open_store(&args.store)?;
    let stats = annotate_file(
        mode,
        &args.input,
        &args.output,
        store.as_ref(),
        &args.columns(),
        &config.annotate,
    )?;
    info!(
        "Wrote {} of {} rows to {} using {} range queries.",
        stats.output_rows,
        stats.input_rows,
        args.output.display(),
        stats.queries
    );
    Ok(())
}

fn run_harmonize(first: &Path, second: &Path, output: &Path) -> CliResult {
    let first_table = read_canonical(first)?;
    let second_table = read_canonical(second)?;
    let harmonized = harmonize(&first_table, &second_table);
    save_harmonized(&harmonized, output)?;
    info!(
        "{} shared variants of {} and {} written to {}",
        harmonized.len(),
        first_table.len(),
        second_table.len(),
        output.display()
    );
    Ok(())
}
