use std::path::PathBuf;

use camino::Utf8PathBuf;
use cellembed_cli::run::{run, RunArgs};
use cellembed_core::{app_config, init_ort};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "cellembed-run")]
#[command(version)]
#[command(about = "embeds the images of a dataset record set into a tsv table", long_about = None)]
struct Args {
    /// Verbose mode
    #[arg(short, long)]
    verbose: bool,
    /// Do not confirm before embedding
    #[arg(short, long)]
    force: bool,
    /// Report how many images would be embedded and exit
    #[arg(long)]
    dry_run: bool,
    /// Record set within the dataset to embed
    #[arg(short, long)]
    record_set: String,
    /// Prefix of the record field names, defaults to the record set name
    #[arg(long)]
    field_prefix: Option<String>,
    /// Stop after this many images
    #[arg(short = 'n', long)]
    max_images: Option<usize>,
    /// Number of images per inference batch
    #[arg(short, long)]
    batch_size: Option<usize>,
    /// Directory the result tables are written to
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
    /// Model file to use instead of the configured one
    #[arg(short, long)]
    model: Option<PathBuf>,
    /// Directory containing the onnxruntime library
    #[arg(long)]
    onnx_lib_dir: Option<PathBuf>,
    /// Register the run in a provenance package inside the output directory
    #[arg(short, long)]
    package: bool,
    /// Author recorded in the provenance package
    #[arg(short, long)]
    author: Option<String>,
    /// Dataset description file
    dataset: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let onnx_lib_dir = args.onnx_lib_dir
        .map(|dir| Utf8PathBuf::from_path_buf(dir)
            .map_err(|dir| anyhow::anyhow!("onnx library directory is not valid utf8: {dir:?}")))
        .transpose()?;
    init_ort(onnx_lib_dir.as_deref())?;

    let config = app_config::get_pipeline_config()?;
    run(RunArgs {
        dataset: args.dataset,
        record_set: args.record_set,
        field_prefix: args.field_prefix,
        max_images: args.max_images,
        batch_size: args.batch_size,
        output_dir: args.output_dir,
        model: args.model,
        package: args.package,
        author: args.author,
        dry_run: args.dry_run,
        force: args.force,
    }, &config)
}
