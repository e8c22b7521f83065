use clap::Parser;
use scviz::config::{DispersionOrder, PipelineConfig, DEFAULT_MARKER_GENES};
use scviz::pipeline;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "scviz",
    long_about = "Single-cell expression pipeline for viewer export.\n\
		  Reads a tab-delimited count matrix and metadata table,\n\
		  runs QC, normalization, feature selection, PCA, UMAP,\n\
		  and Louvain clustering, and writes the JSON artifacts\n\
		  a browser-based viewer consumes."
)]
struct Cli {
    /// metadata table (tab-delimited, `.gz` accepted)
    #[arg(short, long)]
    metadata_file: Box<str>,

    /// count matrix, genes x cells on disk (tab-delimited, `.gz` accepted)
    #[arg(short, long)]
    counts_file: Box<str>,

    /// output directory for the JSON artifacts
    #[arg(short, long, default_value = "data")]
    out_dir: Box<str>,

    /// drop genes detected in fewer than this many cells
    #[arg(long, default_value_t = 10)]
    min_cells: usize,

    /// drop cells with fewer than this many detected genes
    #[arg(long, default_value_t = 200)]
    min_genes: usize,

    /// per-cell count total after rescaling
    #[arg(long, default_value_t = 1e4)]
    target_sum: f32,

    /// number of highly variable genes kept for reduction
    #[arg(long, default_value_t = 2000)]
    n_top_genes: usize,

    /// equal-occupancy mean-expression bins for dispersion trend removal
    #[arg(long, default_value_t = 20)]
    n_bins: usize,

    /// clip standardized values to [-max_value, max_value]
    #[arg(long, default_value_t = 10.0)]
    max_value: f32,

    /// number of principal components
    #[arg(long, default_value_t = 50)]
    n_comps: usize,

    /// neighbours per cell in the kNN graph
    #[arg(long, default_value_t = 10)]
    n_neighbors: usize,

    /// number of leading components used for neighbour search
    #[arg(long, default_value_t = 30)]
    n_pcs: usize,

    /// layout optimization epochs
    #[arg(long, default_value_t = 200)]
    umap_epochs: usize,

    /// Louvain resolution (higher = more, smaller clusters)
    #[arg(long, default_value_t = 0.5)]
    resolution: f64,

    /// seed for reduction, layout, and clustering
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// size of the exported expression subset (before marker union)
    #[arg(long, default_value_t = 500)]
    n_export_genes: usize,

    /// which end of the normalized-dispersion ranking to export
    #[arg(long, value_enum, default_value_t = DispersionOrder::Largest)]
    export_dispersion_order: DispersionOrder,

    /// marker genes pinned into the expression subset when present
    #[arg(long, value_delimiter = ',')]
    marker_genes: Option<Vec<Box<str>>>,

    /// worker threads (0 = all logical CPUs)
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// verbosity
    #[arg(long, short)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let n_threads = if cli.threads > 0 {
        cli.threads
    } else {
        num_cpus::get()
    };
    rayon::ThreadPoolBuilder::new()
        .num_threads(n_threads)
        .build_global()?;

    let config = PipelineConfig {
        metadata_file: cli.metadata_file,
        counts_file: cli.counts_file,
        out_dir: cli.out_dir,
        min_cells: cli.min_cells,
        min_genes: cli.min_genes,
        target_sum: cli.target_sum,
        n_top_genes: cli.n_top_genes,
        n_bins: cli.n_bins,
        max_value: cli.max_value,
        n_comps: cli.n_comps,
        n_neighbors: cli.n_neighbors,
        n_pcs: cli.n_pcs,
        umap_epochs: cli.umap_epochs,
        resolution: cli.resolution,
        seed: cli.seed,
        n_export_genes: cli.n_export_genes,
        export_dispersion_order: cli.export_dispersion_order,
        marker_genes: cli
            .marker_genes
            .unwrap_or_else(|| DEFAULT_MARKER_GENES.iter().map(|&g| g.into()).collect()),
    };

    pipeline::run(&config)?;
    Ok(())
}
