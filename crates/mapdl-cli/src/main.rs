use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use mapdl_io::{
    BinaryFile, CyclicOptions, ElementDataKind, EmatFile, FullFile, KmOptions, MapdlError,
    ReadOptions, ResultSource, StandardHeader, read_binary, read_standard_header,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

type CliResult = Result<(), Box<dyn Error>>;

#[derive(Parser)]
#[command(name = "mapdl-cli")]
#[command(about = "Inspect MAPDL binary files", long_about = None)]
struct Cli {
    /// Log decoding steps to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the standard header of any binary file
    Header {
        file: PathBuf,

        /// Print the header as JSON
        #[arg(long)]
        json: bool,
    },

    /// Summarise an element matrix file or one of its elements
    Emat {
        file: PathBuf,

        /// Storage position of the element to decode
        #[arg(short, long)]
        element: Option<usize>,
    },

    /// Summarise the stiffness and mass matrices of a full file
    Full {
        file: PathBuf,

        /// Renumber equations in node/DOF order
        #[arg(long)]
        sort: bool,
    },

    /// Expand one result set of a cyclic result file
    Cyclic {
        file: PathBuf,

        /// Cumulative result index (zero based)
        #[arg(short, long)]
        result: usize,

        /// Phase angle in radians
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        phase: f64,

        /// Expand to every sector of the rotor
        #[arg(long)]
        full_rotor: bool,

        /// Scale full-rotor results to the solver's amplitudes
        #[arg(long, requires = "full_rotor")]
        normalize: bool,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_header(header: &StandardHeader) {
    println!("file_code: {}", header.file_code);
    println!("endian: {:?}", header.endian);
    println!("version: {}", header.verstring);
    println!("date: {} {}", header.date, header.time);
    println!("units: {}", header.units.label());
    println!("jobname: {}", header.jobname);
    if !header.title.is_empty() {
        println!("title: {}", header.title);
    }
    if !header.subtitle.is_empty() {
        println!("subtitle: {}", header.subtitle);
    }
}

fn run_header(file: &Path, json: bool) -> CliResult {
    let header = read_standard_header(file)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&header)?);
    } else {
        print_header(&header);
    }
    Ok(())
}

fn run_emat(file: &Path, element: Option<usize>) -> CliResult {
    let mut emat = EmatFile::from_file(file)?;
    let Some(index) = element else {
        println!("elements: {}", emat.n_elements());
        println!("nodes: {}", emat.n_nodes());
        println!("dof_per_node: {}", emat.n_dof());
        let labels: Vec<String> = emat
            .dof_labels()?
            .into_iter()
            .map(|(code, label)| label.map_or_else(|| code.to_string(), str::to_string))
            .collect();
        println!("dofs: {}", labels.join(", "));
        let nnum = emat.nnum()?;
        if let (Some(first), Some(last)) = (nnum.first(), nnum.last()) {
            println!("node_range: {first}..={last}");
        }
        return Ok(());
    };

    let data = emat.read_element(index, ElementDataKind::ALL)?;
    println!("element: {index}");
    println!("rows: {}", data.header.n_rows());
    println!("lower_triangular: {}", data.header.is_lower_triangular());
    for (kind, values) in &data.records {
        println!("{}: {} values", kind.key(), values.len());
    }
    Ok(())
}

fn run_full(file: &Path, sort: bool) -> CliResult {
    let full = FullFile::from_file(file)?;
    let km = full.load_km(KmOptions {
        as_sparse: true,
        sort,
    })?;
    println!("equations: {}", full.neqn());
    println!("nodes: {}", full.n_nodes());
    for (name, triplets) in [("stiffness", &km.stiffness_triplets), ("mass", &km.mass_triplets)] {
        match triplets {
            Some(t) => println!("{name}_terms: {}", t.len()),
            None => println!("{name}_terms: missing"),
        }
    }
    println!("constrained: {}", km.constrained.len());
    for [node, dof] in &km.constrained {
        println!("  node {node} dof {dof}");
    }
    Ok(())
}

fn run_cyclic(
    file: &Path,
    result: usize,
    phase: f64,
    full_rotor: bool,
    normalize: bool,
) -> CliResult {
    let cyclic = match read_binary(file, ReadOptions::default())? {
        BinaryFile::Cyclic(cyclic) => cyclic,
        BinaryFile::Result(rst) => return Err(MapdlError::NotCyclic(rst.n_sector()).into()),
        other => {
            return Err(format!("{} is a {}", file.display(), other.kind().label()).into());
        }
    };
    debug!(result, phase, full_rotor, normalize, "expanding cyclic result");

    let options = CyclicOptions {
        phase,
        full_rotor,
        as_complex: false,
        normalize,
    };
    let solution = cyclic.nodal_solution(result, options)?;
    let header = cyclic.source().result_header();

    println!("sectors: {}", cyclic.n_sector());
    if let Some(h) = cyclic.harmonic_indices().get(result) {
        println!("harmonic_index: {h}");
    }
    if let Some(mode) = cyclic.mode_table().get(result) {
        println!("mode: {mode}");
    }
    if let Some(time) = header.time_values.get(result) {
        println!("frequency: {time}");
    }
    println!("master_nodes: {}", solution.node_numbers.len());
    if let Some(sectors) = solution.values.as_real() {
        for (k, sector) in sectors.iter().enumerate() {
            let peak = sector
                .row_iter()
                .map(|row| row.norm())
                .fold(0.0_f64, f64::max);
            println!("sector {k}: max |u| = {peak:.6e}");
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let outcome = match &cli.command {
        Commands::Header { file, json } => run_header(file, *json),
        Commands::Emat { file, element } => run_emat(file, *element),
        Commands::Full { file, sort } => run_full(file, *sort),
        Commands::Cyclic {
            file,
            result,
            phase,
            full_rotor,
            normalize,
        } => run_cyclic(file, *result, *phase, *full_rotor, *normalize),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(1)
        }
    }
}
