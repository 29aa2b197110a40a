//! cibxml: diff, patch, digest, validate and upgrade cluster configuration
//! documents from the command line.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser, Subcommand};
use tracing::{debug, Level};
use tracing_subscriber::EnvFilter;
use xml_cib::xml::is_compressed_path;
use xml_cib::{
    calculate_digest, default_schema_dir, dump_formatted, log_diff, on_disk_digest,
    operation_digest, parse_file, versioned_digest, write_file, Diff, DiffGenerator, Element,
    Error, Patch, SchemaRegistry, ATTR_VALIDATION, CRM_FEATURE_SET, MINIMUM_SCHEMA_VERSION,
};

/// Cluster configuration diff, patch and schema tool
#[derive(Parser)]
#[command(name = "cibxml")]
#[command(version)]
#[command(about = "Cluster configuration diff, patch and schema tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding the schema grammars and transforms
    #[arg(long, global = true, env = "PCMK_schema_directory")]
    schema_dir: Option<PathBuf>,

    /// More output (repeat for debug and trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Only report errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a diff between two versions of a document
    #[command(visible_alias = "d")]
    Diff {
        /// Previous version
        old: PathBuf,
        /// New version
        new: PathBuf,
        /// Keep elements that carry nothing but their identity
        #[arg(long)]
        no_suppress: bool,
        /// Record the digest of the new version in the diff
        #[arg(long)]
        digest: bool,
        /// Feature set to stamp on the diff; selects the digest algorithm
        #[arg(long, default_value = CRM_FEATURE_SET)]
        feature_set: String,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Apply a diff to the previous version of a document
    #[command(visible_alias = "p")]
    Patch {
        /// Previous version
        old: PathBuf,
        /// Diff file
        diff: PathBuf,
        /// Save debug snapshots here if the result fails verification
        #[arg(long)]
        artifact_dir: Option<PathBuf>,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the digest of a document
    Digest {
        /// Document
        file: PathBuf,
        /// Leave out volatile bookkeeping attributes
        #[arg(long)]
        filter: bool,
        /// Pick the algorithm a peer with this feature set would use
        #[arg(long, conflicts_with_all = ["on_disk", "operation"])]
        feature_set: Option<String>,
        /// Digest as recorded next to documents on disk
        #[arg(long, conflicts_with = "operation")]
        on_disk: bool,
        /// Digest with attributes sorted, as used for operation parameters
        #[arg(long)]
        operation: bool,
    },

    /// Validate a document against its declared schema version
    #[command(visible_alias = "v")]
    Validate {
        /// Document
        file: PathBuf,
        /// Schema version to validate against instead of the declared one
        #[arg(long)]
        schema: Option<String>,
    },

    /// Upgrade a document to the newest schema version it can reach
    #[command(visible_alias = "u")]
    Upgrade {
        /// Document
        file: PathBuf,
        /// Fail unless at least this version is reached
        #[arg(long, default_value = MINIMUM_SCHEMA_VERSION)]
        minimum: String,
        /// Only check versions, never rewrite the document
        #[arg(long)]
        no_transform: bool,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let schema_dir = cli
        .schema_dir
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(default_schema_dir);

    let result = match cli.command {
        Commands::Diff {
            old,
            new,
            no_suppress,
            digest,
            feature_set,
            output,
        } => run_diff(&old, &new, !no_suppress, digest, &feature_set, output.as_deref()),
        Commands::Patch {
            old,
            diff,
            artifact_dir,
            output,
        } => run_patch(&old, &diff, artifact_dir, output.as_deref()),
        Commands::Digest {
            file,
            filter,
            feature_set,
            on_disk,
            operation,
        } => run_digest(&file, filter, feature_set.as_deref(), on_disk, operation),
        Commands::Validate { file, schema } => run_validate(&schema_dir, &file, schema.as_deref()),
        Commands::Upgrade {
            file,
            minimum,
            no_transform,
            output,
        } => run_upgrade(&schema_dir, &file, &minimum, !no_transform, output.as_deref()),
    };

    match result {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => Some(Level::ERROR),
        (false, 0) => None,
        (false, 1) => Some(Level::INFO),
        (false, 2) => Some(Level::DEBUG),
        (false, _) => Some(Level::TRACE),
    };
    let filter = match level {
        Some(level) => EnvFilter::new(level.as_str()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn output_writer(path: Option<&Path>) -> io::Result<Box<dyn Write>> {
    Ok(match path {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(io::stdout()),
    })
}

/// Writes a configuration document, compressing when the path asks for it.
fn write_document(doc: &mut Element, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            write_file(doc, path, is_compressed_path(path))?;
        }
        None => {
            let mut out = io::stdout();
            writeln!(out, "{}", dump_formatted(doc))?;
            out.flush()?;
        }
    }
    Ok(())
}

/// Generates a diff between two documents.
fn run_diff(
    old_path: &Path,
    new_path: &Path,
    suppress: bool,
    with_digest: bool,
    feature_set: &str,
    output_path: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("Parsing old: {}", old_path.display());
    let old = parse_file(old_path)?;

    eprintln!("Parsing new: {}", new_path.display());
    let new = parse_file(new_path)?;

    eprintln!("Generating diff...");
    let generator = DiffGenerator::new()
        .suppress_trivial(suppress)
        .feature_set(feature_set)
        .with_digest(with_digest);
    let Some(diff) = generator.generate(&old, &new) else {
        eprintln!("Documents are equivalent, no diff produced.");
        return Ok(());
    };
    log_diff(Level::DEBUG, &diff);

    let mut output = output_writer(output_path)?;
    writeln!(output, "{}", dump_formatted(diff.as_element()))?;
    output.flush()?;

    eprintln!("Diff complete.");
    Ok(())
}

/// Applies a diff to a document.
fn run_patch(
    old_path: &Path,
    diff_path: &Path,
    artifact_dir: Option<PathBuf>,
    output_path: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("Parsing old: {}", old_path.display());
    let old = parse_file(old_path)?;

    eprintln!("Parsing diff: {}", diff_path.display());
    let diff = Diff::from_element(parse_file(diff_path)?)?;
    log_diff(Level::DEBUG, &diff);

    eprintln!("Applying diff...");
    let patch = match artifact_dir {
        Some(dir) => Patch::with_artifact_dir(dir),
        None => Patch::new(),
    };
    let mut patched = match patch.apply(&old, &diff) {
        Ok(patched) => patched,
        Err(e) => {
            if e.requires_full_resync() {
                eprintln!("The result does not match the digest recorded in the diff.");
                eprintln!("Discard the local copy and fetch the full document from a peer.");
                if let Error::DigestMismatch {
                    artifacts: Some(artifacts),
                    ..
                } = &e
                {
                    eprintln!("Debug snapshots:");
                    eprintln!("  original:  {}", artifacts.original.display());
                    eprintln!("  diff:      {}", artifacts.diff.display());
                    eprintln!("  candidate: {}", artifacts.candidate.display());
                }
            }
            return Err(e.into());
        }
    };

    write_document(&mut patched, output_path)?;
    eprintln!("Patch complete.");
    Ok(())
}

/// Prints the digest of a document.
fn run_digest(
    path: &Path,
    filter: bool,
    feature_set: Option<&str>,
    on_disk: bool,
    operation: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let doc = parse_file(path)?;
    let digest = if on_disk {
        on_disk_digest(&doc)
    } else if operation {
        operation_digest(&doc)
    } else if feature_set.is_some() {
        versioned_digest(&doc, false, filter, feature_set)
    } else {
        calculate_digest(&doc, false, filter)
    };
    debug!(algorithm = %digest.algorithm(), "calculated digest");
    println!("{}", digest);
    Ok(())
}

/// Validates a document.
fn run_validate(
    schema_dir: &Path,
    path: &Path,
    schema: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let registry = SchemaRegistry::with_defaults(schema_dir)?;
    let doc = parse_file(path)?;

    let valid = match schema {
        Some(_) => registry.validate_document(&doc, schema)?,
        None => registry.validate_verbose(&doc)?,
    };
    let name = schema
        .or_else(|| doc.attr(ATTR_VALIDATION))
        .unwrap_or(MINIMUM_SCHEMA_VERSION);
    if !valid {
        return Err(Error::ValidationFailed(name.to_string()).into());
    }

    eprintln!("{} is valid for {}.", path.display(), name);
    Ok(())
}

/// Upgrades a document as far as the catalog allows.
fn run_upgrade(
    schema_dir: &Path,
    path: &Path,
    minimum: &str,
    transform: bool,
    output_path: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let registry = SchemaRegistry::with_defaults(schema_dir)?;
    let min = registry
        .lookup(minimum)
        .ok_or_else(|| Error::UnknownSchemaVersion(minimum.to_string()))?;

    eprintln!("Parsing: {}", path.display());
    let doc = parse_file(path)?;

    eprintln!("Upgrading...");
    let mut outcome = registry.upgrade(&doc, Some(min), transform);
    let achieved = outcome
        .achieved
        .map_or("none", |id| registry.schema_name(id));
    if !outcome.reached_minimum() {
        return Err(format!(
            "configuration only validates as {}, below the minimum {}",
            achieved, minimum
        )
        .into());
    }
    if !outcome.ok {
        eprintln!("A transform failed; stopped at {}.", achieved);
    }

    write_document(&mut outcome.document, output_path)?;
    eprintln!("Upgrade complete: {}.", achieved);
    Ok(())
}
