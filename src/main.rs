//! The `joosc` driver: expand the input paths, run the pipeline, write the
//! assembly, and exit with the contract code (0 clean, 42 rejected, 43
//! warnings, 13 internal error).

use std::{fs, path::PathBuf, process::ExitCode};

use clap::Parser;
use walkdir::WalkDir;

use joosc::{
    codegen::AllocatorKind,
    compiler::{self, Outcome, SourceFile},
};

#[derive(Debug, Parser)]
#[command(
    name = "joosc",
    about = "A batch compiler for Joos 1W targeting 32-bit x86",
    version
)]
struct Cli {
    /// Disable optimisation; every temporary lives in a stack slot.
    #[arg(long = "opt-none", conflicts_with = "opt")]
    opt_none: bool,

    /// Enable a named optimisation set (`reg` = linear-scan allocation).
    #[arg(long = "opt", value_name = "pass-set")]
    opt: Option<String>,

    /// Suppress diagnostic output; the exit code is the contract.
    #[arg(short = 'q')]
    quiet: bool,

    /// The directory the `.s` files are written to.
    #[arg(short = 'o', long = "out", default_value = "output")]
    out: PathBuf,

    /// Source files, or directories to walk for `.java` files.
    #[arg(required = true)]
    paths: Vec<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let allocator = match (&cli.opt, cli.opt_none) {
        (Some(set), _) if set == "reg" => AllocatorKind::LinearScan,
        (Some(set), _) => {
            eprintln!("joosc: unknown optimisation set `{set}` (expected `reg`)");
            return ExitCode::FAILURE;
        }
        (None, _) => AllocatorKind::Trivial,
    };

    let mut files = Vec::new();
    for path in &cli.paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(path)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "java"))
                .collect();
            found.sort();
            files.extend(found);
        } else {
            files.push(path.clone());
        }
    }

    let mut sources = Vec::with_capacity(files.len());
    for path in &files {
        match fs::read_to_string(path) {
            Ok(text) => sources.push(SourceFile {
                name: path.display().to_string(),
                text,
            }),
            Err(err) => {
                eprintln!("joosc: cannot read {}: {err}", path.display());
                return ExitCode::FAILURE;
            }
        }
    }

    let outcome = compiler::compile(&sources, allocator);
    if !cli.quiet {
        for diagnostic in outcome.diagnostics() {
            eprintln!("{diagnostic}");
        }
        if let Outcome::Internal(err) = &outcome {
            eprintln!("{err}");
        }
    }

    if let Outcome::Success { files, .. } = &outcome {
        if let Err(err) = fs::create_dir_all(&cli.out) {
            eprintln!("joosc: cannot create {}: {err}", cli.out.display());
            return ExitCode::FAILURE;
        }
        for file in files {
            let path = cli.out.join(&file.name);
            if let Err(err) = fs::write(&path, &file.text) {
                eprintln!("joosc: cannot write {}: {err}", path.display());
                return ExitCode::FAILURE;
            }
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    ExitCode::from(outcome.exit_code() as u8)
}
