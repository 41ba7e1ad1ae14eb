use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use thiserror::Error;
use vm::{DisasmError, Interpreter, RuntimeBridge};

/// Loads and runs (or disassembles) a compiled bytecode image.
#[derive(Debug, Parser)]
#[command(name = "byterun", version, about)]
struct Args {
    /// Compiled bytecode file to load.
    file: PathBuf,

    /// Disassemble the program to stdout instead of running it (default).
    #[arg(short = 'd', long, conflicts_with = "interpret")]
    disassemble: bool,

    /// Interpret the program.
    #[arg(short = 'i', long)]
    interpret: bool,
}

#[derive(Debug, Error)]
enum Error {
    #[error("loading {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: image::LoadError,
    },

    #[error("disassembling {path}: {source}")]
    Disasm {
        path: PathBuf,
        #[source]
        source: DisasmError,
    },

    #[error("running {path}: {source}")]
    Run {
        path: PathBuf,
        #[source]
        source: vm::RuntimeError,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    if let Err(err) = run(&args) {
        log::error!("{}", err);
        eprintln!("{}", err);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn run(args: &Args) -> Result<(), Error> {
    let image = image::read_file(&args.file).map_err(|source| Error::Load {
        path: args.file.clone(),
        source,
    })?;

    if args.interpret {
        let runtime = RuntimeBridge::new();
        let source_name = args
            .file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| args.file.display().to_string());
        let mut interpreter = Interpreter::new(&image, runtime, source_name);
        interpreter.run().map_err(|source| Error::Run {
            path: args.file.clone(),
            source,
        })
    } else {
        let stdout = io::stdout();
        let mut out = BufWriter::new(stdout.lock());
        vm::disassemble(&image, &mut out).map_err(|source| Error::Disasm {
            path: args.file.clone(),
            source,
        })?;
        out.flush().map_err(|err| Error::Disasm {
            path: args.file.clone(),
            source: DisasmError::Io(err),
        })
    }
}
