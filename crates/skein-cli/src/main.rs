mod cli;

use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::Parser;
use cli::{Cli, Options, ResolvedCommand};
use skein::{
    ExcType, Exception, LimitedTracker, NoLimitTracker, NoopTracer, ProfilingTracer, ResourceLimits, ResourceTracker,
    RunOptions, Runner, StdPrint, StderrTracer, VmTracer,
};
use tracing::{debug, error};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Uncaught exception or compile error.
const EXIT_FAILURE: u8 = 1;
/// Bad usage or unreadable input.
const EXIT_USAGE: u8 = 2;

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env("SKEIN_LOG").unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let Some((command, options)) = Cli::parse().resolve_command() else {
        eprintln!("error: no program given (try `skein --help`)");
        return ExitCode::from(EXIT_USAGE);
    };
    match command {
        ResolvedCommand::Run { file, args } => run(&file, args, &options),
        ResolvedCommand::Check { file } => match compile(&file) {
            Ok(_) => ExitCode::SUCCESS,
            Err(code) => code,
        },
        ResolvedCommand::Dis { file } => match compile(&file) {
            Ok(runner) => {
                print!("{}", runner.disassemble());
                ExitCode::SUCCESS
            }
            Err(code) => code,
        },
    }
}

fn compile(file: &Path) -> Result<Runner, ExitCode> {
    let source = fs::read_to_string(file).map_err(|err| {
        error!(path = %file.display(), %err, "cannot read program");
        eprintln!("error: cannot read {}: {err}", file.display());
        ExitCode::from(EXIT_USAGE)
    })?;
    Runner::new(source, &file.display().to_string()).map_err(|exc| {
        eprintln!("{exc}");
        ExitCode::from(EXIT_FAILURE)
    })
}

fn run(file: &Path, args: Vec<String>, options: &Options) -> ExitCode {
    let runner = match compile(file) {
        Ok(runner) => runner,
        Err(code) => return code,
    };
    let mut run_options = RunOptions::default().argv(std::iter::once(file.display().to_string()).chain(args).collect());
    // the program's own directory comes first, then -I paths in order
    let script_dir = file.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    run_options.paths.push(script_dir);
    run_options.paths.extend(options.paths.iter().cloned());

    let result = match options.max_depth {
        Some(depth) => {
            let limits = ResourceLimits::new().max_recursion_depth(Some(depth));
            with_tracer(&runner, &run_options, LimitedTracker::new(limits), options)
        }
        None => with_tracer(&runner, &run_options, NoLimitTracker, options),
    };
    match result {
        Ok(value) => {
            debug!(result = %value.py_repr(), "program finished");
            ExitCode::SUCCESS
        }
        Err(exc) if exc.exc_type() == ExcType::SystemExit => exit_status(&exc),
        Err(exc) => {
            eprintln!("{exc}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn with_tracer<T: ResourceTracker>(
    runner: &Runner,
    run_options: &RunOptions,
    tracker: T,
    options: &Options,
) -> Result<skein::Object, Exception> {
    let mut print = StdPrint;
    if options.profile {
        let mut profiler = ProfilingTracer::new();
        let result = runner.run_with(run_options, tracker, &mut profiler, &mut print);
        eprint!("{}", profiler.report());
        return result;
    }
    let mut stderr_tracer = StderrTracer::new();
    let mut noop = NoopTracer;
    let tracer: &mut dyn VmTracer = if options.trace { &mut stderr_tracer } else { &mut noop };
    runner.run_with(run_options, tracker, tracer, &mut print)
}

/// `sys.exit()` semantics: no argument or `None` is success, an integer is the status, anything
/// else is printed and exits with status 1.
fn exit_status(exc: &Exception) -> ExitCode {
    let Some(message) = exc.message() else {
        return ExitCode::SUCCESS;
    };
    match message.parse::<i64>() {
        Ok(code) => ExitCode::from(u8::try_from(code.rem_euclid(256)).unwrap_or(EXIT_FAILURE)),
        Err(_) => {
            eprintln!("{message}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
