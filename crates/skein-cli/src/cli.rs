//! Command-line interface for skein.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// skein - run Python-like programs on a bytecode VM
#[derive(Parser, Debug)]
#[command(name = "skein")]
#[command(author, version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Program to run when no subcommand is given
    #[command(flatten)]
    pub run: RunArgs,

    #[command(flatten)]
    pub options: Options,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a program
    Run(RunArgs),
    /// Parse and compile a program without running it
    Check {
        file: PathBuf,
    },
    /// Print the bytecode of a program
    Dis {
        file: PathBuf,
    },
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Path to the program
    pub file: Option<PathBuf>,

    /// Arguments exposed as sys.argv[1:]
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

#[derive(Args, Debug, Default)]
pub struct Options {
    /// Log every executed instruction to stderr
    #[arg(long, global = true, conflicts_with = "profile")]
    pub trace: bool,

    /// Print an opcode profile to stderr when the program finishes
    #[arg(long, global = true)]
    pub profile: bool,

    /// Maximum call depth before RecursionError
    #[arg(long, global = true, value_name = "N")]
    pub max_depth: Option<usize>,

    /// Extra directory searched for imports (repeatable)
    #[arg(short = 'I', long = "path", global = true, value_name = "DIR")]
    pub paths: Vec<PathBuf>,
}

/// The command after defaulting a bare file argument to `run`.
#[derive(Debug)]
pub enum ResolvedCommand {
    Run { file: PathBuf, args: Vec<String> },
    Check { file: PathBuf },
    Dis { file: PathBuf },
}

impl Cli {
    /// `None` when neither a subcommand nor a file was given.
    pub fn resolve_command(self) -> Option<(ResolvedCommand, Options)> {
        let command = match self.command {
            Some(Commands::Run(RunArgs { file, args })) => ResolvedCommand::Run { file: file?, args },
            Some(Commands::Check { file }) => ResolvedCommand::Check { file },
            Some(Commands::Dis { file }) => ResolvedCommand::Dis { file },
            None => ResolvedCommand::Run {
                file: self.run.file?,
                args: self.run.args,
            },
        };
        Some((command, self.options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(argv: &[&str]) -> Option<ResolvedCommand> {
        Cli::try_parse_from(argv).ok()?.resolve_command().map(|(command, _)| command)
    }

    #[test]
    fn bare_file_runs_it() {
        let Some(ResolvedCommand::Run { file, args }) = resolve(&["skein", "main.py", "a", "-b"]) else {
            panic!("expected run");
        };
        assert_eq!(file, PathBuf::from("main.py"));
        assert_eq!(args, vec!["a".to_owned(), "-b".to_owned()]);
    }

    #[test]
    fn subcommands() {
        assert!(matches!(resolve(&["skein", "check", "x.py"]), Some(ResolvedCommand::Check { .. })));
        assert!(matches!(resolve(&["skein", "dis", "x.py"]), Some(ResolvedCommand::Dis { .. })));
        assert!(resolve(&["skein"]).is_none());
    }

    #[test]
    fn global_options() {
        let cli = Cli::try_parse_from(["skein", "--max-depth", "50", "-I", "lib", "run", "x.py"]).unwrap();
        let (_, options) = cli.resolve_command().unwrap();
        assert_eq!(options.max_depth, Some(50));
        assert_eq!(options.paths, vec![PathBuf::from("lib")]);
        assert!(Cli::try_parse_from(["skein", "--trace", "--profile", "x.py"]).is_err());
    }
}
