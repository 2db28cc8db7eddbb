//! Runs every `tests/test_cases/*.py` program and checks it against the expectation
//! written in its trailing comments.
//!
//! A case ends with either an `# expect:` block, whose following `# `-prefixed lines are
//! the exact stdout, or a single `# raises: Type: message` line naming the uncaught
//! exception summary. A case with neither only has to run without error.

use std::{fs, path::Path};

use skein::{CollectStringPrint, Runner};

enum Expectation {
    Output(String),
    Raises(String),
    Succeeds,
}

fn parse_expectation(source: &str) -> Expectation {
    let mut lines = source.lines();
    while let Some(line) = lines.next() {
        if let Some(summary) = line.strip_prefix("# raises: ") {
            return Expectation::Raises(summary.trim_end().to_owned());
        }
        if line.trim_end() == "# expect:" {
            let mut output = String::new();
            for line in lines.by_ref() {
                let Some(rest) = line.strip_prefix('#') else { break };
                output.push_str(rest.strip_prefix(' ').unwrap_or(rest));
                output.push('\n');
            }
            return Expectation::Output(output);
        }
    }
    Expectation::Succeeds
}

fn run_case(path: &Path) -> datatest_stable::Result<()> {
    let source = fs::read_to_string(path)?;
    let filename = path.file_name().map_or_else(|| "case.py".to_owned(), |name| name.to_string_lossy().into_owned());
    let expectation = parse_expectation(&source);

    let runner = Runner::new(source, &filename);
    let mut print = CollectStringPrint::new();
    let result = runner.and_then(|runner| runner.run(&mut print));

    match (expectation, result) {
        (Expectation::Output(expected), Ok(_)) => {
            if print.output() != expected {
                return Err(format!(
                    "output mismatch\n--- expected ---\n{expected}--- actual ---\n{}",
                    print.output()
                )
                .into());
            }
        }
        (Expectation::Succeeds, Ok(_)) => {}
        (Expectation::Raises(expected), Err(exc)) => {
            if exc.summary() != expected {
                return Err(format!("expected `{expected}`, raised:\n{exc}").into());
            }
        }
        (Expectation::Raises(expected), Ok(_)) => {
            return Err(format!("expected `{expected}` but the program succeeded").into());
        }
        (_, Err(exc)) => {
            return Err(format!("unexpected exception:\n{exc}\n--- output so far ---\n{}", print.output()).into());
        }
    }
    Ok(())
}

datatest_stable::harness!(run_case, "tests/test_cases", r"^.*\.py$");
