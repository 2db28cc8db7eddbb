use std::{
    borrow::Cow,
    cell::RefCell,
    collections::VecDeque,
    io::{self, BufRead as _, Write as _},
};

use crate::exception_public::Exception;

/// Host sink for program output and source of `input()` lines.
///
/// `print()` calls [`stdout_write`](Self::stdout_write) once per formatted argument and
/// [`stdout_push`](Self::stdout_push) for separators and the line terminator.
/// `sys.stdout.write` and `sys.stderr.write` go to the matching channel.
pub trait PrintWriter {
    /// Writes the text of one argument, without separators or terminator.
    fn stdout_write(&mut self, output: Cow<'_, str>) -> Result<(), Exception>;

    /// Writes a single separator or terminator character.
    fn stdout_push(&mut self, end: char) -> Result<(), Exception>;

    /// Writes to the error channel; defaults to the process stderr.
    fn stderr_write(&mut self, output: Cow<'_, str>) -> Result<(), Exception> {
        eprint!("{output}");
        Ok(())
    }

    /// Makes buffered stdout output visible, e.g. before `input()` blocks.
    fn flush(&mut self) -> Result<(), Exception> {
        Ok(())
    }

    /// Reads one line for `input()`, without the trailing newline. `None` means end of input.
    fn read_line(&mut self) -> Result<Option<String>, Exception> {
        Ok(None)
    }
}

impl<P: PrintWriter + ?Sized> PrintWriter for &mut P {
    fn stdout_write(&mut self, output: Cow<'_, str>) -> Result<(), Exception> {
        (**self).stdout_write(output)
    }

    fn stdout_push(&mut self, end: char) -> Result<(), Exception> {
        (**self).stdout_push(end)
    }

    fn stderr_write(&mut self, output: Cow<'_, str>) -> Result<(), Exception> {
        (**self).stderr_write(output)
    }

    fn flush(&mut self) -> Result<(), Exception> {
        (**self).flush()
    }

    fn read_line(&mut self) -> Result<Option<String>, Exception> {
        (**self).read_line()
    }
}

/// Writes to the process stdout through a thread-local buffer, flushed on drop.
#[derive(Debug)]
pub struct StdPrint;

thread_local! {
    static STDOUT_BUFFER: RefCell<String> = const { RefCell::new(String::new()) };
}

fn flush_stdout_buffer() {
    STDOUT_BUFFER.with(|buffer| {
        let mut buffer = buffer.borrow_mut();
        if buffer.is_empty() {
            return;
        }
        let mut stdout = io::stdout().lock();
        let _ = stdout.write_all(buffer.as_bytes());
        let _ = stdout.flush();
        buffer.clear();
    });
}

impl PrintWriter for StdPrint {
    fn stdout_write(&mut self, output: Cow<'_, str>) -> Result<(), Exception> {
        STDOUT_BUFFER.with(|buffer| buffer.borrow_mut().push_str(&output));
        Ok(())
    }

    fn stdout_push(&mut self, end: char) -> Result<(), Exception> {
        STDOUT_BUFFER.with(|buffer| buffer.borrow_mut().push(end));
        Ok(())
    }

    fn stderr_write(&mut self, output: Cow<'_, str>) -> Result<(), Exception> {
        flush_stdout_buffer();
        let _ = io::stderr().write_all(output.as_bytes());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Exception> {
        flush_stdout_buffer();
        Ok(())
    }

    fn read_line(&mut self) -> Result<Option<String>, Exception> {
        flush_stdout_buffer();
        let mut line = String::new();
        let read = io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|err| Exception::new(crate::ExcType::OSError, err.to_string(), Vec::new()))?;
        if read == 0 {
            return Ok(None);
        }
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        Ok(Some(line))
    }
}

impl Drop for StdPrint {
    fn drop(&mut self) {
        flush_stdout_buffer();
    }
}

/// Collects output into strings and serves `input()` from a queue of lines.
#[derive(Debug, Default)]
pub struct CollectStringPrint {
    stdout: String,
    stderr: String,
    input: VecDeque<String>,
}

impl CollectStringPrint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A collector whose `input()` calls return `lines` in order.
    #[must_use]
    pub fn with_input<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            input: lines.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn output(&self) -> &str {
        &self.stdout
    }

    #[must_use]
    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    #[must_use]
    pub fn into_output(self) -> String {
        self.stdout
    }
}

impl PrintWriter for CollectStringPrint {
    fn stdout_write(&mut self, output: Cow<'_, str>) -> Result<(), Exception> {
        self.stdout.push_str(&output);
        Ok(())
    }

    fn stdout_push(&mut self, end: char) -> Result<(), Exception> {
        self.stdout.push(end);
        Ok(())
    }

    fn stderr_write(&mut self, output: Cow<'_, str>) -> Result<(), Exception> {
        self.stderr.push_str(&output);
        Ok(())
    }

    fn read_line(&mut self) -> Result<Option<String>, Exception> {
        Ok(self.input.pop_front())
    }
}

/// Discards all output.
#[derive(Debug, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn stdout_write(&mut self, _output: Cow<'_, str>) -> Result<(), Exception> {
        Ok(())
    }

    fn stdout_push(&mut self, _end: char) -> Result<(), Exception> {
        Ok(())
    }

    fn stderr_write(&mut self, _output: Cow<'_, str>) -> Result<(), Exception> {
        Ok(())
    }
}
