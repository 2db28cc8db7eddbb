use std::fmt::{self, Write as _};

use crate::{exception_private::ExcType, parse::CodeRange};

/// A position in source code: 1-based line, 0-based column (in characters).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct CodeLoc {
    pub line: u32,
    pub column: u32,
}

impl CodeLoc {
    #[must_use]
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// One entry of a traceback, resolved to strings for display outside the VM.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StackFrame {
    pub filename: String,
    pub start: CodeLoc,
    pub end: CodeLoc,
    /// Function name, `<module>` for module code, or `None` for syntax errors.
    pub frame_name: Option<String>,
    /// The source line `start` points into, without its trailing newline.
    pub preview_line: Option<String>,
    /// Suppresses the `^^^` marker under the preview line.
    pub hide_caret: bool,
}

impl StackFrame {
    pub(crate) fn from_position(position: CodeRange, filename: &str, source: &str, frame_name: Option<String>) -> Self {
        let start = position.start();
        let preview_line = source
            .lines()
            .nth(start.line.saturating_sub(1) as usize)
            .map(|line| line.trim_end().to_owned());
        Self {
            filename: filename.to_owned(),
            start,
            end: position.end(),
            frame_name,
            preview_line,
            hide_caret: false,
        }
    }

    fn write_to(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "  File \"{}\", line {}", self.filename, self.start.line)?;
        if let Some(name) = &self.frame_name {
            write!(f, ", in {name}")?;
        }
        f.write_char('\n')?;
        let Some(line) = &self.preview_line else {
            return Ok(());
        };
        let trimmed = line.trim_start();
        let indent = line.chars().count() - trimmed.chars().count();
        writeln!(f, "    {trimmed}")?;
        if self.hide_caret || self.start.line == 0 {
            return Ok(());
        }
        let start = (self.start.column as usize).saturating_sub(indent);
        let end = if self.end.line == self.start.line && self.end.column > self.start.column {
            (self.end.column as usize).saturating_sub(indent)
        } else {
            start + 1
        };
        if self.end.line == self.start.line && start == 0 && end >= trimmed.chars().count() && self.frame_name.is_some() {
            // CPython omits the marker when it would underline the whole line
            return Ok(());
        }
        writeln!(f, "    {}{}", " ".repeat(start), "^".repeat(end - start))
    }
}

/// An exception that escaped the program, or a compile error reported as `SyntaxError`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Exception {
    exc_type: ExcType,
    /// Class name shown in the summary line; differs from `exc_type` for user-defined exceptions.
    type_name: String,
    message: Option<String>,
    traceback: Vec<StackFrame>,
}

impl Exception {
    #[must_use]
    pub fn new(exc_type: ExcType, message: impl Into<Option<String>>, traceback: Vec<StackFrame>) -> Self {
        let type_name: &'static str = exc_type.into();
        Self {
            exc_type,
            type_name: type_name.to_owned(),
            message: message.into().filter(|m| !m.is_empty()),
            traceback,
        }
    }

    /// An exception whose class is user-defined; `exc_type` is the nearest builtin ancestor.
    #[must_use]
    pub(crate) fn with_type_name(mut self, type_name: String) -> Self {
        self.type_name = type_name;
        self
    }

    #[must_use]
    pub fn runtime_error(message: impl Into<String>) -> Self {
        Self::new(ExcType::RuntimeError, Some(message.into()), Vec::new())
    }

    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        self.exc_type
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    #[must_use]
    pub fn into_message(self) -> Option<String> {
        self.message
    }

    #[must_use]
    pub fn traceback(&self) -> &[StackFrame] {
        &self.traceback
    }

    /// The last line of a traceback, e.g. `ValueError: bad value`.
    #[must_use]
    pub fn summary(&self) -> String {
        match &self.message {
            Some(message) => format!("{}: {message}", self.type_name),
            None => self.type_name.clone(),
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let is_syntax = self.traceback.iter().all(|frame| frame.frame_name.is_none());
        if !self.traceback.is_empty() && !is_syntax {
            writeln!(f, "Traceback (most recent call last):")?;
        }
        for frame in &self.traceback {
            frame.write_to(f)?;
        }
        f.write_str(&self.summary())
    }
}

impl std::error::Error for Exception {}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn traceback_display() {
        let source = "def f():\n    return 1 / 0\nf()\n";
        let inner = CodeRange::new(CodeLoc::new(2, 11), CodeLoc::new(2, 16));
        let outer = CodeRange::new(CodeLoc::new(3, 0), CodeLoc::new(3, 3));
        let exc = Exception::new(
            ExcType::ZeroDivisionError,
            Some("division by zero".to_owned()),
            vec![
                StackFrame::from_position(outer, "main.py", source, Some("<module>".to_owned())),
                StackFrame::from_position(inner, "main.py", source, Some("f".to_owned())),
            ],
        );
        assert_eq!(
            exc.to_string(),
            "Traceback (most recent call last):\n  File \"main.py\", line 3, in <module>\n    f()\n  File \"main.py\", line 2, in f\n    return 1 / 0\n           ^^^^^\nZeroDivisionError: division by zero"
        );
    }

    #[test]
    fn syntax_error_display() {
        let exc = Exception::new(
            ExcType::SyntaxError,
            Some("invalid syntax".to_owned()),
            vec![StackFrame::from_position(
                CodeRange::point(CodeLoc::new(1, 2)),
                "bad.py",
                "x $ y\n",
                None,
            )],
        );
        assert_eq!(
            exc.to_string(),
            "  File \"bad.py\", line 1\n    x $ y\n      ^\nSyntaxError: invalid syntax"
        );
    }

    #[test]
    fn empty_message_is_dropped() {
        let exc = Exception::new(ExcType::ValueError, Some(String::new()), Vec::new());
        assert_eq!(exc.summary(), "ValueError");
    }
}
