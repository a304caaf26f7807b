//! Compile error types with rich diagnostics.

use std::path::Path;

use miette::{Diagnostic, NamedSource, SourceSpan};
use proc_macro2::{LineColumn, Span};

/// Error raised while compiling a script module.
///
/// Every variant carries the module source and a span, so `miette` renders
/// the offending snippet:
///
/// ```text
/// Error: hotreload::compile::syntax
///   × syntax error in app/m.rs
///    ╭─[app/m.rs:3:17]
///  3 │     return x + y +
///    ·                 ─ expected an expression
///    ╰────
/// ```
#[derive(Debug, Diagnostic, thiserror::Error)]
pub enum CompileError {
    /// The source is not valid Rust syntax.
    #[error("syntax error in {path}")]
    #[diagnostic(
        code(hotreload::compile::syntax),
        help("fix the syntax error and save again; the previous version stays active")
    )]
    Syntax {
        /// Module path as displayed to the user.
        path: String,

        /// The module source.
        #[source_code]
        src: NamedSource<String>,

        /// Where the parser gave up.
        #[label("{message}")]
        span: SourceSpan,

        /// Parser message.
        message: String,
    },

    /// Valid Rust, but outside the supported script subset.
    #[error("unsupported {construct} in {path}")]
    #[diagnostic(
        code(hotreload::compile::unsupported),
        help(
            "script modules support fn, struct, impl, const and static items with a dynamically typed expression subset"
        )
    )]
    Unsupported {
        /// Module path as displayed to the user.
        path: String,

        /// What was found.
        construct: String,

        /// The module source.
        #[source_code]
        src: NamedSource<String>,

        /// Location of the construct.
        #[label("not supported here")]
        span: SourceSpan,
    },

    /// A name is defined twice at the top level.
    #[error("`{name}` is defined more than once in {path}")]
    #[diagnostic(code(hotreload::compile::duplicate))]
    Duplicate {
        /// Module path as displayed to the user.
        path: String,

        /// The duplicated name.
        name: String,

        /// The module source.
        #[source_code]
        src: NamedSource<String>,

        /// Location of the second definition.
        #[label("redefined here")]
        span: SourceSpan,
    },
}

impl CompileError {
    /// Short human-readable description without the source snippet.
    pub fn summary(&self) -> String {
        match self {
            Self::Syntax { message, span, .. } => {
                format!("{message} (at byte {})", span.offset())
            }
            Self::Unsupported { construct, .. } => format!("unsupported {construct}"),
            Self::Duplicate { name, .. } => format!("duplicate definition of `{name}`"),
        }
    }
}

/// Builds [`CompileError`]s for one source file.
pub(crate) struct ErrorContext<'a> {
    path: &'a Path,
    source: &'a str,
}

impl<'a> ErrorContext<'a> {
    pub(crate) const fn new(path: &'a Path, source: &'a str) -> Self {
        Self { path, source }
    }

    fn named_source(&self) -> NamedSource<String> {
        NamedSource::new(self.display_path(), self.source.to_string())
    }

    fn display_path(&self) -> String {
        self.path.display().to_string()
    }

    pub(crate) fn syntax(&self, err: &syn::Error) -> CompileError {
        CompileError::Syntax {
            path: self.display_path(),
            src: self.named_source(),
            span: self.span(err.span()),
            message: err.to_string(),
        }
    }

    pub(crate) fn unsupported(&self, construct: impl Into<String>, span: Span) -> CompileError {
        CompileError::Unsupported {
            path: self.display_path(),
            construct: construct.into(),
            src: self.named_source(),
            span: self.span(span),
        }
    }

    pub(crate) fn duplicate(&self, name: impl Into<String>, span: Span) -> CompileError {
        CompileError::Duplicate {
            path: self.display_path(),
            name: name.into(),
            src: self.named_source(),
            span: self.span(span),
        }
    }

    /// Converts a `proc_macro2` span into a byte span of this source.
    fn span(&self, span: Span) -> SourceSpan {
        let start = offset_of(self.source, span.start());
        let end = offset_of(self.source, span.end()).max(start);
        SourceSpan::new(start.into(), end - start)
    }
}

/// Byte offset of a 1-based line / 0-based char column position.
fn offset_of(source: &str, at: LineColumn) -> usize {
    let mut offset = 0;
    for (index, line) in source.split_inclusive('\n').enumerate() {
        if index + 1 == at.line {
            let column = line
                .char_indices()
                .nth(at.column)
                .map_or(line.len(), |(byte, _)| byte);
            return offset + column;
        }
        offset += line.len();
    }
    source.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_of_first_line() {
        let src = "fn a() {}\nfn b() {}\n";
        assert_eq!(offset_of(src, LineColumn { line: 1, column: 3 }), 3);
    }

    #[test]
    fn test_offset_of_later_line() {
        let src = "fn a() {}\nfn b() {}\n";
        assert_eq!(offset_of(src, LineColumn { line: 2, column: 3 }), 13);
    }

    #[test]
    fn test_offset_of_multibyte_column() {
        let src = "const S: &str = \"é\"; x";
        let col = src.chars().count() - 1;
        assert_eq!(offset_of(src, LineColumn { line: 1, column: col }), src.len() - 1);
    }

    #[test]
    fn test_offset_past_end_clamps() {
        assert_eq!(offset_of("abc", LineColumn { line: 9, column: 0 }), 3);
    }
}
