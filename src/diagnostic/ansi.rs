use super::{Diagnostic, Severity};
use crate::ast::SourceMap;

/// Human renderer: `error: message`, then the offending source line
/// with a caret frame when the diagnostic carries a span and text.
pub struct AnsiRenderer {
    pub use_color: bool,
}

impl AnsiRenderer {
    fn bold(&self, s: &str) -> String {
        if self.use_color {
            format!("\x1b[1m{s}\x1b[0m")
        } else {
            s.to_string()
        }
    }

    fn bold_red(&self, s: &str) -> String {
        if self.use_color {
            format!("\x1b[1;31m{s}\x1b[0m")
        } else {
            s.to_string()
        }
    }

    fn cyan(&self, s: &str) -> String {
        if self.use_color {
            format!("\x1b[36m{s}\x1b[0m")
        } else {
            s.to_string()
        }
    }

    fn dim(&self, s: &str) -> String {
        if self.use_color {
            format!("\x1b[2m{s}\x1b[0m")
        } else {
            s.to_string()
        }
    }

    pub fn render(&self, d: &Diagnostic) -> String {
        let mut out = String::new();

        let severity = match d.severity {
            Severity::Error => self.bold_red("error"),
            Severity::Warning => self.bold(&self.cyan("warning")),
        };
        match d.code {
            Some(code) => {
                out.push_str(&format!("{severity}[{code}]: {}\n", self.bold(&d.message)))
            }
            None => out.push_str(&format!("{severity}: {}\n", self.bold(&d.message))),
        }

        if let (Some(label), Some(source)) = (&d.label, &d.source) {
            let map = SourceMap::new(source);
            let (line, col) = map.line_col(label.span.start);
            let text = map.line(source, line);

            out.push_str(&format!("  {} {line}:{col}\n", self.cyan("-->")));

            let gutter = line.to_string().len();
            let pipe = self.cyan("|");
            let pad = " ".repeat(gutter);
            out.push_str(&format!("{pad} {pipe}\n"));
            let line_num = self.cyan(&format!("{line:>gutter$}"));
            out.push_str(&format!("{line_num} {pipe} {text}\n"));

            let carets = "^".repeat((label.span.end.saturating_sub(label.span.start)).max(1));
            let indent = " ".repeat(col.saturating_sub(1));
            if label.message.is_empty() {
                out.push_str(&format!("{pad} {pipe} {indent}{}\n", self.bold_red(&carets)));
            } else {
                out.push_str(&format!(
                    "{pad} {pipe} {indent}{} {}\n",
                    self.bold_red(&carets),
                    self.bold_red(&label.message)
                ));
            }
            out.push_str(&format!("{pad} {pipe}\n"));
        }

        for note in &d.notes {
            out.push_str(&format!("  {} note: {note}\n", self.dim("=")));
        }
        if let Some(suggestion) = &d.suggestion {
            out.push_str(&format!("  {} suggestion: {suggestion}\n", self.dim("=")));
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Span;

    fn sample() -> Diagnostic {
        Diagnostic::error("unexpected token")
            .with_code("TINY-P001")
            .with_span(Span { start: 6, end: 9 }, "here")
            .with_source("write end x")
            .with_note("while parsing a write list")
            .with_suggestion("remove the stray token")
    }

    #[test]
    fn render_has_message_and_code() {
        let out = AnsiRenderer { use_color: false }.render(&sample());
        assert!(out.contains("error[TINY-P001]: unexpected token"), "got:\n{out}");
    }

    #[test]
    fn render_points_at_line_and_column() {
        let out = AnsiRenderer { use_color: false }.render(&sample());
        assert!(out.contains("--> 1:7"), "got:\n{out}");
        assert!(out.contains("write end x"), "got:\n{out}");
        assert!(out.contains("^^^"), "got:\n{out}");
    }

    #[test]
    fn render_includes_notes_and_suggestion() {
        let out = AnsiRenderer { use_color: false }.render(&sample());
        assert!(out.contains("note: while parsing a write list"));
        assert!(out.contains("suggestion: remove the stray token"));
    }

    #[test]
    fn render_without_source_skips_the_frame() {
        let d = Diagnostic::error("boom").with_code("TINY-R005");
        let out = AnsiRenderer { use_color: false }.render(&d);
        assert!(out.contains("error[TINY-R005]: boom"));
        assert!(!out.contains("-->"));
    }

    #[test]
    fn color_toggle_controls_escape_codes() {
        assert!(AnsiRenderer { use_color: true }.render(&sample()).contains("\x1b["));
        assert!(!AnsiRenderer { use_color: false }.render(&sample()).contains("\x1b["));
    }

    #[test]
    fn multiline_source_shows_the_right_line() {
        let d = Diagnostic::error("bad")
            .with_span(Span { start: 6, end: 7 }, "")
            .with_source("x = 1\ny = ?\n");
        let out = AnsiRenderer { use_color: false }.render(&d);
        assert!(out.contains("--> 2:1"), "got:\n{out}");
        assert!(out.contains("y = ?"), "got:\n{out}");
    }
}
