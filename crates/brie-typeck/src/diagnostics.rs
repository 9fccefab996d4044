//! Ariadne-based rendering of analysis errors.
//!
//! Every [`TypeError`] maps to an error code, a terse message, one primary
//! label and sometimes a secondary label and a help line. The same pieces
//! are emitted either as an ariadne report or as one JSON object.

use std::ops::Range;

use ariadne::{Color, Config, Label, Report, ReportKind, Source};
use brie_common::Span;

use crate::error::TypeError;
use crate::ty::Ty;

/// How diagnostics are written.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DiagnosticOptions {
    pub color: bool,
    pub json: bool,
}

impl DiagnosticOptions {
    /// Plain text without color, as used by the tests.
    pub fn colorless() -> Self {
        DiagnosticOptions {
            color: false,
            json: false,
        }
    }
}

// ── Error Codes ────────────────────────────────────────────────────────

fn error_code(err: &TypeError) -> &'static str {
    match err {
        TypeError::Conflict { .. } => "E0001",
        TypeError::Mismatch { .. } => "E0002",
        TypeError::ArityMismatch { .. } => "E0003",
        TypeError::UnresolvedReference { .. } => "E0004",
        TypeError::NotAFunction { .. } => "E0005",
        TypeError::NoSuchField { .. } => "E0006",
        TypeError::MalformedForm { .. } => "E0008",
        TypeError::MissingMain { .. } => "E0009",
        TypeError::RecursiveSpecialization { .. } => "E0010",
        TypeError::ModuleNotFound { .. } => "E0011",
        TypeError::Parse(_) => "P0001",
        TypeError::InModule { error, .. } => error_code(error),
    }
}

// ── Fix Suggestions ────────────────────────────────────────────────────

fn fix_suggestion(expected: &str, found: &Ty) -> Option<String> {
    match (expected, found) {
        ("Str", Ty::Int) => Some("convert with `to_string`".to_string()),
        ("Bool", _) => Some("conditions must be Bool, e.g. a comparison".to_string()),
        ("a printable value", _) => Some("only Int, Str, Bool and Unit can be printed".to_string()),
        _ => None,
    }
}

/// The pieces of one diagnostic.
struct Parts {
    message: String,
    primary: (Span, String),
    secondary: Option<(Span, String)>,
    help: Option<String>,
}

fn parts(error: &TypeError) -> Parts {
    let message = error.to_string();
    let only = |span: Span, label: String| Parts {
        message: message.clone(),
        primary: (span, label),
        secondary: None,
        help: None,
    };
    match error {
        TypeError::Conflict {
            left,
            right,
            span,
            other,
        } => Parts {
            secondary: (other != span).then(|| (*other, format!("this is {right}"))),
            ..only(*span, format!("this is {left}"))
        },
        TypeError::Mismatch {
            expected,
            found,
            span,
        } => Parts {
            help: fix_suggestion(expected, found),
            ..only(*span, format!("expected {expected}, found {found}"))
        },
        TypeError::ArityMismatch {
            expected, span, ..
        } => Parts {
            help: (*expected == 0)
                .then(|| "a block without parameters is called with `()`".to_string()),
            ..only(*span, format!("takes {expected} argument(s)"))
        },
        TypeError::UnresolvedReference { span, .. } => {
            only(*span, "not found in this scope".to_string())
        }
        TypeError::NotAFunction { ty, span } => only(*span, format!("this has type {ty}")),
        TypeError::NoSuchField { ty, span, .. } => {
            let help = match ty {
                Ty::Object(fields) if !fields.is_empty() => Some(format!(
                    "available fields: {}",
                    fields.keys().cloned().collect::<Vec<_>>().join(", ")
                )),
                _ => None,
            };
            Parts {
                help,
                ..only(*span, "unknown field".to_string())
            }
        }
        TypeError::MalformedForm { message, span } => only(*span, message.clone()),
        TypeError::MissingMain { span } => Parts {
            help: Some("add `define main [ ... ]`".to_string()),
            ..only(*span, "no entry point".to_string())
        },
        TypeError::RecursiveSpecialization { span, definition } => Parts {
            secondary: Some((*definition, "function defined here".to_string())),
            help: Some("loop with `while` instead".to_string()),
            ..only(*span, "recursive call".to_string())
        },
        TypeError::ModuleNotFound { span, .. } => only(*span, "required here".to_string()),
        TypeError::Parse(err) => Parts {
            secondary: err.related.clone().map(|(label, span)| (span, label)),
            ..only(err.span, err.message.clone())
        },
        TypeError::InModule { error, .. } => parts(error),
    }
}

// ── Main Rendering Function ────────────────────────────────────────────

/// Render an error against the source of the file it belongs to.
///
/// For an error raised in a required module, `source` and `filename` must
/// be those of the module named by [`TypeError::location`].
pub fn render_diagnostic(error: &TypeError, source: &str, filename: &str, options: &DiagnosticOptions) -> String {
    let (_, error) = error.location();
    let code = error_code(error);
    let parts = parts(error);
    let source_len = source.len();

    // Ariadne needs a non-empty span inside the source.
    let clamp = |span: Span| -> Range<usize> {
        let r = span.to_range();
        let s = r.start.min(source_len);
        let e = r.end.min(source_len).max(s);
        if s == e {
            s..e.saturating_add(1).min(source_len)
        } else {
            s..e
        }
    };

    if options.json {
        let mut spans = vec![serde_json::json!({
            "start": parts.primary.0.start,
            "end": parts.primary.0.end,
            "label": parts.primary.1,
        })];
        if let Some((span, label)) = &parts.secondary {
            spans.push(serde_json::json!({
                "start": span.start,
                "end": span.end,
                "label": label,
            }));
        }
        let diagnostic = serde_json::json!({
            "code": code,
            "severity": "error",
            "message": parts.message,
            "file": filename,
            "spans": spans,
            "help": parts.help,
        });
        return format!("{diagnostic}\n");
    }

    let primary = clamp(parts.primary.0);
    let mut builder = Report::build(ReportKind::Error, (filename, primary.clone()))
        .with_code(code)
        .with_message(&parts.message)
        .with_config(Config::default().with_color(options.color))
        .with_label(
            Label::new((filename, primary))
                .with_message(&parts.primary.1)
                .with_color(Color::Red),
        );
    if let Some((span, label)) = &parts.secondary {
        builder.add_label(
            Label::new((filename, clamp(*span)))
                .with_message(label)
                .with_color(Color::Blue),
        );
    }
    if let Some(help) = &parts.help {
        builder = builder.with_help(help);
    }
    let report = builder.finish();

    let mut buf = Vec::new();
    report
        .write((filename, Source::from(source)), &mut buf)
        .expect("failed to write diagnostic");
    String::from_utf8(buf).expect("diagnostic output should be valid UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_has_a_code() {
        let err = TypeError::UnresolvedReference {
            name: "x".to_string(),
            span: Span::new(0, 1),
        };
        assert_eq!(error_code(&err), "E0004");
        assert_eq!(error_code(&err.in_module("util")), "E0004");
    }

    #[test]
    fn json_carries_every_label() {
        let err = TypeError::RecursiveSpecialization {
            span: Span::new(10, 14),
            definition: Span::new(0, 20),
        };
        let out = render_diagnostic(&err, "define f [ (f ()) ]", "main.brie", &DiagnosticOptions { color: false, json: true });
        let value: serde_json::Value = serde_json::from_str(out.trim()).unwrap();
        assert_eq!(value["code"], "E0010");
        assert_eq!(value["file"], "main.brie");
        assert_eq!(value["spans"].as_array().unwrap().len(), 2);
        assert_eq!(value["spans"][1]["label"], "function defined here");
    }
}
