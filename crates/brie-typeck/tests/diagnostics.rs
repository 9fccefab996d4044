//! Rendering tests for Brie analysis diagnostics.
//!
//! Each test triggers one error, renders it through ariadne without color
//! and checks the code, message, labels and help line that reach the user.

use std::collections::HashMap;

use brie_typeck::diagnostics::{render_diagnostic, DiagnosticOptions};
use brie_typeck::error::TypeError;

// ── Helpers ────────────────────────────────────────────────────────────

fn first_error(src: &str) -> TypeError {
    let mut loader: HashMap<String, String> = HashMap::new();
    match brie_typeck::check("main", src, &mut loader) {
        Ok(_) => panic!("expected an error for source: {src:?}"),
        Err(err) => err,
    }
}

fn render_first_error(src: &str) -> String {
    render_diagnostic(&first_error(src), src, "test.brie", &DiagnosticOptions::colorless())
}

fn render_json(src: &str) -> serde_json::Value {
    let options = DiagnosticOptions {
        color: false,
        json: true,
    };
    let out = render_diagnostic(&first_error(src), src, "test.brie", &options);
    assert!(out.ends_with('\n'));
    serde_json::from_str(out.trim_end()).expect("diagnostic is valid JSON")
}

// ── Reports ────────────────────────────────────────────────────────────

#[test]
fn mismatch_report() {
    let output = render_first_error("define main [\n  print (+ 1 \"two\")\n]");
    assert!(output.contains("[E0002] Error: expected Int, found Str"), "{output}");
    assert!(output.contains("test.brie:2:"), "{output}");
    assert!(!output.contains('\u{1b}'), "colorless output has escape codes");
}

#[test]
fn mismatch_suggests_a_conversion() {
    let output = render_first_error("define main [\n  print (++ \"n = \" 4)\n]");
    assert!(output.contains("expected Str, found Int"), "{output}");
    assert!(output.contains("convert with `to_string`"), "{output}");
}

#[test]
fn unresolved_reference_report() {
    let output = render_first_error("define main [\n  print missing\n]");
    assert!(output.contains("[E0004] Error: unresolved reference `missing`"), "{output}");
    assert!(output.contains("not found in this scope"), "{output}");
}

#[test]
fn conflict_report_has_both_labels() {
    let output = render_first_error("define main [\n  define id : x [ x ]\n  print (id 1)\n  print (id \"a\")\n]");
    assert!(output.contains("[E0001] Error: type conflict"), "{output}");
    assert!(output.contains("this is Int"), "{output}");
    assert!(output.contains("this is Str"), "{output}");
}

#[test]
fn missing_main_report() {
    let output = render_first_error("define x 1");
    assert!(output.contains("[E0009] Error: no `main` block is defined"), "{output}");
    assert!(output.contains("add `define main [ ... ]`"), "{output}");
}

#[test]
fn zero_parameter_call_hint() {
    let output = render_first_error("define f [ 1 ]\ndefine main [\n  f 2\n]");
    assert!(output.contains("[E0003]"), "{output}");
    assert!(output.contains("a block without parameters is called with `()`"), "{output}");
}

#[test]
fn parse_error_report() {
    let output = render_first_error("define main [ print 1");
    assert!(output.contains("[P0001] Error: unclosed `[`"), "{output}");
    assert!(output.contains("block opened here"), "{output}");
}

#[test]
fn no_such_field_lists_the_fields() {
    let output = render_first_error("define p <x = 1, y = 2>\ndefine main [\n  print p.z\n]");
    assert!(output.contains("[E0006]"), "{output}");
    assert!(output.contains("available fields: x, y"), "{output}");
}

// ── JSON ───────────────────────────────────────────────────────────────

#[test]
fn json_diagnostic_fields() {
    let value = render_json("define main [\n  print y\n]");
    assert_eq!(value["code"], "E0004");
    assert_eq!(value["severity"], "error");
    assert_eq!(value["message"], "unresolved reference `y`");
    assert_eq!(value["file"], "test.brie");
    let spans = value["spans"].as_array().unwrap();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0]["start"], 22);
    assert_eq!(spans[0]["end"], 23);
    assert!(value["help"].is_null());
}

#[test]
fn json_diagnostic_help() {
    let value = render_json("define f [ 1 ]\ndefine main [\n  f 2\n]");
    assert_eq!(value["code"], "E0003");
    assert_eq!(value["help"], "a block without parameters is called with `()`");
}
