//! End-to-end analysis tests.
//!
//! Each test parses a small Brie program, runs the whole analysis and checks
//! either the resolved types and phonebook contents or the first error.

use std::collections::HashMap;

use brie_common::GenericAllocator;
use brie_parser::{NodeKind, Program};
use brie_typeck::error::TypeError;
use brie_typeck::phonebook::PhoneFunction;
use brie_typeck::triage;
use brie_typeck::ty::Ty;
use brie_typeck::typer::Typer;
use brie_typeck::{aliaser, store::Typetable, ModuleLoader, TypeckResult};

// ── Helpers ────────────────────────────────────────────────────────────

fn check_source(src: &str) -> Result<TypeckResult, TypeError> {
    check_with_modules(src, &[])
}

fn check_with_modules(src: &str, modules: &[(&str, &str)]) -> Result<TypeckResult, TypeError> {
    let mut loader: HashMap<String, String> = modules
        .iter()
        .map(|(name, source)| (name.to_string(), source.to_string()))
        .collect();
    brie_typeck::check("main", src, &mut loader)
}

fn check_ok(src: &str) -> TypeckResult {
    match check_source(src) {
        Ok(result) => result,
        Err(err) => panic!("unexpected error: {err}"),
    }
}

fn check_err(src: &str) -> TypeError {
    match check_source(src) {
        Ok(_) => panic!("expected an error for source: {src:?}"),
        Err(err) => err,
    }
}

/// Resolved type of the argument in the `n`th line of `main`, which must
/// look like `(f arg)`.
fn argument_type(result: &TypeckResult, n: usize) -> Ty {
    let line = &result.main_lines()[n];
    let Some([_, argument]) = line.parens() else {
        panic!("line {line} is not an application");
    };
    result.ty(argument).cloned().expect("argument was evaluated")
}

/// The only registered closure with exactly these parameter names.
fn closure<'r>(result: &'r TypeckResult, params: &[&str]) -> &'r PhoneFunction {
    let mut found = result
        .phonebook
        .functions()
        .filter(|function| function.parameters() == params);
    let function = found.next().expect("no closure with these parameters");
    assert!(found.next().is_none(), "more than one closure matches");
    function
}

fn parse(src: &str) -> (Program, GenericAllocator) {
    let mut alloc = GenericAllocator::new();
    let program = brie_parser::parse(src, &mut alloc).unwrap();
    (program, alloc)
}

/// Class sizes after running only the scope binder, sorted.
fn alias_class_sizes(src: &str) -> Vec<usize> {
    let (program, _) = parse(src);
    let mut store = Typetable::new();
    aliaser::bind_program(&mut store, &program).unwrap();
    let mut sizes: Vec<usize> = store
        .classes()
        .into_iter()
        .map(|(members, ty)| {
            assert_eq!(ty.to_string(), "an unknown type");
            members.len()
        })
        .collect();
    sizes.sort_unstable();
    sizes
}

// ── Scope binding ──────────────────────────────────────────────────────

#[test]
fn parameter_and_its_reference_form_one_class() {
    assert_eq!(alias_class_sizes(": x [ x ]"), vec![2]);
}

#[test]
fn let_shadows_a_parameter_of_the_same_name() {
    // binder, value and reference; the parameter stays free
    assert_eq!(alias_class_sizes(": x [ define x 2\n x ]"), vec![3]);
}

#[test]
fn inner_parameter_shadows_an_outer_let() {
    assert_eq!(alias_class_sizes("[ define x a \n : x [ x ] ]"), vec![2, 2]);
}

#[test]
fn enclosing_block_is_never_aliased() {
    let (program, _) = parse("[ define x a \n : x [ x ] ]");
    let mut store = Typetable::new();
    aliaser::bind_program(&mut store, &program).unwrap();
    let line = &program.items[0];
    let block = &line.parens().unwrap()[0];
    assert!(matches!(block.kind, NodeKind::Block { .. }));
    assert!(store.class_of(line.generic.id).is_none());
    assert!(store.class_of(block.generic.id).is_none());
}

// ── Basic evaluation ───────────────────────────────────────────────────

#[test]
fn print_returns_unit() {
    let result = check_ok("define main [\n  print \"hello\"\n]");
    let line = &result.main_lines()[0];
    assert_eq!(result.ty(line), Some(&Ty::Unit));
    assert_eq!(argument_type(&result, 0), Ty::Str);
}

#[test]
fn builtins_are_curried() {
    let result = check_ok("define main [\n  print (+ 1 2)\n  print (++ \"a\" (to_string 3))\n]");
    assert_eq!(argument_type(&result, 0), Ty::Int);
    assert_eq!(argument_type(&result, 1), Ty::Str);
}

#[test]
fn builtin_argument_mismatch() {
    let err = check_err("define main [\n  print (+ 1 \"two\")\n]");
    assert_eq!(err.to_string(), "expected Int, found Str");
}

#[test]
fn missing_main() {
    let err = check_err("define x 1");
    assert!(matches!(err, TypeError::MissingMain { .. }));
}

#[test]
fn main_must_be_a_block() {
    let err = check_err("define main 1");
    assert_eq!(err.to_string(), "`main` must be a block");
}

#[test]
fn only_definitions_at_the_top_level() {
    let err = check_err("print 1\ndefine main [ 1 ]");
    assert_eq!(err.to_string(), "only `define` and `require` may appear at the top level");
}

#[test]
fn duplicate_top_level_definition() {
    let err = check_err("define x 1\ndefine x 2\ndefine main [ x ]");
    assert_eq!(err.to_string(), "`x` is already defined");
}

#[test]
fn unresolved_reference() {
    let err = check_err("define main [\n  print y\n]");
    match err {
        TypeError::UnresolvedReference { name, span } => {
            assert_eq!(name, "y");
            assert_eq!(span.len(), 1);
        }
        other => panic!("expected an unresolved reference, got {other}"),
    }
}

#[test]
fn applying_a_non_function() {
    let err = check_err("define x 1\ndefine main [\n  x 2\n]");
    assert_eq!(err.to_string(), "a value of type Int is not a function");
}

#[test]
fn applying_a_function_to_too_many_arguments() {
    let err = check_err("define id : x [ x ]\ndefine main [\n  id 1 2\n]");
    assert!(matches!(err, TypeError::ArityMismatch { expected: 1, found: 2, .. }), "{err}");

    let err = check_err("define main [\n  print (+ 1 2 3)\n]");
    assert_eq!(err.to_string(), "expected 2 argument(s), found 3");
}

// ── Monomorphization ───────────────────────────────────────────────────

#[test]
fn top_level_function_is_specialized_per_argument_type() {
    let src = "define id : x [ x ]\ndefine main [\n  print (id 1)\n  print (id \"a\")\n  print (id 2)\n]";
    let result = check_ok(src);
    let id = closure(&result, &["x"]);
    let keys: Vec<String> = id
        .expansions()
        .iter()
        .map(|spec| Ty::key(&spec.arguments))
        .collect();
    assert_eq!(keys, vec!["Int", "Str"]);
    assert_eq!(id.expansions()[0].result, Some(Ty::Int));
    assert_eq!(id.expansions()[1].result, Some(Ty::Str));

    let line = &result.main_lines()[1];
    let call = &line.parens().unwrap()[1];
    assert_eq!(result.ty(call), Some(&Ty::Str));
}

#[test]
fn specializations_are_independent_copies() {
    let src = "define show : x [ print x ]\ndefine main [\n  show 1\n  show true\n]";
    let result = check_ok(src);
    let show = closure(&result, &["x"]);
    let [first, second] = show.expansions() else {
        panic!("expected two specializations");
    };
    assert_eq!(first.body.to_string(), second.body.to_string());
    assert_ne!(first.body.generic, second.body.generic);
}

#[test]
fn let_bound_function_is_monomorphic() {
    let src = "define main [\n  define id : x [ x ]\n  print (id 1)\n  print (id \"a\")\n]";
    let err = check_err(src);
    match &err {
        TypeError::Conflict { left, right, .. } => {
            let mut sides = [left.as_str(), right.as_str()];
            sides.sort_unstable();
            assert_eq!(sides, ["Int", "Str"]);
        }
        other => panic!("expected a type conflict, got {other}"),
    }
}

#[test]
fn partial_application() {
    let src = "define add : x y [ + x y ]\ndefine main [\n  define inc (add 1)\n  print (inc 41)\n]";
    let result = check_ok(src);
    let add = closure(&result, &["x", "y"]);
    assert_eq!(add.expansions().len(), 1);
    assert_eq!(add.expansions()[0].arguments, vec![Ty::Int, Ty::Int]);
}

#[test]
fn zero_parameter_block_is_called_with_unit() {
    let result = check_ok("define f [ 1 ]\ndefine main [\n  print (f ())\n]");
    assert_eq!(argument_type(&result, 0), Ty::Int);

    let err = check_err("define f [ 1 ]\ndefine main [\n  print (f 2)\n]");
    assert_eq!(err.to_string(), "expected 0 argument(s), found 1");
}

#[test]
fn recursion_with_the_same_types_is_rejected() {
    let err = check_err("define loop : n [ loop n ]\ndefine main [ loop 1 ]");
    assert!(matches!(err, TypeError::RecursiveSpecialization { .. }), "got {err}");
}

// ── Captures ───────────────────────────────────────────────────────────

#[test]
fn only_read_names_are_captured() {
    let src = "define main [\n  define n 10\n  define unused \"x\"\n  define add : x [ + x n ]\n  print (add 1)\n]";
    let result = check_ok(src);
    let add = closure(&result, &["x"]);
    assert!(add.possibly().contains("unused"));
    assert_eq!(result.phonebook.lookup_found(add.id), vec!["n".to_string()]);
}

#[test]
fn closure_without_free_names_captures_nothing() {
    let src = "define main [\n  define n 10\n  define f : x [ + x 1 ]\n  print (f n)\n]";
    let result = check_ok(src);
    let f = closure(&result, &["x"]);
    assert!(result.phonebook.lookup_found(f.id).is_empty());
}

#[test]
fn nested_closure_captures_propagate_outward() {
    let src = "define main [\n  define n 1\n  define outer : a [\n    define inner : b [ + b n ]\n    inner a\n  ]\n  print (outer 2)\n]";
    let result = check_ok(src);
    let outer = closure(&result, &["a"]);
    assert_eq!(result.phonebook.lookup_found(outer.id), vec!["n".to_string()]);
    let inner = closure(&result, &["b"]);
    assert_eq!(result.phonebook.lookup_found(inner.id), vec!["n".to_string()]);
}

#[test]
fn top_level_names_are_not_captures() {
    let src = "define base 5\ndefine add : x [ + x base ]\ndefine main [\n  print (add 1)\n]";
    let result = check_ok(src);
    let add = closure(&result, &["x"]);
    assert!(result.phonebook.lookup_found(add.id).is_empty());
}

// ── Control flow ───────────────────────────────────────────────────────

#[test]
fn if_else_joins_branch_types() {
    let src = "define pick : b [\n  if b [ \"yes\" ] else [ \"no\" ]\n]\ndefine main [\n  print (pick true)\n]";
    let result = check_ok(src);
    assert_eq!(argument_type(&result, 0), Ty::Str);
}

#[test]
fn if_branches_must_agree() {
    let src = "define pick : b [\n  if b [ 1 ] else [ \"no\" ]\n]\ndefine main [\n  print (pick true)\n]";
    let err = check_err(src);
    assert_eq!(err.to_string(), "expected Int, found Str");
    assert!(err.location().0.is_none());
}

#[test]
fn if_condition_must_be_bool() {
    let err = check_err("define main [\n  if 1 [ print 1 ]\n]");
    assert_eq!(err.to_string(), "expected Bool, found Int");
}

#[test]
fn while_loop_over_an_object_field() {
    let src = "define main [\n  define counter <n = 0>\n  while (< counter.n 3) [\n    _update counter.n (+ counter.n 1)\n  ]\n  print counter.n\n]";
    check_ok(src);
}

// ── Objects ────────────────────────────────────────────────────────────

#[test]
fn field_update_keeps_the_field_type() {
    check_ok("define main [\n  define p <x = 1, y = 2>\n  _update p.x 5\n  print p.x\n]");
    let err = check_err("define main [\n  define p <x = 1, y = 2>\n  _update p.x \"s\"\n]");
    assert_eq!(err.to_string(), "expected Int, found Str");
}

#[test]
fn missing_field() {
    let err = check_err("define p <x = 1>\ndefine main [\n  print p.y\n]");
    assert_eq!(err.to_string(), "type {x: Int} has no field `y`");
}

#[test]
fn objects_flow_through_functions() {
    let src = "define get_x : o [ o.x ]\ndefine main [\n  print (get_x <x = 1>)\n  print (get_x <x = \"a\", y = 2>)\n]";
    let result = check_ok(src);
    assert_eq!(argument_type(&result, 0), Ty::Int);
    assert_eq!(argument_type(&result, 1), Ty::Str);
    assert_eq!(closure(&result, &["o"]).expansions().len(), 2);
}

// ── Variants ───────────────────────────────────────────────────────────

const UNWRAP: &str = "define unwrap : opt [\n  match opt [\n    Some x -> x\n    None -> 0\n  ]\n]\n";

#[test]
fn match_binds_variant_arguments() {
    let src = format!("{UNWRAP}define main [\n  print (unwrap (Some 5))\n]");
    let result = check_ok(&src);
    assert_eq!(argument_type(&result, 0), Ty::Int);
}

#[test]
fn variants_from_both_branches_are_joined() {
    let src = format!(
        "{UNWRAP}define choose : b [\n  if b [ (Some 1) ] else [ None ]\n]\ndefine main [\n  print (unwrap (choose true))\n]"
    );
    let result = check_ok(&src);
    let choose = closure(&result, &["b"]);
    assert_eq!(
        choose.expansions()[0].result.as_ref().map(ToString::to_string),
        Some("(None | Some Int)".to_string())
    );
}

#[test]
fn arms_the_value_never_takes_are_skipped() {
    let src = format!("{UNWRAP}define main [\n  print (unwrap (Some 3))\n  print (unwrap None)\n]");
    let result = check_ok(&src);
    let unwrap = closure(&result, &["opt"]);
    let keys: Vec<String> = unwrap
        .expansions()
        .iter()
        .map(|spec| Ty::key(&spec.arguments))
        .collect();
    assert_eq!(keys, ["(Some Int)", "(None)"]);
    for spec in unwrap.expansions() {
        assert_eq!(spec.result, Some(Ty::Int));
    }
}

#[test]
fn define_inside_an_arm() {
    let src = "define main [\n  match (Some 3) [\n    (Some x) -> define y (+ x 1); y\n    None -> 0\n  ]\n]";
    let result = check_ok(src);
    assert_eq!(result.ty(&result.main_lines()[0]), Some(&Ty::Int));
}

#[test]
fn pattern_arity_must_match() {
    let src = "define main [\n  match (Pair 1 2) [\n    Pair a -> a\n  ]\n]";
    let err = check_err(src);
    assert_eq!(err.to_string(), "expected 2 argument(s), found 1");
}

#[test]
fn matching_a_non_variant() {
    let err = check_err("define main [\n  match 3 [\n    None -> 0\n  ]\n]");
    assert_eq!(err.to_string(), "expected a variant, found Int");
}

// ── Type checks and inlay ──────────────────────────────────────────────

#[test]
fn type_check_form() {
    let result = check_ok("define main [\n  print (:: (+ 1 2) Int)\n  inlay \"debugger;\"\n]");
    assert_eq!(argument_type(&result, 0), Ty::Int);
    assert_eq!(result.ty(&result.main_lines()[1]), Some(&Ty::Unit));

    let err = check_err("define main [\n  print (:: 5 Str)\n]");
    assert_eq!(err.to_string(), "expected Str, found Int");
}

// ── Modules ────────────────────────────────────────────────────────────

#[test]
fn module_functions_are_fields() {
    let util = "define double : x [ * x 2 ]\ndefine ten 10\n";
    let src = "require \"util\"\ndefine main [\n  print (util.double util.ten)\n]";
    let result = check_with_modules(src, &[("util", util)]).unwrap();
    let double = closure(&result, &["x"]);
    assert_eq!(double.file, "util");
    assert_eq!(argument_type(&result, 0), Ty::Int);
    let names: Vec<&str> = result.files.iter().map(|file| file.name.as_str()).collect();
    assert_eq!(names, vec!["util", "main"]);
}

#[derive(Default)]
struct CountingLoader {
    modules: HashMap<String, String>,
    loads: Vec<String>,
}

impl ModuleLoader for CountingLoader {
    fn load(&mut self, name: &str) -> Option<String> {
        self.loads.push(name.to_string());
        self.modules.get(name).cloned()
    }
}

#[test]
fn a_module_is_loaded_once_per_run() {
    let mut loader = CountingLoader::default();
    for (name, source) in [
        ("a", "require \"c\"\ndefine value c.base\n"),
        ("b", "require \"c\"\ndefine value (+ c.base 1)\n"),
        ("c", "define base 41\n"),
    ] {
        loader.modules.insert(name.to_string(), source.to_string());
    }
    let src = "require \"a\"\nrequire \"b\"\ndefine main [\n  print a.value\n  print b.value\n]";
    let result = brie_typeck::check("main", src, &mut loader).unwrap();
    assert_eq!(loader.loads, vec!["a", "c", "b"]);
    let names: Vec<&str> = result.files.iter().map(|file| file.name.as_str()).collect();
    assert_eq!(names, vec!["c", "a", "b", "main"]);
}

#[test]
fn missing_module() {
    let err = check_err("require \"nope\"\ndefine main [ 1 ]");
    assert_eq!(err.to_string(), "cannot find module `nope`");
}

#[test]
fn errors_inside_a_module_name_it() {
    let util = "define bad : x [ + x \"s\" ]\n";
    let src = "require \"util\"\ndefine main [\n  util.bad 1\n]";
    let err = check_with_modules(src, &[("util", util)]).unwrap_err();
    let (module, inner) = err.location();
    assert_eq!(module, Some("util"));
    assert_eq!(inner.to_string(), "expected Int, found Str");
}

#[test]
fn module_parse_errors_name_the_module() {
    let err = check_with_modules("require \"util\"\ndefine main [ 1 ]", &[("util", "define x (")]).unwrap_err();
    let (module, inner) = err.location();
    assert_eq!(module, Some("util"));
    assert!(matches!(inner, TypeError::Parse(_)));
}

#[test]
fn circular_require() {
    let src = "require \"a\"\ndefine main [ 1 ]";
    let err = check_with_modules(src, &[("a", "require \"b\"\n"), ("b", "require \"a\"\n")]).unwrap_err();
    assert_eq!(err.location().1.to_string(), "circular `require` of `a`");
}

// ── Reporting ──────────────────────────────────────────────────────────

#[test]
fn dump_types_lists_main_lines() {
    let mut result = check_ok("define main [\n  print 1\n]");
    let dump = result.dump_types();
    assert!(dump.starts_with("classes:\n"));
    assert!(dump.ends_with("main:\n  (print 1) : Unit\n"), "{dump}");
}

// ── Internal consistency ───────────────────────────────────────────────

#[test]
#[should_panic(expected = "internal error")]
fn evaluating_a_node_twice_panics() {
    let (program, alloc) = parse("define one 1\ndefine main [ one ]");
    let mut loader: HashMap<String, String> = HashMap::new();
    let mut typer = Typer::new("main", alloc, &mut loader);
    typer.check_entry(&program).unwrap();
    let _ = triage::triage(&mut typer, &program.items[0]);
}
