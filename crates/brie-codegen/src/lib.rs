//! JavaScript code generation for Brie.
//!
//! [`JsCompiler`] is the second implementation of the traversal protocol.
//! It walks exactly the trees the type backend walked: every file's
//! top-level lines, the lines of `main`, and (on demand, at the first call
//! site that completes it) every cached specialization of every closure.
//! Each node's JavaScript expression is kept in a side table keyed by its
//! generic.
//!
//! ## Output layout
//!
//! ```text
//! runtime (closures, builtins, __unit)
//! global_functions["<closure>"]["<key>"] = function (captures..., params...) {...};
//! var <file>$<name> = ...;        one per top-level definition, per file
//! function main() {...}
//! main();
//! ```

pub mod mangle;

use std::fmt::Write;

use rustc_hash::FxHashMap;

use brie_common::{GenericId, Span};
use brie_parser::{Binder, Field, Node, NodeKind, Token, TokenKind};
use brie_typeck::builtins::Builtin;
use brie_typeck::error::TypeError;
use brie_typeck::phonebook::{Expansion, LookupMode, Phonebook, PhonebookHost};
use brie_typeck::triage::{self, Arm, Backend, TriageResult};
use brie_typeck::ty::{Callee, Ty};
use brie_typeck::typer::CheckedFile;
use brie_typeck::TypeckResult;

/// The runtime every generated program starts with.
pub const RUNTIME: &str = include_str!("runtime.js");

/// Compile an analyzed program to a standalone JavaScript file.
pub fn compile(result: TypeckResult) -> Result<String, TypeError> {
    let TypeckResult {
        entry,
        files,
        types,
        phonebook,
        main_index,
        ..
    } = result;
    let mut compiler = JsCompiler::new(phonebook, types);

    let mut toplevel = String::new();
    let mut main = String::new();
    for file in &files {
        let entry_main = (file.name == entry).then_some(main_index);
        let saved = compiler.phonebook.enter_file(&file.name);
        let compiled = compiler.compile_file(file, entry_main);
        compiler.phonebook.restore_file(saved);
        let (definitions, main_js) = compiled?;
        toplevel.push_str(&definitions);
        if let Some(js) = main_js {
            main = js;
        }
    }

    let mut out = String::from(RUNTIME);
    out.push('\n');
    out.push_str(&compiler.specializations());
    out.push_str(&toplevel);
    out.push('\n');
    out.push_str(&main);
    out.push_str("\nmain();\n");
    tracing::debug!(bytes = out.len(), "generated javascript");
    Ok(out)
}

/// A JavaScript string literal.
fn js_string(text: &str) -> String {
    serde_json::Value::from(text).to_string()
}

/// Lines as one expression: their values in order, the last one kept.
fn sequence(lines: &[String]) -> String {
    match lines {
        [] => "__unit".to_string(),
        [line] => line.clone(),
        lines => format!("({})", lines.join(", ")),
    }
}

pub struct JsCompiler {
    phonebook: Phonebook,
    types: FxHashMap<GenericId, Ty>,
    compiled: FxHashMap<GenericId, String>,
    /// Compiled specialization bodies keyed by the generic of the body
    /// copy. Empty while a body is being compiled.
    bodies: FxHashMap<GenericId, String>,
}

impl JsCompiler {
    pub fn new(phonebook: Phonebook, types: FxHashMap<GenericId, Ty>) -> Self {
        JsCompiler {
            phonebook,
            types,
            compiled: FxHashMap::default(),
            bodies: FxHashMap::default(),
        }
    }

    fn set(&mut self, node: &Node, js: String) -> TriageResult {
        self.compiled.insert(node.generic.id, js);
        Ok(())
    }

    fn js(&self, node: &Node) -> &str {
        match self.compiled.get(&node.generic.id) {
            Some(js) => js,
            None => panic!("internal error: node {} was never compiled", node.generic),
        }
    }

    fn ty(&self, node: &Node) -> &Ty {
        match self.types.get(&node.generic.id) {
            Some(ty) => ty,
            None => panic!("internal error: node {} has no type", node.generic),
        }
    }

    fn lines<'n>(&self, lines: impl IntoIterator<Item = &'n Node>) -> String {
        let lines: Vec<String> = lines.into_iter().map(|line| self.js(line).to_string()).collect();
        sequence(&lines)
    }

    // ── Files ───────────────────────────────────────────────────────────

    /// Top-level definitions of one file: functions first, since creating
    /// a closure has no effects, then every other definition in order.
    /// For the entry file also returns `main`.
    fn compile_file(&mut self, file: &CheckedFile, main: Option<usize>) -> Result<(String, Option<String>), TypeError> {
        let items = &file.program.items;
        for item in items {
            triage::triage(self, item)?;
        }
        let mut out = format!("// {}\n", file.name);
        let definitions = self
            .phonebook
            .toplevel_functions(&file.name)
            .chain(self.phonebook.toplevel_extras(&file.name));
        for definition in definitions {
            match self.compiled.get(&definition.node) {
                Some(js) => {
                    let _ = writeln!(out, "{js}");
                }
                None => panic!("internal error: definition `{}` was never compiled", definition.name),
            }
        }
        tracing::debug!(file = %file.name, "compiled file");
        let main = match main {
            Some(index) => Some(self.compile_main(&items[index])?),
            None => None,
        };
        Ok((out, main))
    }

    fn compile_main(&mut self, item: &Node) -> Result<String, TypeError> {
        let lines = match item.parens() {
            Some([_, _, value]) => match &value.kind {
                NodeKind::Block { children, .. } => children.as_slice(),
                _ => &[],
            },
            _ => &[],
        };
        triage::lines(self, lines)?;
        let mut out = String::from("function main() {\n");
        for line in lines {
            let _ = writeln!(out, "  {};", self.js(line));
        }
        out.push('}');
        Ok(out)
    }

    // ── Specializations ─────────────────────────────────────────────────

    /// Compile the bodies a complete call of `callee` may run.
    fn reach(&mut self, callee: &Callee, arguments: &[Ty]) -> TriageResult {
        let Callee::Closures(closures) = callee else {
            return Ok(());
        };
        Phonebook::lookup_function(self, closures, arguments, LookupMode::Fetch, |compiler, expansion| {
            compiler.compile_body(expansion, arguments)
        })?;
        Ok(())
    }

    fn compile_body(&mut self, expansion: Expansion, arguments: &[Ty]) -> TriageResult {
        let Expansion { id, body, .. } = expansion;
        if self.bodies.contains_key(&body.generic.id) {
            return Ok(());
        }
        self.bodies.insert(body.generic.id, String::new());
        let NodeKind::Block {
            arguments: params,
            children,
        } = &body.kind
        else {
            panic!("internal error: closure {id} is not a block");
        };

        self.phonebook.enter();
        for (param, ty) in params.iter().zip(arguments) {
            self.phonebook.bind(&param.name, ty.clone());
        }
        let result = triage::lines(self, children);
        self.phonebook.exit();
        result?;

        let names: Vec<String> = self
            .phonebook
            .lookup_found(id)
            .iter()
            .map(String::as_str)
            .chain(params.iter().map(|param| param.name.as_str()))
            .map(mangle::local)
            .collect();
        let js = format!(
            "function ({}) {{\n  return {};\n}}",
            names.join(", "),
            self.lines(children)
        );
        tracing::debug!(closure = %id, key = %Ty::key(arguments), "compiled specialization");
        self.bodies.insert(body.generic.id, js);
        Ok(())
    }

    /// Every specialization the phonebook holds, grouped by closure.
    fn specializations(&self) -> String {
        let mut out = String::new();
        let mut current = None;
        for (function, specialization) in self.phonebook.each_expansion() {
            let id = js_string(&function.id.0.to_string());
            if current != Some(function.id) {
                let _ = writeln!(out, "global_functions[{id}] = {{}};");
                current = Some(function.id);
            }
            let key = Ty::key(&specialization.arguments);
            let body = match self.bodies.get(&specialization.body.generic.id) {
                Some(body) if !body.is_empty() => body,
                _ => panic!(
                    "internal error: specialization ({key}) of closure {} was never compiled",
                    function.id
                ),
            };
            let _ = writeln!(out, "global_functions[{id}][{}] = {body};", js_string(&key));
        }
        out
    }

    /// JavaScript for a name in the current scope.
    fn reference(&mut self, name: &str) -> String {
        if self.phonebook.lookup(name).is_some() {
            return mangle::local(name);
        }
        if self.phonebook.lookup_toplevel(name).is_some() {
            return mangle::toplevel(self.phonebook.file(), name);
        }
        match Builtin::from_name(name) {
            Some(builtin) => format!("__builtins[{}]", js_string(builtin.name())),
            None => panic!("internal error: `{name}` does not resolve"),
        }
    }
}

impl PhonebookHost for JsCompiler {
    fn phonebook(&mut self) -> &mut Phonebook {
        &mut self.phonebook
    }
}

impl Backend for JsCompiler {
    fn before(&mut self, node: &Node) {
        if self.compiled.contains_key(&node.generic.id) {
            panic!("internal error: node {} was compiled twice", node.generic);
        }
    }

    fn handle_token(&mut self, node: &Node, token: &Token) -> TriageResult {
        let js = match token.kind {
            TokenKind::Integer => token.data.clone(),
            TokenKind::Str => js_string(&token.data),
            TokenKind::Ident => self.reference(&token.data),
        };
        self.set(node, js)
    }

    fn handle_true(&mut self, node: &Node) -> TriageResult {
        self.set(node, "true".to_string())
    }

    fn handle_false(&mut self, node: &Node) -> TriageResult {
        self.set(node, "false".to_string())
    }

    fn handle_unit(&mut self, node: &Node) -> TriageResult {
        self.set(node, "__unit".to_string())
    }

    fn handle_define(&mut self, node: &Node, name: &Node, value: &Node) -> TriageResult {
        let name = mangle::toplevel(self.phonebook.file(), name.ident().unwrap_or_default());
        let js = format!("var {name} = {};", self.js(value));
        self.set(node, js)
    }

    fn enter_let(&mut self, _node: &Node, name: &Binder, value: &Node) -> TriageResult {
        let ty = self.ty(value).clone();
        self.phonebook.enter();
        self.phonebook.bind(&name.name, ty);
        Ok(())
    }

    fn exit_scope(&mut self) {
        self.phonebook.exit();
    }

    fn handle_let(&mut self, node: &Node, value: &Node, children: &[Node]) -> TriageResult {
        let NodeKind::LetIn { name, .. } = &node.kind else {
            unreachable!("handle_let on a non-let node");
        };
        let js = format!(
            "(({}) => {})({})",
            mangle::local(&name.name),
            self.lines(children),
            self.js(value)
        );
        self.set(node, js)
    }

    fn handle_function_call(&mut self, node: &Node, function: &Node, argument: Option<&Node>) -> TriageResult {
        let f = self.js(function).to_string();
        let Some(argument) = argument else {
            return self.set(node, f);
        };
        let Ty::Function {
            callee,
            arity,
            arguments,
        } = self.ty(function).clone()
        else {
            panic!("internal error: call of a non-function at {}", node.generic);
        };
        let arg = self.js(argument).to_string();
        let js = match arity {
            0 => {
                self.reach(&callee, &arguments)?;
                if matches!(&argument.kind, NodeKind::Parens(children) if children.is_empty()) {
                    format!("{f}.call()")
                } else {
                    format!("({arg}, {f}).call()")
                }
            }
            _ => {
                let argument_ty = self.ty(argument).clone();
                let key = js_string(&argument_ty.to_string());
                let partial = format!("{f}.partial({arg}, {key})");
                if arity == 1 {
                    let mut complete = arguments;
                    complete.push(argument_ty);
                    self.reach(&callee, &complete)?;
                    format!("{partial}.call()")
                } else {
                    partial
                }
            }
        };
        self.set(node, js)
    }

    fn handle_block(&mut self, node: &Node) -> TriageResult {
        let mut js = format!("new_closure({}", js_string(&node.generic.id.0.to_string()));
        for capture in self.phonebook.lookup_found(node.generic.id) {
            js.push_str(", ");
            js.push_str(&mangle::local(&capture));
        }
        js.push(')');
        self.set(node, js)
    }

    fn handle_object_literal(&mut self, node: &Node, fields: &[Field]) -> TriageResult {
        let fields: Vec<String> = fields
            .iter()
            .map(|field| format!("{}: {}", js_string(&field.name), self.js(&field.value)))
            .collect();
        self.set(node, format!("({{{}}})", fields.join(", ")))
    }

    fn handle_dot_access(&mut self, node: &Node, base: &Node, field: &str, _field_span: Span) -> TriageResult {
        let js = format!("{}[{}]", self.js(base), js_string(field));
        self.set(node, js)
    }

    fn handle_if(&mut self, node: &Node, condition: &Node, then: &[Node], otherwise: Option<&[Node]>) -> TriageResult {
        let then = self.lines(then);
        let js = match otherwise {
            Some(otherwise) => format!("({} ? {then} : {})", self.js(condition), self.lines(otherwise)),
            None => format!("({} ? ({then}, __unit) : __unit)", self.js(condition)),
        };
        self.set(node, js)
    }

    fn handle_while(&mut self, node: &Node, condition: &Node, body: &[Node]) -> TriageResult {
        let js = format!(
            "(() => {{ while ({}) {{ {}; }} return __unit; }})()",
            self.js(condition),
            self.lines(body)
        );
        self.set(node, js)
    }

    fn handle_update(&mut self, node: &Node, target: &Node, value: &Node) -> TriageResult {
        let js = format!("({} = {}, __unit)", self.js(target), self.js(value));
        self.set(node, js)
    }

    fn handle_type_check(&mut self, node: &Node, expr: &Node, _type_name: &Node) -> TriageResult {
        let js = self.js(expr).to_string();
        self.set(node, js)
    }

    fn enter_arm(&mut self, value: &Node, arm: &Arm<'_>) -> Result<bool, TypeError> {
        let arguments = match self.ty(value) {
            Ty::Variant(cases) => match cases.get(arm.tag) {
                Some(arguments) => arguments.clone(),
                None => return Ok(false),
            },
            _ => return Ok(false),
        };
        self.phonebook.enter();
        for (name, ty) in arm.binder_names().zip(arguments) {
            self.phonebook.bind(name, ty);
        }
        Ok(true)
    }

    fn handle_match(&mut self, node: &Node, value: &Node, arms: &[Arm<'_>]) -> TriageResult {
        let mut js = String::from("((__v) => { switch (__v.tag) {");
        for arm in arms {
            let body = self.lines(arm.body.iter().copied());
            let binders: Vec<String> = arm.binder_names().map(mangle::local).collect();
            let _ = write!(js, " case {}: return ", js_string(arm.tag));
            if binders.is_empty() {
                let _ = write!(js, "{body};");
            } else {
                let _ = write!(js, "(({}) => {body})(...__v.values);", binders.join(", "));
            }
        }
        let _ = write!(
            js,
            " default: throw new Error(\"no arm for \" + __v.tag); }} }})({})",
            self.js(value)
        );
        self.set(node, js)
    }

    fn handle_variant(&mut self, node: &Node, tag: &str, arguments: &[Node]) -> TriageResult {
        let values: Vec<&str> = arguments.iter().map(|arg| self.js(arg)).collect();
        let js = format!("({{tag: {}, values: [{}]}})", js_string(tag), values.join(", "));
        self.set(node, js)
    }

    fn handle_inlay(&mut self, node: &Node, text: &str) -> TriageResult {
        self.set(node, format!("(() => {{ {text}\nreturn __unit; }})()"))
    }

    fn handle_require(&mut self, node: &Node, module: &str) -> TriageResult {
        let fields: Vec<String> = self
            .phonebook
            .toplevel(module)
            .iter()
            .map(|definition| {
                format!(
                    "{}: {}",
                    js_string(&definition.name),
                    mangle::toplevel(module, &definition.name)
                )
            })
            .collect();
        let name = mangle::toplevel(self.phonebook.file(), module);
        self.set(node, format!("var {name} = {{{}}};", fields.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_keep_the_last_value() {
        assert_eq!(sequence(&[]), "__unit");
        assert_eq!(sequence(&["a".to_string()]), "a");
        assert_eq!(sequence(&["a".to_string(), "b".to_string()]), "(a, b)");
    }

    #[test]
    fn strings_are_escaped() {
        assert_eq!(js_string("say \"hi\""), r#""say \"hi\"""#);
    }
}
