//! Brie names to JavaScript identifiers.
//!
//! Brie identifiers may contain `'`, `?` and `!`, and operator names are
//! made of punctuation. Word characters are kept, everything else becomes
//! `$` followed by the character's code in hex. A `$` never appears in a
//! Brie name, so mangled names cannot collide with `file$name` top-level
//! bindings or with the runtime's `__` helpers.

const RESERVED: &[&str] = &[
    "arguments", "await", "break", "case", "catch", "class", "const", "continue", "debugger",
    "default", "delete", "do", "else", "enum", "eval", "export", "extends", "false", "finally",
    "for", "function", "if", "implements", "import", "in", "instanceof", "interface", "let",
    "new", "null", "package", "private", "protected", "public", "return", "static", "super",
    "switch", "this", "throw", "true", "try", "typeof", "undefined", "var", "void", "while",
    "with", "yield", "main", "global_functions", "new_closure",
];

/// A local (parameter, `let`, capture or match binder) name.
pub fn local(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
        } else {
            out.push_str(&format!("${:x}", c as u32));
        }
    }
    let clashes = RESERVED.contains(&out.as_str())
        || out.starts_with("__")
        || out.starts_with(|c: char| c.is_ascii_digit());
    if clashes {
        out.insert(0, '$');
    }
    out
}

/// A top-level definition of `file`.
pub fn toplevel(file: &str, name: &str) -> String {
    format!("{}${}", local(file).trim_start_matches('$'), local(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_names_are_kept() {
        assert_eq!(local("counter"), "counter");
        assert_eq!(local("get_x"), "get_x");
    }

    #[test]
    fn punctuation_is_escaped() {
        assert_eq!(local("empty?"), "empty$3f");
        assert_eq!(local("x'"), "x$27");
        assert_eq!(local("<+>"), "$3c$2b$3e");
    }

    #[test]
    fn reserved_words_are_prefixed() {
        assert_eq!(local("new"), "$new");
        assert_eq!(local("__unit"), "$__unit");
    }

    #[test]
    fn toplevel_names_carry_the_file() {
        assert_eq!(toplevel("util", "double"), "util$double");
        assert_eq!(toplevel("main", "main"), "main$$main");
    }
}
