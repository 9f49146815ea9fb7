//! Source-code feature extraction.
//!
//! Regex-driven per-language tables pull out function names, type names,
//! import targets and constant identifiers. The tables are lazy singletons;
//! matching is a single pass per rule. An external tag generator could
//! replace this path, but the regex tables are the portable default.

use crate::detect::SourceLang;
use crate::features::Feature;
use once_cell::sync::Lazy;
use regex::Regex;

fn build(rules: &[&str]) -> Vec<Regex> {
    rules
        .iter()
        .map(|r| Regex::new(r).expect("language rule regex"))
        .collect()
}

static C_RULES: Lazy<Vec<Regex>> = Lazy::new(|| {
    build(&[
        r"#define\s+([A-Za-z_]\w*)",
        r"#include\s+[<\x22]([^>\x22]+)[>\x22]",
        r"\b(?:class|struct|enum|union)\s+([A-Za-z_]\w*)",
        r"(?m)^[A-Za-z_][\w\s\*]*?\b([A-Za-z_]\w*)\s*\([^;{}]*\)\s*\{",
        r"\btypedef\s+.*?\b([A-Za-z_]\w*)\s*;",
    ])
});

static PYTHON_RULES: Lazy<Vec<Regex>> = Lazy::new(|| {
    build(&[
        r"(?m)^\s*def\s+(\w+)",
        r"(?m)^\s*class\s+(\w+)",
        r"(?m)^\s*from\s+([\w\.]+)\s+import",
        r"(?m)^\s*import\s+([\w\.]+)",
        r"(?m)^([A-Z][A-Z0-9_]{3,})\s*=",
    ])
});

static JS_RULES: Lazy<Vec<Regex>> = Lazy::new(|| {
    build(&[
        r"\bfunction\s+(\w+)",
        r"\bclass\s+(\w+)",
        r"\b(?:interface|enum)\s+(\w+)",
        r"(?m)^\s*(?:export\s+)?(?:const|let|var)\s+([A-Z][A-Z0-9_]+)\s*=",
        r#"\bimport\s+[^;]*?from\s+['\x22]([^'\x22]+)['\x22]"#,
        r#"\brequire\(\s*['\x22]([^'\x22]+)['\x22]"#,
    ])
});

static JAVA_RULES: Lazy<Vec<Regex>> = Lazy::new(|| {
    build(&[
        r"\b(?:class|interface|enum|record)\s+(\w+)",
        r"(?m)^\s*import\s+(?:static\s+)?([\w\.]+)\s*;",
        r"\bstatic\s+final\s+\w+\s+([A-Z]\w*)",
        r"\bfun\s+(\w+)",
        r"\bobject\s+(\w+)",
        r"\bconst\s+val\s+(\w+)",
    ])
});

static GO_RULES: Lazy<Vec<Regex>> = Lazy::new(|| {
    build(&[
        r"\bfunc\s+(?:\([^)]*\)\s*)?(\w+)\s*\(",
        r"\btype\s+(\w+)\s+(?:struct|interface)",
        r#"\bimport\s+(?:\w+\s+)?\x22([^\x22]+)\x22"#,
        r#"(?m)^\s*\x22([\w\./\-]+)\x22\s*$"#,
        r"\bconst\s+([A-Z]\w*)",
    ])
});

static RUST_RULES: Lazy<Vec<Regex>> = Lazy::new(|| {
    build(&[
        r"\bfn\s+(\w+)",
        r"\b(?:struct|enum|trait)\s+(\w+)",
        r"\buse\s+([\w:]+)",
        r"\bconst\s+([A-Z]\w*)\s*:",
        r"\bimpl(?:<[^>]*>)?\s+(\w+)",
    ])
});

static CSHARP_RULES: Lazy<Vec<Regex>> = Lazy::new(|| {
    build(&[
        r"\b(?:class|interface|struct|enum|record)\s+(\w+)",
        r"(?m)^\s*using\s+([\w\.]+)\s*;",
        r"\bconst\s+\w+\s+(\w+)",
        r"\bnamespace\s+([\w\.]+)",
    ])
});

static SWIFT_RULES: Lazy<Vec<Regex>> = Lazy::new(|| {
    build(&[
        r"\bfunc\s+(\w+)",
        r"\b(?:class|struct|enum|protocol|extension)\s+(\w+)",
        r"(?m)^\s*import\s+(\w+)",
        r"\blet\s+([A-Z]\w*)\s*=",
    ])
});

static RUBY_RULES: Lazy<Vec<Regex>> = Lazy::new(|| {
    build(&[
        r"(?m)^\s*def\s+([\w?!]+)",
        r"(?m)^\s*(?:class|module)\s+([A-Z][\w:]*)",
        r#"\brequire(?:_relative)?\s+['\x22]([^'\x22]+)['\x22]"#,
        r"(?m)^\s*([A-Z][A-Z0-9_]{3,})\s*=",
    ])
});

static PHP_RULES: Lazy<Vec<Regex>> = Lazy::new(|| {
    build(&[
        r"\bfunction\s+(\w+)",
        r"\b(?:class|interface|trait)\s+(\w+)",
        r"(?m)^\s*use\s+([\w\\]+)",
        r#"\bdefine\(\s*['\x22](\w+)['\x22]"#,
    ])
});

static OBJC_RULES: Lazy<Vec<Regex>> = Lazy::new(|| {
    build(&[
        r"@(?:interface|implementation|protocol)\s+(\w+)",
        r"#import\s+[<\x22]([^>\x22]+)[>\x22]",
        r"#define\s+([A-Za-z_]\w*)",
    ])
});

fn rules_for(lang: SourceLang) -> &'static [Regex] {
    match lang {
        SourceLang::C | SourceLang::Cpp => &C_RULES,
        SourceLang::Python => &PYTHON_RULES,
        SourceLang::JavaScript | SourceLang::TypeScript => &JS_RULES,
        SourceLang::Java | SourceLang::Kotlin => &JAVA_RULES,
        SourceLang::Go => &GO_RULES,
        SourceLang::Rust => &RUST_RULES,
        SourceLang::CSharp => &CSHARP_RULES,
        SourceLang::Swift => &SWIFT_RULES,
        SourceLang::Ruby => &RUBY_RULES,
        SourceLang::Php => &PHP_RULES,
        SourceLang::ObjC => &OBJC_RULES,
    }
}

/// Extract identifier features from source text. Rule order then match
/// order keeps the output deterministic for fixed input.
pub fn extract_source(data: &[u8], lang: SourceLang, source: Option<&str>) -> Vec<Feature> {
    let text = String::from_utf8_lossy(data);
    let mut out = Vec::new();
    for rule in rules_for(lang) {
        for caps in rule.captures_iter(&text) {
            if let Some(m) = caps.get(1) {
                let ident = m.as_str();
                if ident.is_empty() {
                    continue;
                }
                match source {
                    Some(src) => out.push(Feature::with_source(ident, src)),
                    None => out.push(Feature::new(ident)),
                }
            }
        }
    }
    out
}
