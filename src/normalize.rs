//! Token normalization for decompiled code
//!
//! Decompiler output is littered with address-derived names (`sub_401000`,
//! `DAT_00402010`) and large literals that make otherwise identical code
//! fragments compare unequal. Normalization collapses that noise into a
//! small set of placeholder classes so n-gram windows from different
//! binaries can land on the same digest.

use regex::Regex;
use std::sync::OnceLock;

/// Sentinel token used to pad n-gram windows past function boundaries.
pub const PAD: &str = "??";

/// Numeric literals below this keep their exact value; everything at or
/// above collapses to a `<NUM_D>` width class.
const SMALL_LITERAL_LIMIT: u128 = 0x100;

/// Address-derived name prefixes emitted by IDA and Ghidra.
const ADDR_PREFIXES: &[&str] = &[
    // IDA
    "sub_", "loc_", "unk_", "off_", "asc_", "stru_", "funcs_", "byte_", "word_", "dword_",
    "qword_", "xmmword_", "ymmword_", "LABEL_",
    // Ghidra functions and goto labels
    "FUN_", "thunk_FUN_", "LAB_", "joined_r0x",
    // Ghidra data and code labels
    "DAT_", "_DAT_", "code_r0x", "uRam",
    // Ghidra switch labels
    "switchD_", "switchdataD_", "caseD_",
];

static GHIDRA_STACK: OnceLock<Regex> = OnceLock::new();
static GHIDRA_VAR: OnceLock<Regex> = OnceLock::new();
static ADDR_STRING: OnceLock<Regex> = OnceLock::new();
static ADDR_PTR: OnceLock<Regex> = OnceLock::new();
static HEX_NUM: OnceLock<Regex> = OnceLock::new();
static DEC_NUM: OnceLock<Regex> = OnceLock::new();

fn ghidra_stack() -> &'static Regex {
    GHIDRA_STACK.get_or_init(|| Regex::new(r"^[a-z]*Stack_[0-9]+$").expect("valid regex"))
}

fn ghidra_var() -> &'static Regex {
    GHIDRA_VAR.get_or_init(|| Regex::new(r"^[a-z]*Var[0-9]+$").expect("valid regex"))
}

fn addr_string() -> &'static Regex {
    ADDR_STRING.get_or_init(|| Regex::new(r"^s_[a-zA-Z0-9_]+[a-fA-F0-9]{8}$").expect("valid regex"))
}

fn addr_ptr() -> &'static Regex {
    ADDR_PTR.get_or_init(|| Regex::new(r"^PTR_[a-zA-Z0-9_]+[a-fA-F0-9]{8}$").expect("valid regex"))
}

fn hex_num() -> &'static Regex {
    HEX_NUM.get_or_init(|| Regex::new(r"^0x[0-9a-fA-F]+$").expect("valid regex"))
}

fn dec_num() -> &'static Regex {
    DEC_NUM.get_or_init(|| Regex::new(r"^[0-9]+$").expect("valid regex"))
}

/// If `tok` is a variable placeholder `@@NAME@@`, return NAME.
///
/// NAME is opaque, non-empty, and contains no `@`; placeholders are a
/// string contract shared with the hasher and are never normalized. The
/// corpus parser rejects tokens that wear the `@@...@@` envelope without
/// satisfying the NAME grammar.
pub fn placeholder_name(tok: &str) -> Option<&str> {
    tok.strip_prefix("@@")
        .and_then(|rest| rest.strip_suffix("@@"))
        .filter(|name| !name.is_empty() && !name.contains('@'))
}

/// Normalize a single raw token. First matching rule wins; the patterns are
/// mutually exclusive apart from prefixes vs. numerics, which cannot
/// overlap (prefixes start with a letter or underscore).
pub fn normalize_token(tok: &str) -> String {
    if placeholder_name(tok).is_some() {
        return tok.to_string();
    }
    if let Some(prefix) = ADDR_PREFIXES.iter().find(|p| tok.starts_with(**p)) {
        return format!("{prefix}XXX");
    }
    if tok.starts_with('"') && tok.ends_with('"') {
        return "<STRING>".to_string();
    }
    if ghidra_stack().is_match(tok) {
        return "<ghidra_stack>".to_string();
    }
    if ghidra_var().is_match(tok) {
        return "<ghidra_var>".to_string();
    }
    if addr_string().is_match(tok) || addr_ptr().is_match(tok) {
        // The trailing 8 hex chars are the symbol's address.
        return tok[..tok.len() - 8].to_string();
    }
    if hex_num().is_match(tok) {
        return normalize_hex(&tok[2..]);
    }
    if dec_num().is_match(tok) {
        if let Ok(v) = tok.parse::<u128>() {
            return normalize_value(v);
        }
        // Wider than 128 bits; no decompiler emits these, keep verbatim.
        return tok.to_string();
    }
    tok.to_string()
}

/// Normalize the hex digits of a `0x` literal of any width.
fn normalize_hex(digits: &str) -> String {
    let significant = digits.trim_start_matches('0');
    if significant.is_empty() {
        return "0x0".to_string();
    }
    if significant.len() > 16 {
        // Past u64 range, so certainly >= SMALL_LITERAL_LIMIT.
        return format!("<NUM_{}>", significant.len());
    }
    match u64::from_str_radix(significant, 16) {
        Ok(v) => normalize_value(v as u128),
        Err(_) => format!("0x{}", significant.to_ascii_lowercase()),
    }
}

fn normalize_value(v: u128) -> String {
    if v >= SMALL_LITERAL_LIMIT {
        format!("<NUM_{}>", format!("{v:x}").len())
    } else {
        format!("{v:#x}")
    }
}

/// Normalize a whole token sequence. With `full_strip`, every normalized
/// token outside the structural whitelist collapses to `?`; variable
/// placeholders always pass through untouched.
pub fn strip_tokens(tokens: &[String], full_strip: bool) -> Vec<String> {
    tokens
        .iter()
        .map(|tok| {
            if placeholder_name(tok).is_some() {
                return tok.clone();
            }
            let norm = normalize_token(tok);
            if full_strip && !keep_when_stripped(&norm) {
                "?".to_string()
            } else {
                norm
            }
        })
        .collect()
}

/// Tokens that survive full-strip mode: type keywords, control flow, and
/// punctuation/operators that carry code structure.
fn keep_when_stripped(tok: &str) -> bool {
    matches!(
        tok,
        "?" | "Number" | "String" | "L"
        // Type keywords
        | "__int8" | "__int16" | "__int32" | "__int64" | "LODWORD" | "const"
        | "_BYTE" | "_WORD" | "_DWORD" | "_QWORD"
        | "char" | "float" | "double" | "__fastcall" | "unsigned" | "void" | "int"
        // Control flow
        | "break" | "if" | "else" | "while" | "goto"
        // Punctuation and operators
        | "[" | "]" | "(" | ")" | "{" | "}"
        | "+" | "-" | "," | ";" | "*" | "*=" | "<" | ">" | "=" | "<=" | ">=" | "==" | "!="
        | "++" | "--" | "+=" | "-=" | "<<" | ">>" | "<<=" | ">>=" | "!"
        | "|" | "||" | "|=" | "&" | "&&" | "&=" | "/" | "/=" | "^" | "^=" | "%" | "%="
    )
}
