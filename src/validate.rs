//! Pattern validation at signature ingest time.
//!
//! # Performance Optimizations
//!
//! ## PHF (Perfect Hash Function) - O(1) stop-set lookup
//! The curated stop-set of generic programming tokens and the primitive type
//! names are compile-time perfect hash sets; a rejected pattern costs two
//! O(1) probes plus a character scan.
//!
//! Validation runs exactly once, at import. Matching never re-validates.

use phf::phf_set;

/// Curated stop-set of generic programming tokens. A pattern that is exactly
/// one of these would hit practically every binary on earth.
///
/// Shared with the feature normalizer, which drops the same tokens from the
/// extracted side (unless they carry an underscore or non-ASCII bytes).
pub static STOP_TOKENS: phf::Set<&'static str> = phf_set! {
    // Generic nouns and verbs
    "init", "process", "buffer", "data", "error", "config", "test", "path",
    "bool", "exit", "copy", "create", "delete", "insert", "remove", "update",
    "value", "values", "item", "items", "node", "nodes", "list", "array",
    "string", "number", "object", "result", "status", "state", "flag", "flags",
    "count", "index", "size", "length", "offset", "start", "stop", "begin",
    "first", "last", "next", "prev", "parent", "child", "input", "output",
    "stream", "file", "files", "line", "lines", "word", "words", "char",
    "chars", "byte", "bytes", "block", "chunk", "page", "cache", "pool",
    "queue", "stack", "heap", "table", "hash", "key", "keys", "lock", "mutex",
    "thread", "task", "event", "timer", "clock", "time", "date", "version",
    "debug", "info", "warn", "trace", "print", "dump", "load", "save", "store",
    "fetch", "push", "peek", "clear", "reset", "check", "verify", "parse",
    "format", "encode", "decode", "compress", "util", "utils", "helper",
    "common", "core", "base", "type", "types", "class", "struct", "enum",
    "const", "static", "public", "private", "true", "false", "null", "none",
    // C stdlib function names
    "malloc", "calloc", "realloc", "free", "memcpy", "memset", "memmove",
    "memcmp", "strcpy", "strncpy", "strcat", "strncat", "strcmp", "strncmp",
    "strlen", "strchr", "strstr", "printf", "sprintf", "fprintf", "snprintf",
    "scanf", "sscanf", "fopen", "fclose", "fread", "fwrite", "fseek", "ftell",
    "fflush", "getenv", "setenv", "abort", "atexit", "signal", "raise",
    "open", "close", "read", "write", "main",
};

/// Primitive type names, rejected outright.
static PRIMITIVE_TYPES: phf::Set<&'static str> = phf_set! {
    "int8", "int16", "int32", "int64", "uint8", "uint16", "uint32", "uint64",
    "float32", "float64", "size_t", "ssize_t", "wchar_t", "intptr_t",
    "uintptr_t", "int8_t", "int16_t", "int32_t", "int64_t", "uint8_t",
    "uint16_t", "uint32_t", "uint64_t",
};

/// Reject patterns too generic to be useful. Returns the rejection reason.
///
/// Rules:
/// - minimum length 6, relaxed to 4 for library prefixes ending in `_`
///   (so `av_` stays out but `avio_` gets in);
/// - no stop-set tokens, no primitive type names;
/// - no bare all-lowercase-letters words (no `_`, `/`, `:`, digit or mixed
///   case anywhere means the token matches ordinary prose).
pub fn validate_pattern(text: &str) -> Result<(), &'static str> {
    if text.ends_with('_') {
        if text.len() < 4 {
            return Err("prefix pattern shorter than 4 characters");
        }
    } else if text.len() < 6 {
        return Err("shorter than 6 characters");
    }

    let lower = text.to_lowercase();
    if STOP_TOKENS.contains(lower.as_str()) {
        return Err("generic stop-set token");
    }
    if PRIMITIVE_TYPES.contains(lower.as_str()) {
        return Err("primitive type name");
    }
    if !text.is_empty() && text.chars().all(|c| c.is_ascii_lowercase()) {
        return Err("bare lowercase word");
    }

    Ok(())
}

/// Accepted patterns keep their source confidence, clipped to [0.5, 1.0].
pub fn clip_confidence(confidence: f64) -> f64 {
    confidence.clamp(0.5, 1.0)
}
