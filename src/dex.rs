//! Android DEX extraction: string table, type descriptors, method names.
//!
//! The parser reads only the three id tables it needs, with bounds-checked
//! access throughout. Short reads and bad offsets produce `Format` error
//! values that the caller degrades on; nothing here panics on hostile input.

use crate::error::SnifferError;
use crate::features::Feature;

const HEADER_LEN: usize = 0x70;
const STRING_IDS_SIZE_OFF: usize = 0x38;
const STRING_IDS_OFF_OFF: usize = 0x3c;
const TYPE_IDS_SIZE_OFF: usize = 0x40;
const TYPE_IDS_OFF_OFF: usize = 0x44;
const METHOD_IDS_SIZE_OFF: usize = 0x58;
const METHOD_IDS_OFF_OFF: usize = 0x5c;

/// Cap on emitted features; huge DEX files abort early rather than balloon.
const DEX_FEATURE_CAP: usize = 50_000;

fn read_u32(data: &[u8], off: usize) -> Result<u32, SnifferError> {
    data.get(off..off + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| SnifferError::Format(format!("dex: short read at offset {}", off)))
}

/// Read a ULEB128 value, returning (value, bytes consumed).
fn read_uleb128(data: &[u8], off: usize) -> Option<(u32, usize)> {
    let mut result: u32 = 0;
    let mut shift = 0;
    for (i, &b) in data.get(off..)?.iter().enumerate().take(5) {
        result |= u32::from(b & 0x7f) << shift;
        if b & 0x80 == 0 {
            return Some((result, i + 1));
        }
        shift += 7;
    }
    None
}

/// MUTF-8 string data at the given offset: uleb128 utf16 length, then
/// modified-UTF-8 bytes terminated by NUL.
fn read_string_data(data: &[u8], off: usize) -> Option<String> {
    let (_utf16_len, consumed) = read_uleb128(data, off)?;
    let start = off + consumed;
    let rest = data.get(start..)?;
    let end = rest.iter().position(|&b| b == 0)?;
    Some(String::from_utf8_lossy(&rest[..end]).into_owned())
}

/// `Lcom/foo/Bar;` -> `com.foo.Bar`; other descriptors pass through None.
fn dotted_class_name(descriptor: &str) -> Option<String> {
    let inner = descriptor.strip_prefix('L')?.strip_suffix(';')?;
    Some(inner.replace('/', "."))
}

struct DexTables {
    strings: Vec<String>,
    type_indices: Vec<u32>,
    method_name_indices: Vec<u32>,
}

fn parse_tables(data: &[u8]) -> Result<DexTables, SnifferError> {
    if data.len() < HEADER_LEN || !data.starts_with(b"dex\n") {
        return Err(SnifferError::Format("dex: invalid magic".to_string()));
    }

    let string_ids_size = read_u32(data, STRING_IDS_SIZE_OFF)? as usize;
    let string_ids_off = read_u32(data, STRING_IDS_OFF_OFF)? as usize;
    let type_ids_size = read_u32(data, TYPE_IDS_SIZE_OFF)? as usize;
    let type_ids_off = read_u32(data, TYPE_IDS_OFF_OFF)? as usize;
    let method_ids_size = read_u32(data, METHOD_IDS_SIZE_OFF)? as usize;
    let method_ids_off = read_u32(data, METHOD_IDS_OFF_OFF)? as usize;

    let mut strings = Vec::with_capacity(string_ids_size.min(DEX_FEATURE_CAP));
    for i in 0..string_ids_size.min(DEX_FEATURE_CAP) {
        let data_off = read_u32(data, string_ids_off + i * 4)? as usize;
        match read_string_data(data, data_off) {
            Some(s) => strings.push(s),
            None => {
                return Err(SnifferError::Format(format!(
                    "dex: truncated string data at index {}",
                    i
                )))
            }
        }
    }

    let mut type_indices = Vec::with_capacity(type_ids_size.min(DEX_FEATURE_CAP));
    for i in 0..type_ids_size.min(DEX_FEATURE_CAP) {
        type_indices.push(read_u32(data, type_ids_off + i * 4)?);
    }

    let mut method_name_indices = Vec::with_capacity(method_ids_size.min(DEX_FEATURE_CAP));
    for i in 0..method_ids_size.min(DEX_FEATURE_CAP) {
        // method_id_item: class_idx u16, proto_idx u16, name_idx u32
        method_name_indices.push(read_u32(data, method_ids_off + i * 8 + 4)?);
    }

    Ok(DexTables {
        strings,
        type_indices,
        method_name_indices,
    })
}

/// Extract features from a DEX file: the string table, type names (raw and
/// dotted), and method names.
pub fn extract_dex(data: &[u8], source: Option<&str>) -> Result<Vec<Feature>, SnifferError> {
    let tables = parse_tables(data)?;
    let mut out = Vec::new();

    let push = |out: &mut Vec<Feature>, text: &str| {
        if out.len() >= DEX_FEATURE_CAP || text.is_empty() {
            return;
        }
        match source {
            Some(src) => out.push(Feature::with_source(text, src)),
            None => out.push(Feature::new(text)),
        }
    };

    for s in &tables.strings {
        push(&mut out, s);
    }
    for &idx in &tables.type_indices {
        if let Some(descriptor) = tables.strings.get(idx as usize) {
            push(&mut out, descriptor);
            if let Some(dotted) = dotted_class_name(descriptor) {
                push(&mut out, &dotted);
            }
        }
    }
    for &idx in &tables.method_name_indices {
        if let Some(name) = tables.strings.get(idx as usize) {
            push(&mut out, name);
        }
    }

    Ok(out)
}
