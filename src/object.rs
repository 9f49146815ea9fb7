//! Symbol extraction from structured binary containers.
//!
//! Parses ELF, PE, Mach-O (thin and fat) and ar static libraries with
//! goblin and enumerates dynamic symbols, import/export tables, linked
//! library names and section names. Symbol names are emitted verbatim; C++
//! mangled forms additionally get a shallow demangling (leading `_Z`/`__Z`
//! segment split). Full Itanium demangling is out of scope.
//!
//! A parse failure is a `Format` error value; the caller degrades to the
//! plain string scan instead of unwinding.

use crate::error::SnifferError;
use crate::features::Feature;
use goblin::mach::{Mach, MachO, SingleArch};
use goblin::Object;

fn push(out: &mut Vec<Feature>, text: &str, source: Option<&str>) {
    if text.is_empty() {
        return;
    }
    match source {
        Some(src) => out.push(Feature::with_source(text, src)),
        None => out.push(Feature::new(text)),
    }
}

/// Shallow Itanium demangling: split `_ZN3foo3barEv` into `foo::bar` plus
/// its segments. Returns None for names that are not length-prefixed.
pub fn demangle_shallow(name: &str) -> Option<Vec<String>> {
    let rest = name.strip_prefix("__Z").or_else(|| name.strip_prefix("_Z"))?;
    let bytes = rest.as_bytes();
    let mut i = usize::from(bytes.first() == Some(&b'N'));
    let mut parts: Vec<String> = Vec::new();
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        let mut len = 0usize;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            len = len * 10 + (bytes[i] - b'0') as usize;
            i += 1;
        }
        if len == 0 || i + len > bytes.len() {
            break;
        }
        parts.push(rest[i..i + len].to_string());
        i += len;
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts)
    }
}

fn push_symbol(out: &mut Vec<Feature>, name: &str, source: Option<&str>) {
    push(out, name, source);
    if let Some(parts) = demangle_shallow(name) {
        push(out, &parts.join("::"), source);
        for part in parts {
            push(out, &part, source);
        }
    }
}

fn extract_elf(elf: &goblin::elf::Elf, source: Option<&str>, out: &mut Vec<Feature>) {
    for sym in elf.dynsyms.iter() {
        if let Some(name) = elf.dynstrtab.get_at(sym.st_name) {
            push_symbol(out, name, source);
        }
    }
    for sym in elf.syms.iter() {
        if let Some(name) = elf.strtab.get_at(sym.st_name) {
            push_symbol(out, name, source);
        }
    }
    for lib in &elf.libraries {
        push(out, lib, source);
    }
    for sh in &elf.section_headers {
        if let Some(name) = elf.shdr_strtab.get_at(sh.sh_name) {
            push(out, name, source);
        }
    }
}

fn extract_pe(pe: &goblin::pe::PE, source: Option<&str>, out: &mut Vec<Feature>) {
    for import in &pe.imports {
        push_symbol(out, &import.name, source);
        push(out, import.dll, source);
    }
    for export in &pe.exports {
        if let Some(name) = export.name {
            push_symbol(out, name, source);
        }
    }
    for lib in &pe.libraries {
        push(out, lib, source);
    }
    for section in &pe.sections {
        if let Ok(name) = section.name() {
            push(out, name, source);
        }
    }
}

fn extract_macho(macho: &MachO, source: Option<&str>, out: &mut Vec<Feature>) {
    for (name, _nlist) in macho.symbols().flatten() {
        push_symbol(out, name, source);
    }
    for lib in &macho.libs {
        push(out, lib, source);
    }
    for segment in &macho.segments {
        if let Ok(sections) = segment.sections() {
            for (section, _data) in sections {
                if let Ok(name) = section.name() {
                    push(out, name, source);
                }
            }
        }
    }
}

fn extract_archive(
    archive: &goblin::archive::Archive,
    data: &[u8],
    out: &mut Vec<Feature>,
) {
    let mut members: Vec<&str> = archive.members();
    members.sort_unstable();
    for member in members {
        let annotation = format!("member:{}", member);
        let Ok(member_data) = archive.extract(member, data) else {
            continue;
        };
        match Object::parse(member_data) {
            Ok(Object::Elf(elf)) => extract_elf(&elf, Some(&annotation), out),
            Ok(Object::Mach(Mach::Binary(macho))) => extract_macho(&macho, Some(&annotation), out),
            Ok(Object::PE(pe)) => extract_pe(&pe, Some(&annotation), out),
            _ => {
                // Unparseable member objects still contribute their strings
                for feat in crate::strings::scan_strings(member_data, Some(&annotation)) {
                    out.push(feat);
                }
            }
        }
    }
}

/// Extract symbol features from a structured binary container.
pub fn extract_object(data: &[u8], source: Option<&str>) -> Result<Vec<Feature>, SnifferError> {
    let mut out = Vec::new();
    match Object::parse(data)? {
        Object::Elf(elf) => extract_elf(&elf, source, &mut out),
        Object::PE(pe) => extract_pe(&pe, source, &mut out),
        Object::Mach(Mach::Binary(macho)) => extract_macho(&macho, source, &mut out),
        Object::Mach(Mach::Fat(multi)) => {
            for i in 0..multi.narches {
                // Archive slices inside fat files are not mapped here; only
                // Mach-O arches contribute symbols.
                if let Ok(SingleArch::MachO(macho)) = multi.get(i) {
                    extract_macho(&macho, source, &mut out);
                }
            }
        }
        Object::Archive(archive) => extract_archive(&archive, data, &mut out),
        _ => {
            return Err(SnifferError::Format(
                "unrecognized object container".to_string(),
            ))
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demangle_shallow_namespaced() {
        let parts = demangle_shallow("_ZN4absl12StrSplitImplEv").unwrap();
        assert_eq!(parts, vec!["absl", "StrSplitImpl"]);
    }

    #[test]
    fn test_demangle_shallow_plain() {
        let parts = demangle_shallow("_Z10png_createv").unwrap();
        assert_eq!(parts, vec!["png_create"]);
    }

    #[test]
    fn test_demangle_rejects_unmangled() {
        assert!(demangle_shallow("png_create_read_struct").is_none());
        assert!(demangle_shallow("_Zxx").is_none());
    }

    #[test]
    fn test_malformed_container_is_format_error() {
        let result = extract_object(b"\x7fELF", None);
        assert!(matches!(result, Err(SnifferError::Format(_))));
    }

    #[test]
    fn test_minimal_elf_parses_with_no_symbols() {
        // 64-byte ELF64 little-endian header, no sections, no programs
        let mut elf = vec![0u8; 64];
        elf[..4].copy_from_slice(b"\x7fELF");
        elf[4] = 2; // ELFCLASS64
        elf[5] = 1; // little endian
        elf[6] = 1; // EV_CURRENT
        elf[16] = 2; // ET_EXEC
        elf[18] = 0x3e; // EM_X86_64
        elf[20] = 1; // e_version
        elf[52] = 64; // e_ehsize
        let feats = extract_object(&elf, None).unwrap();
        assert!(feats.is_empty());
    }
}
