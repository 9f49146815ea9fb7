//! File format dispatch.
//!
//! # Performance Optimizations
//!
//! ## Extension-First Dispatch after Magic - O(1)
//! The sniffer checks magic numbers first (a handful of prefix compares),
//! then falls back to an O(1) PHF extension lookup for source files and
//! archive flavors. Anything else non-empty is a generic binary.
//!
//! Extractor selection is final per file: the engine never re-sniffs after
//! extraction. Archive members are dispatched back through [`sniff`] by the
//! archive walker.

use phf::phf_map;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Source languages recognized by the source-code extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceLang {
    C,
    Cpp,
    Python,
    Java,
    Kotlin,
    Go,
    Rust,
    JavaScript,
    TypeScript,
    CSharp,
    Swift,
    Ruby,
    Php,
    ObjC,
}

/// Zip container flavor, decided by extension. Affects manifest parsing and
/// the native-context filter for single-binary wrappers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZipFlavor {
    Apk,
    Ipa,
    Jar,
    Wheel,
    Egg,
    Plain,
}

/// Everything the dispatcher can route to an extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Elf,
    Pe,
    MachO,
    MachOFat,
    ArLibrary,
    Dex,
    Zip(ZipFlavor),
    Tar,
    Gzip,
    Bzip2,
    Xz,
    Zstd,
    SevenZ,
    Rar,
    Rpm,
    Cpio,
    Msi,
    Xar,
    Dmg,
    Source(SourceLang),
    Binary,
    Empty,
}

impl FileKind {
    /// Stable tag for serialized results.
    pub fn tag(&self) -> &'static str {
        match self {
            FileKind::Elf => "elf",
            FileKind::Pe => "pe",
            FileKind::MachO => "macho",
            FileKind::MachOFat => "macho_fat",
            FileKind::ArLibrary => "ar_library",
            FileKind::Dex => "dex",
            FileKind::Zip(ZipFlavor::Apk) => "apk",
            FileKind::Zip(ZipFlavor::Ipa) => "ipa",
            FileKind::Zip(ZipFlavor::Jar) => "jar",
            FileKind::Zip(ZipFlavor::Wheel) => "wheel",
            FileKind::Zip(ZipFlavor::Egg) => "egg",
            FileKind::Zip(ZipFlavor::Plain) => "zip",
            FileKind::Tar => "tar",
            FileKind::Gzip => "gzip",
            FileKind::Bzip2 => "bzip2",
            FileKind::Xz => "xz",
            FileKind::Zstd => "zstd",
            FileKind::SevenZ => "7z",
            FileKind::Rar => "rar",
            FileKind::Rpm => "rpm",
            FileKind::Cpio => "cpio",
            FileKind::Msi => "msi",
            FileKind::Xar => "xar",
            FileKind::Dmg => "dmg",
            FileKind::Source(_) => "source",
            FileKind::Binary => "binary",
            FileKind::Empty => "empty",
        }
    }

    /// Native executable/object containers, used by the context filter.
    pub fn is_native_binary(&self) -> bool {
        matches!(
            self,
            FileKind::Elf | FileKind::Pe | FileKind::MachO | FileKind::MachOFat | FileKind::ArLibrary
        )
    }

    pub fn is_archive(&self) -> bool {
        matches!(
            self,
            FileKind::Zip(_)
                | FileKind::Tar
                | FileKind::Gzip
                | FileKind::Bzip2
                | FileKind::Xz
                | FileKind::Zstd
        )
    }
}

/// Extension -> source language. O(1) PHF lookup.
static SOURCE_EXT_MAP: phf::Map<&'static str, SourceLang> = phf_map! {
    ".c" => SourceLang::C,
    ".h" => SourceLang::C,
    ".cc" => SourceLang::Cpp,
    ".cpp" => SourceLang::Cpp,
    ".hpp" => SourceLang::Cpp,
    ".py" => SourceLang::Python,
    ".java" => SourceLang::Java,
    ".kt" => SourceLang::Kotlin,
    ".go" => SourceLang::Go,
    ".rs" => SourceLang::Rust,
    ".js" => SourceLang::JavaScript,
    ".ts" => SourceLang::TypeScript,
    ".cs" => SourceLang::CSharp,
    ".swift" => SourceLang::Swift,
    ".rb" => SourceLang::Ruby,
    ".php" => SourceLang::Php,
    ".m" => SourceLang::ObjC,
};

/// Extension -> zip flavor for PK containers.
static ZIP_FLAVOR_MAP: phf::Map<&'static str, ZipFlavor> = phf_map! {
    ".apk" => ZipFlavor::Apk,
    ".ipa" => ZipFlavor::Ipa,
    ".jar" => ZipFlavor::Jar,
    ".war" => ZipFlavor::Jar,
    ".aar" => ZipFlavor::Jar,
    ".whl" => ZipFlavor::Wheel,
    ".egg" => ZipFlavor::Egg,
    ".zip" => ZipFlavor::Plain,
};

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default()
}

fn starts_with(data: &[u8], magic: &[u8]) -> bool {
    data.len() >= magic.len() && &data[..magic.len()] == magic
}

/// Mach-O fat headers share the 0xcafebabe magic with Java class files.
/// A fat header stores a big-endian arch count that is always tiny, while a
/// class file stores its minor version there.
fn is_macho_fat(data: &[u8]) -> bool {
    if data.len() < 8 {
        return false;
    }
    let nfat = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    nfat > 0 && nfat < 0x20
}

/// Select the extractor for a file. Magic first, extension second, generic
/// binary as the last resort; a 0-byte input is `Empty`.
pub fn sniff(data: &[u8], path: &Path) -> FileKind {
    if data.is_empty() {
        return FileKind::Empty;
    }

    // Executables and objects
    if starts_with(data, b"\x7fELF") {
        return FileKind::Elf;
    }
    if starts_with(data, b"MZ") {
        return FileKind::Pe;
    }
    if starts_with(data, &[0xfe, 0xed, 0xfa, 0xce])
        || starts_with(data, &[0xfe, 0xed, 0xfa, 0xcf])
        || starts_with(data, &[0xce, 0xfa, 0xed, 0xfe])
        || starts_with(data, &[0xcf, 0xfa, 0xed, 0xfe])
    {
        return FileKind::MachO;
    }
    if starts_with(data, &[0xca, 0xfe, 0xba, 0xbe]) && is_macho_fat(data) {
        return FileKind::MachOFat;
    }
    if starts_with(data, b"!<arch>\n") {
        return FileKind::ArLibrary;
    }
    if starts_with(data, b"dex\n") {
        return FileKind::Dex;
    }

    // Archives and compressed streams
    if starts_with(data, b"PK\x03\x04") || starts_with(data, b"PK\x05\x06") {
        let flavor = ZIP_FLAVOR_MAP
            .get(extension_of(path).as_str())
            .copied()
            .unwrap_or(ZipFlavor::Plain);
        return FileKind::Zip(flavor);
    }
    if data.len() > 262 && &data[257..262] == b"ustar" {
        return FileKind::Tar;
    }
    if starts_with(data, &[0x1f, 0x8b]) {
        return FileKind::Gzip;
    }
    if starts_with(data, b"BZh") {
        return FileKind::Bzip2;
    }
    if starts_with(data, &[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
        return FileKind::Xz;
    }
    if starts_with(data, &[0x28, 0xb5, 0x2f, 0xfd]) {
        return FileKind::Zstd;
    }
    if starts_with(data, &[b'7', b'z', 0xbc, 0xaf, 0x27, 0x1c]) {
        return FileKind::SevenZ;
    }
    if starts_with(data, b"Rar!\x1a\x07") {
        return FileKind::Rar;
    }
    if starts_with(data, &[0xed, 0xab, 0xee, 0xdb]) {
        return FileKind::Rpm;
    }
    if starts_with(data, b"070701") || starts_with(data, b"070707") {
        return FileKind::Cpio;
    }

    // Installer wrappers, recognized but treated as opaque binaries
    if starts_with(data, &[0xd0, 0xcf, 0x11, 0xe0, 0xa1, 0xb1, 0x1a, 0xe1]) {
        return FileKind::Msi;
    }
    if starts_with(data, b"xar!") {
        return FileKind::Xar;
    }
    if data.len() > 512 && &data[data.len() - 512..data.len() - 508] == b"koly" {
        return FileKind::Dmg;
    }

    // Source files by extension
    if let Some(&lang) = SOURCE_EXT_MAP.get(extension_of(path).as_str()) {
        return FileKind::Source(lang);
    }

    FileKind::Binary
}
