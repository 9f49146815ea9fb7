//! Extractor dispatch.
//!
//! One polymorphic operation: bytes plus a sniffed [`FileKind`] in, a flat
//! feature sequence out. Executables get both the structured symbol pass and
//! the plain string scan; archives expand through the walker; everything the
//! crate cannot parse degrades to strings. Format failures are values, not
//! unwinding: a malformed container never aborts the file, it just loses its
//! structured pass.

use crate::archive;
use crate::detect::{self, FileKind};
use crate::dex;
use crate::error::SnifferError;
use crate::features::Feature;
use crate::object;
use crate::options::{AnalysisOptions, Deadline};
use crate::source;
use crate::strings;
use std::path::Path;

/// Per-analysis archive statistics, used by the native-context filter.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveStats {
    pub members_total: usize,
    pub members_native: usize,
}

/// Raw extraction output, pre-normalization.
#[derive(Debug, Default)]
pub struct Extraction {
    pub features: Vec<Feature>,
    pub stats: ArchiveStats,
}

fn scan_with_object(data: &[u8], annotation: Option<&str>, out: &mut Vec<Feature>) {
    out.extend(strings::scan_strings(data, annotation));
    match object::extract_object(data, annotation) {
        Ok(symbols) => out.extend(symbols),
        // Stripped or damaged container: strings only
        Err(_) => {}
    }
}

fn scan_dex(data: &[u8], annotation: Option<&str>, out: &mut Vec<Feature>) {
    match dex::extract_dex(data, annotation) {
        Ok(feats) => out.extend(feats),
        Err(_) => out.extend(strings::scan_strings(data, annotation)),
    }
}

fn file_name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn is_wheel_metadata(path: &str) -> bool {
    file_name_of(path) == "METADATA" && path.contains(".dist-info")
}

/// Route one archive member (or decompressed stream) to its extractor.
///
/// Called by the archive walker; `depth` is the nesting level of the
/// enclosing archive. Nested archives past the recursion cap are scanned as
/// opaque binaries so outer matches survive.
pub(crate) fn dispatch_member(
    data: &[u8],
    path: &str,
    depth: u32,
    opts: &AnalysisOptions,
    deadline: &Deadline,
    out: &mut Vec<Feature>,
    stats: &mut ArchiveStats,
) -> Result<(), SnifferError> {
    deadline.check()?;
    stats.members_total += 1;

    // Recognized manifests get their dedicated parsers
    let name = file_name_of(path);
    match name {
        "AndroidManifest.xml" => {
            if !archive::parse_android_manifest(data, path, out) {
                // Binary AXML: the UTF-16 scan still surfaces the string pool
                out.extend(strings::scan_strings(data, Some(path)));
            }
            return Ok(());
        }
        "MANIFEST.MF" => {
            archive::parse_jar_manifest(data, path, out);
            return Ok(());
        }
        "Info.plist" => {
            archive::parse_plist(data, path, out);
            return Ok(());
        }
        "pom.xml" => {
            archive::parse_pom(data, path, out);
            return Ok(());
        }
        _ if name.ends_with(".pom") => {
            archive::parse_pom(data, path, out);
            return Ok(());
        }
        _ if is_wheel_metadata(path) => {
            archive::parse_wheel_metadata(data, path, out);
            return Ok(());
        }
        _ => {}
    }

    let kind = detect::sniff(data, Path::new(path));
    match kind {
        FileKind::Empty => {}
        FileKind::Elf | FileKind::Pe | FileKind::MachO | FileKind::MachOFat | FileKind::ArLibrary => {
            stats.members_native += 1;
            scan_with_object(data, Some(path), out);
        }
        FileKind::Dex => scan_dex(data, Some(path), out),
        FileKind::Source(lang) => out.extend(source::extract_source(data, lang, Some(path))),
        k if k.is_archive() => {
            if depth + 1 > opts.recursion_cap {
                // Recursion cap reached: stop descending, keep outer matches
                out.extend(strings::scan_strings(data, Some(path)));
            } else {
                match archive::walk_archive(data, k, path, depth + 1, opts, deadline, out, stats) {
                    Ok(()) => {}
                    Err(SnifferError::Format(_)) => {
                        out.extend(strings::scan_strings(data, Some(path)))
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        _ => out.extend(strings::scan_strings(data, Some(path))),
    }
    Ok(())
}

/// Extract raw features from a top-level file.
pub fn extract(
    data: &[u8],
    kind: FileKind,
    opts: &AnalysisOptions,
    deadline: &Deadline,
) -> Result<Extraction, SnifferError> {
    let mut extraction = Extraction::default();
    let out = &mut extraction.features;
    match kind {
        FileKind::Empty => {}
        FileKind::Elf | FileKind::Pe | FileKind::MachO | FileKind::MachOFat | FileKind::ArLibrary => {
            scan_with_object(data, None, out)
        }
        FileKind::Dex => scan_dex(data, None, out),
        FileKind::Source(lang) => out.extend(source::extract_source(data, lang, None)),
        k if k.is_archive() => {
            match archive::walk_archive(
                data,
                k,
                "",
                1,
                opts,
                deadline,
                out,
                &mut extraction.stats,
            ) {
                Ok(()) => {}
                Err(SnifferError::Format(_)) => out.extend(strings::scan_strings(data, None)),
                Err(e) => return Err(e),
            }
        }
        // 7z, RAR, RPM, CPIO, installers: recognized but opaque
        _ => out.extend(strings::scan_strings(data, None)),
    }
    Ok(extraction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    fn deadline() -> Deadline {
        Deadline::new(Duration::from_secs(60))
    }

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Stored);
            for (name, data) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(data).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_generic_binary_strings() {
        let opts = AnalysisOptions::default();
        let data = b"\x00\x01png_create_read_struct\x00";
        let ex = extract(data, FileKind::Binary, &opts, &deadline()).unwrap();
        assert!(ex.features.iter().any(|f| f.text == "png_create_read_struct"));
    }

    #[test]
    fn test_zip_members_annotated_and_sorted() {
        let opts = AnalysisOptions::default();
        let data = build_zip(&[
            ("lib/zz.bin", b"\x00zz_symbol_name\x00"),
            ("lib/aa.bin", b"\x00aa_symbol_name\x00"),
        ]);
        let ex = extract(&data, detect::sniff(&data, Path::new("a.zip")), &opts, &deadline()).unwrap();
        let aa = ex.features.iter().position(|f| f.text == "aa_symbol_name").unwrap();
        let zz = ex.features.iter().position(|f| f.text == "zz_symbol_name").unwrap();
        assert!(aa < zz, "members must expand in lexicographic order");
        assert_eq!(
            ex.features[aa].source.as_deref(),
            Some("lib/aa.bin")
        );
        assert_eq!(ex.stats.members_total, 2);
    }

    #[test]
    fn test_nested_zip_within_cap() {
        let opts = AnalysisOptions::default();
        let inner = build_zip(&[("deep.bin", b"\x00nested_symbol_text\x00")]);
        let outer = build_zip(&[("inner.zip", &inner)]);
        let ex = extract(&outer, FileKind::Zip(crate::detect::ZipFlavor::Plain), &opts, &deadline()).unwrap();
        let feat = ex.features.iter().find(|f| f.text == "nested_symbol_text").unwrap();
        assert_eq!(feat.source.as_deref(), Some("inner.zip/deep.bin"));
    }

    #[test]
    fn test_recursion_cap_stops_descent() {
        let mut opts = AnalysisOptions::default();
        opts.recursion_cap = 1;
        let inner = build_zip(&[("deep.bin", b"\x00nested_symbol_text\x00")]);
        let outer = build_zip(&[("inner.zip", &inner)]);
        let ex = extract(&outer, FileKind::Zip(crate::detect::ZipFlavor::Plain), &opts, &deadline()).unwrap();
        // The nested member is scanned opaquely, so its stored-data strings
        // may surface, but nothing is expanded beyond the cap
        assert!(ex
            .features
            .iter()
            .all(|f| f.source.as_deref() != Some("inner.zip/deep.bin")));
    }

    #[test]
    fn test_manifest_routing_in_apk() {
        let opts = AnalysisOptions::default();
        let manifest = br#"<?xml version="1.0"?><manifest package="com.example.app"></manifest>"#;
        let data = build_zip(&[("AndroidManifest.xml", manifest.as_slice())]);
        let ex = extract(&data, FileKind::Zip(crate::detect::ZipFlavor::Apk), &opts, &deadline()).unwrap();
        assert!(ex.features.iter().any(|f| f.text == "apk-package:com.example.app"));
    }

    #[test]
    fn test_gzip_single_stream() {
        let opts = AnalysisOptions::default();
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"\x00gzip_inner_symbol\x00").unwrap();
        let gz = encoder.finish().unwrap();
        let ex = extract(&gz, FileKind::Gzip, &opts, &deadline()).unwrap();
        assert!(ex.features.iter().any(|f| f.text == "gzip_inner_symbol"));
    }

    #[test]
    fn test_corrupt_zip_degrades_to_strings() {
        let opts = AnalysisOptions::default();
        let data = b"PK\x03\x04corrupt_zip_payload_string";
        let ex = extract(
            data,
            FileKind::Zip(crate::detect::ZipFlavor::Plain),
            &opts,
            &deadline(),
        )
        .unwrap();
        assert!(ex.features.iter().any(|f| f.text.contains("corrupt_zip_payload_string")));
    }
}
