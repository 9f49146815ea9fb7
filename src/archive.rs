//! Archive expansion and manifest parsing.
//!
//! Members are enumerated in lexicographic order by archive-relative path,
//! expanded one at a time into capped buffers (never materialized whole) and
//! dispatched back through the sniffer. Nesting stops at the recursion cap;
//! a too-deep archive is scanned as an opaque binary instead, so outer
//! matches survive. Recognized manifests emit package-identifier features
//! (`bundle-id:...`, `maven:g:a:v`, `pypi:name:version`, `apk-package:...`).

use crate::detect::{self, FileKind};
use crate::error::SnifferError;
use crate::extract::{dispatch_member, ArchiveStats};
use crate::features::Feature;
use crate::options::{AnalysisOptions, Deadline};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::{Cursor, Read};

/// Guard on any single decompressed member or stream.
const MAX_DECOMPRESSED: u64 = 1 << 31;

fn member_limit(opts: &AnalysisOptions) -> u64 {
    opts.size_ceiling.unwrap_or(MAX_DECOMPRESSED)
}

fn read_capped<R: Read>(reader: R, limit: u64) -> Result<Vec<u8>, SnifferError> {
    let mut buf = Vec::new();
    reader.take(limit).read_to_end(&mut buf)?;
    Ok(buf)
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// Walk a zip container (zip/jar/apk/ipa/wheel/egg).
fn walk_zip(
    data: &[u8],
    prefix: &str,
    depth: u32,
    opts: &AnalysisOptions,
    deadline: &Deadline,
    out: &mut Vec<Feature>,
    stats: &mut ArchiveStats,
) -> Result<(), SnifferError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data))?;
    let mut names: Vec<String> = archive.file_names().map(|n| n.to_string()).collect();
    names.sort_unstable();
    names.truncate(opts.archive_member_cap);

    for name in names {
        deadline.check()?;
        if opts.cancelled() {
            return Err(SnifferError::Io("analysis cancelled".to_string()));
        }
        let mut file = match archive.by_name(&name) {
            Ok(f) => f,
            Err(_) => continue,
        };
        if file.is_dir() {
            continue;
        }
        if file.size() > member_limit(opts) {
            continue;
        }
        let mut member = Vec::with_capacity(file.size() as usize);
        if file.read_to_end(&mut member).is_err() {
            continue;
        }
        let path = join_path(prefix, &name);
        dispatch_member(&member, &path, depth, opts, deadline, out, stats)?;
    }
    Ok(())
}

/// Walk a tar stream (already decompressed).
fn walk_tar(
    data: &[u8],
    prefix: &str,
    depth: u32,
    opts: &AnalysisOptions,
    deadline: &Deadline,
    out: &mut Vec<Feature>,
    stats: &mut ArchiveStats,
) -> Result<(), SnifferError> {
    let mut archive = tar::Archive::new(Cursor::new(data));
    let mut members: Vec<(String, Vec<u8>)> = Vec::new();

    let entries = archive
        .entries()
        .map_err(|e| SnifferError::Format(format!("tar: {}", e)))?;
    for entry in entries {
        deadline.check()?;
        if opts.cancelled() {
            return Err(SnifferError::Io("analysis cancelled".to_string()));
        }
        let Ok(mut entry) = entry else {
            // Truncated tail: keep what we have
            break;
        };
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let size = entry.header().size().unwrap_or(0);
        if size > member_limit(opts) {
            continue;
        }
        let name = match entry.path() {
            Ok(p) => p.to_string_lossy().into_owned(),
            Err(_) => continue,
        };
        let mut member = Vec::with_capacity(size as usize);
        if entry.read_to_end(&mut member).is_err() {
            continue;
        }
        members.push((name, member));
        if members.len() >= opts.archive_member_cap {
            break;
        }
    }

    members.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, member) in members {
        let path = join_path(prefix, &name);
        dispatch_member(&member, &path, depth, opts, deadline, out, stats)?;
    }
    Ok(())
}

fn decompress(data: &[u8], kind: FileKind, limit: u64) -> Result<Vec<u8>, SnifferError> {
    match kind {
        FileKind::Gzip => read_capped(flate2::read::GzDecoder::new(data), limit),
        FileKind::Bzip2 => read_capped(bzip2::read::BzDecoder::new(data), limit),
        FileKind::Xz => read_capped(xz2::read::XzDecoder::new(data), limit),
        FileKind::Zstd => {
            let decoder = zstd::stream::read::Decoder::new(data)
                .map_err(|e| SnifferError::Format(format!("zstd: {}", e)))?;
            read_capped(decoder, limit)
        }
        _ => Err(SnifferError::Format("not a compressed stream".to_string())),
    }
}

/// Expand an archive or compressed stream rooted at `prefix`.
pub fn walk_archive(
    data: &[u8],
    kind: FileKind,
    prefix: &str,
    depth: u32,
    opts: &AnalysisOptions,
    deadline: &Deadline,
    out: &mut Vec<Feature>,
    stats: &mut ArchiveStats,
) -> Result<(), SnifferError> {
    match kind {
        FileKind::Zip(_) => walk_zip(data, prefix, depth, opts, deadline, out, stats),
        FileKind::Tar => walk_tar(data, prefix, depth, opts, deadline, out, stats),
        FileKind::Gzip | FileKind::Bzip2 | FileKind::Xz | FileKind::Zstd => {
            let inner = decompress(data, kind, member_limit(opts))?;
            if inner.is_empty() {
                return Ok(());
            }
            // A compressed stream holds either a tar or a single file
            let leaf = if prefix.is_empty() { "stream" } else { prefix };
            let inner_name = leaf.trim_end_matches(|c| c != '.').trim_end_matches('.');
            let inner_kind = detect::sniff(&inner, std::path::Path::new(inner_name));
            if inner_kind == FileKind::Tar {
                walk_tar(&inner, prefix, depth, opts, deadline, out, stats)
            } else {
                dispatch_member(&inner, leaf, depth, opts, deadline, out, stats)
            }
        }
        _ => Err(SnifferError::Format("not an archive".to_string())),
    }
}

// ============================================================================
// Manifest parsers
// ============================================================================

fn xml_text_of<'a>(reader: &mut Reader<&'a [u8]>) -> Option<String> {
    match reader.read_event() {
        Ok(Event::Text(t)) => t.unescape().ok().map(|s| s.trim().to_string()),
        _ => None,
    }
}

/// `pom.xml` / `*.pom`: project-level groupId / artifactId / version.
pub fn parse_pom(data: &[u8], source: &str, out: &mut Vec<Feature>) {
    let text = String::from_utf8_lossy(data);
    let mut reader = Reader::from_str(&text);
    let mut group = None;
    let mut artifact = None;
    let mut version = None;
    let mut in_parent = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"parent" => in_parent = true,
                b"groupId" if !in_parent && group.is_none() => group = xml_text_of(&mut reader),
                b"artifactId" if !in_parent && artifact.is_none() => {
                    artifact = xml_text_of(&mut reader)
                }
                b"version" if !in_parent && version.is_none() => version = xml_text_of(&mut reader),
                _ => {}
            },
            Ok(Event::End(e)) if e.name().as_ref() == b"parent" => in_parent = false,
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }
    if let (Some(g), Some(a)) = (&group, &artifact) {
        let v = version.as_deref().unwrap_or("unknown");
        out.push(Feature::with_source(format!("maven:{}:{}:{}", g, a, v), source));
        out.push(Feature::with_source(g.clone(), source));
        out.push(Feature::with_source(a.clone(), source));
    }
}

/// `Info.plist` (XML form): CFBundleIdentifier as `bundle-id:...`.
pub fn parse_plist(data: &[u8], source: &str, out: &mut Vec<Feature>) {
    let text = String::from_utf8_lossy(data);
    let mut reader = Reader::from_str(&text);
    let mut saw_bundle_key = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.name().as_ref().to_vec();
                if name == b"key" {
                    saw_bundle_key =
                        xml_text_of(&mut reader).as_deref() == Some("CFBundleIdentifier");
                } else if name == b"string" && saw_bundle_key {
                    if let Some(id) = xml_text_of(&mut reader) {
                        out.push(Feature::with_source(format!("bundle-id:{}", id), source));
                        out.push(Feature::with_source(id, source));
                    }
                    return;
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }
}

/// `AndroidManifest.xml`: text XML yields `apk-package:...`; the binary AXML
/// form falls back to the UTF-16 string scan in the caller.
pub fn parse_android_manifest(data: &[u8], source: &str, out: &mut Vec<Feature>) -> bool {
    let head = &data[..data.len().min(64)];
    if !(head.starts_with(b"<?xml") || head.starts_with(b"<manifest")) {
        return false;
    }
    let text = String::from_utf8_lossy(data);
    let mut reader = Reader::from_str(&text);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.name().as_ref() == b"manifest" {
                    if let Ok(Some(attr)) = e.try_get_attribute("package") {
                        if let Ok(pkg) = attr.unescape_value() {
                            out.push(Feature::with_source(
                                format!("apk-package:{}", pkg),
                                source,
                            ));
                            out.push(Feature::with_source(pkg.into_owned(), source));
                        }
                    }
                    return true;
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }
    true
}

/// JAR `META-INF/MANIFEST.MF`: values of the identifying main attributes.
pub fn parse_jar_manifest(data: &[u8], source: &str, out: &mut Vec<Feature>) {
    const KEYS: &[&str] = &[
        "Implementation-Title",
        "Implementation-Version",
        "Implementation-Vendor",
        "Bundle-SymbolicName",
        "Bundle-Version",
        "Main-Class",
        "Automatic-Module-Name",
    ];
    let text = String::from_utf8_lossy(data);
    let mut title = None;
    let mut version = None;
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());
        if value.is_empty() || !KEYS.contains(&key) {
            continue;
        }
        out.push(Feature::with_source(value, source));
        match key {
            "Implementation-Title" => title = Some(value.to_string()),
            "Implementation-Version" => version = Some(value.to_string()),
            _ => {}
        }
    }
    if let (Some(t), Some(v)) = (title, version) {
        out.push(Feature::with_source(format!("jar:{}:{}", t, v), source));
    }
}

/// Wheel `METADATA`: `pypi:name:version`.
pub fn parse_wheel_metadata(data: &[u8], source: &str, out: &mut Vec<Feature>) {
    let text = String::from_utf8_lossy(data);
    let mut name = None;
    let mut version = None;
    for line in text.lines() {
        if line.is_empty() {
            break; // headers end at the first blank line
        }
        if let Some(v) = line.strip_prefix("Name: ") {
            name = Some(v.trim().to_string());
        } else if let Some(v) = line.strip_prefix("Version: ") {
            version = Some(v.trim().to_string());
        }
    }
    if let Some(n) = name {
        let v = version.unwrap_or_else(|| "unknown".to_string());
        out.push(Feature::with_source(format!("pypi:{}:{}", n, v), source));
        out.push(Feature::with_source(n, source));
    }
}
