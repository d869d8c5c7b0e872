//! Input scanning: collects class files from directories, jars, and wars,
//! expands manifest `Class-Path` references, and lowers everything to the
//! instruction IR. Entry order is sorted so runs are reproducible.

use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};
use zip::ZipArchive;

use crate::classfile;
use crate::ir::{ClassDef, lower_class};

pub(crate) struct ScanOutput {
    pub(crate) classes: Vec<ClassDef>,
    /// Class files seen, including ones that failed to parse.
    pub(crate) class_count: usize,
}

/// Scans the inputs plus the classpath entries reachable from them. Missing
/// or unsupported inputs are fatal; a malformed individual class inside an
/// otherwise readable input is skipped with a diagnostic.
pub(crate) fn scan_inputs(inputs: &[PathBuf], classpath: &[PathBuf]) -> Result<ScanOutput> {
    let mut output = ScanOutput {
        classes: Vec::new(),
        class_count: 0,
    };

    let mut sorted_inputs = inputs.to_vec();
    sorted_inputs.sort_by(|a, b| path_key(a).cmp(&path_key(b)));
    for input in &sorted_inputs {
        scan_path(input, true, &mut output)?;
    }

    let mut classpath_entries = classpath.to_vec();
    for input in &sorted_inputs {
        if is_archive_path(input) {
            classpath_entries.extend(manifest_classpath(input)?);
        }
    }

    for entry in expand_classpath(classpath_entries)? {
        if sorted_inputs.contains(&entry) {
            continue;
        }
        scan_path(&entry, false, &mut output)?;
    }

    Ok(output)
}

fn scan_path(path: &Path, strict: bool, output: &mut ScanOutput) -> Result<()> {
    if path.is_dir() {
        return scan_dir(path, output);
    }
    let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
    match extension.to_ascii_lowercase().as_str() {
        "class" => scan_class_file(path, output),
        "jar" | "war" => scan_archive(path, output),
        _ => {
            if strict {
                anyhow::bail!("unsupported input file: {}", path.display());
            }
            Ok(())
        }
    }
}

fn scan_dir(path: &Path, output: &mut ScanOutput) -> Result<()> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(path)
        .with_context(|| format!("failed to read directory {}", path.display()))?
    {
        let entry =
            entry.with_context(|| format!("failed to read entry under {}", path.display()))?;
        entries.push(entry.path());
    }

    entries.sort_by(|a, b| path_key(a).cmp(&path_key(b)));

    for entry in entries {
        if entry.is_dir() {
            scan_dir(&entry, output)?;
        } else {
            scan_path(&entry, false, output)?;
        }
    }
    Ok(())
}

fn scan_class_file(path: &Path, output: &mut ScanOutput) -> Result<()> {
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    output.class_count += 1;
    match classfile::parse(&data) {
        Ok(class) => output.classes.push(lower_class(class)),
        Err(error) => {
            warn!(path = %path.display(), "skipping unparsable class: {error:#}");
        }
    }
    Ok(())
}

fn scan_archive(path: &Path, output: &mut ScanOutput) -> Result<()> {
    let file =
        fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))?;

    let mut entry_names: Vec<String> = Vec::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        if name.ends_with(".class") && !name.ends_with("module-info.class") {
            entry_names.push(name);
        }
    }
    entry_names.sort();
    debug!(path = %path.display(), classes = entry_names.len(), "scanning archive");

    for name in entry_names {
        let mut entry = archive
            .by_name(&name)
            .with_context(|| format!("failed to read {} in {}", name, path.display()))?;
        let mut data = Vec::new();
        entry
            .read_to_end(&mut data)
            .with_context(|| format!("failed to read {} in {}", name, path.display()))?;
        output.class_count += 1;
        match classfile::parse(&data) {
            Ok(class) => output.classes.push(lower_class(class)),
            Err(error) => {
                warn!(
                    path = %path.display(),
                    entry = %name,
                    "skipping unparsable class: {error:#}"
                );
            }
        }
    }
    Ok(())
}

/// Breadth-first closure over manifest `Class-Path` references, deduplicated
/// and sorted for deterministic traversal.
fn expand_classpath(initial: Vec<PathBuf>) -> Result<Vec<PathBuf>> {
    let mut queue: VecDeque<PathBuf> = VecDeque::new();
    let mut initial_sorted = initial;
    initial_sorted.sort_by(|a, b| path_key(a).cmp(&path_key(b)));
    queue.extend(initial_sorted);

    let mut seen = BTreeSet::new();
    let mut result = Vec::new();
    while let Some(entry) = queue.pop_front() {
        if !seen.insert(path_key(&entry)) {
            continue;
        }
        if !entry.exists() {
            anyhow::bail!("classpath entry not found: {}", entry.display());
        }
        result.push(entry.clone());
        if is_archive_path(&entry) {
            let mut referenced = manifest_classpath(&entry)?;
            referenced.sort_by(|a, b| path_key(a).cmp(&path_key(b)));
            queue.extend(referenced);
        }
    }
    Ok(result)
}

fn manifest_classpath(path: &Path) -> Result<Vec<PathBuf>> {
    let file =
        fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))?;
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if entry.name() != "META-INF/MANIFEST.MF" {
            continue;
        }
        let mut content = String::new();
        entry
            .read_to_string(&mut content)
            .with_context(|| format!("failed to read {}", entry.name()))?;
        return Ok(parse_manifest_classpath(path, &content));
    }
    Ok(Vec::new())
}

/// Manifest values wrap at 72 bytes with a leading-space continuation.
fn parse_manifest_classpath(jar_path: &Path, content: &str) -> Vec<PathBuf> {
    let mut class_path = None;
    let mut current_key = None;
    let mut current_value = String::new();

    for raw_line in content.lines() {
        let line = raw_line.trim_end_matches('\r');
        if line.starts_with(' ') {
            if current_key.is_some() {
                current_value.push_str(&line[1..]);
            }
            continue;
        }

        if let Some(key) = current_key.take() {
            if key == "Class-Path" {
                class_path = Some(current_value.clone());
            }
            current_value.clear();
        }

        if let Some((key, value)) = line.split_once(':') {
            current_key = Some(key.trim().to_string());
            current_value.push_str(value.trim_start());
        }
    }

    if let Some(key) = current_key.take() {
        if key == "Class-Path" {
            class_path = Some(current_value.clone());
        }
    }

    let Some(class_path) = class_path else {
        return Vec::new();
    };

    let base_dir = jar_path.parent().unwrap_or_else(|| Path::new(""));
    class_path
        .split_whitespace()
        .map(|entry| {
            let entry_path = PathBuf::from(entry);
            if entry_path.is_absolute() {
                entry_path
            } else {
                base_dir.join(entry_path)
            }
        })
        .collect()
}

fn is_archive_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("jar") || ext.eq_ignore_ascii_case("war"))
        .unwrap_or(false)
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
