//! Pack command - zip a socket directory into an installable bundle
//!
//! Useful for testing a socket locally with `socketpm install --bundle`.

use anyhow::Result;
use socketpm::archive::build_zip;
use socketpm::checksum;
use socketpm::config::MANIFEST_NAME;
use socketpm::importer::format_size;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const EXCLUDED: &[&str] = &[
    // Version control
    ".git",
    ".gitignore",
    ".svn",
    ".hg",
    // IDE/Editor
    ".vscode",
    ".idea",
    // Environment/Secrets
    ".env",
    // Tooling
    "node_modules",
    // OS files
    ".DS_Store",
    "Thumbs.db",
];

pub fn run(path: Option<String>, output: Option<String>) -> Result<()> {
    let socket_dir = match path {
        Some(p) => PathBuf::from(p),
        None => env::current_dir()?,
    };

    if !socket_dir.join(MANIFEST_NAME).is_file() {
        anyhow::bail!("No {} found in {}", MANIFEST_NAME, socket_dir.display());
    }

    let name = socket_dir
        .canonicalize()?
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Could not determine socket name"))?;
    let output_path = match output {
        Some(out) => PathBuf::from(out),
        None => env::current_dir()?.join(format!("{}.zip", name)),
    };

    println!("Packing socket {}...", name);
    let files = collect_files(&socket_dir, &output_path)?;
    println!("  Files to pack: {}", files.len());

    let bundle = build_zip(files)?;
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&output_path, &bundle)?;

    println!();
    println!("Bundle created successfully!");
    println!();
    println!("  Output: {}", output_path.display());
    println!("  Size: {}", format_size(bundle.len() as u64));
    println!("  Checksum: {}", checksum::digest(&bundle));

    Ok(())
}

fn should_include_entry(entry: &walkdir::DirEntry) -> bool {
    if entry.depth() == 0 {
        return true;
    }
    let name = entry.file_name().to_string_lossy();
    !EXCLUDED.contains(&name.as_ref()) && !name.ends_with('~')
}

/// Files under `source_dir` keyed by their forward-slash relative path.
fn collect_files(source_dir: &Path, output_path: &Path) -> Result<Vec<(String, Vec<u8>)>> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(source_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(should_include_entry)
    {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() || path == output_path {
            continue;
        }

        let relative = path
            .strip_prefix(source_dir)?
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push((relative, fs::read(path)?));
    }
    Ok(files)
}
