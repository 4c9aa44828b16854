//! Chart archive extraction and repacking
//!
//! Helm chart archives are `.tgz` files whose entries all live under a single
//! top-level directory named after the chart (`nginx/Chart.yaml`,
//! `nginx/templates/...`). Repacking keeps that layout.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder, Header};
use walkdir::WalkDir;

use crate::chart::{CHART_FILE, ChartMetadata};
use crate::error::{CoreError, Result};

fn open_archive(archive_path: &Path) -> Result<Archive<GzDecoder<File>>> {
    Ok(Archive::new(GzDecoder::new(File::open(archive_path)?)))
}

/// Unpack a pulled chart into `dest`
pub fn extract_archive(archive_path: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)?;
    open_archive(archive_path)?.unpack(dest)?;
    Ok(())
}

/// Contents of the entry at `entry_path` (`<chart>/values.yaml`)
pub fn read_file_from_archive(archive_path: &Path, entry_path: &str) -> Result<Vec<u8>> {
    let mut archive = open_archive(archive_path)?;
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.path()?.to_string_lossy() == entry_path {
            let mut content = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut content)?;
            return Ok(content);
        }
    }

    Err(CoreError::Archive {
        message: format!("{} has no entry {}", archive_path.display(), entry_path),
    })
}

/// Read the top-level `<chart>/Chart.yaml` of a chart archive
pub fn read_chart_metadata(archive_path: &Path) -> Result<ChartMetadata> {
    let mut archive = open_archive(archive_path)?;
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_path_buf();
        let is_top_level_chart = path.components().count() == 2
            && path.file_name().is_some_and(|n| n == CHART_FILE);
        if is_top_level_chart {
            let mut content = String::new();
            entry.read_to_string(&mut content)?;
            return ChartMetadata::from_yaml(&content);
        }
    }

    Err(CoreError::Archive {
        message: format!("{} not found in {}", CHART_FILE, archive_path.display()),
    })
}

/// Package `chart_dir` into `output` with every entry under `<chart_name>/`
///
/// Entries are sorted and timestamps zeroed, so repacking an unchanged tree
/// yields an identical archive. Returns the archive's `sha256:` digest.
pub fn create_chart_archive(chart_dir: &Path, chart_name: &str, output: &Path) -> Result<String> {
    if !chart_dir.join(CHART_FILE).exists() {
        return Err(CoreError::ChartNotFound {
            path: chart_dir.display().to_string(),
        });
    }
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut files: Vec<PathBuf> = WalkDir::new(chart_dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    files.sort();

    let mut builder = Builder::new(GzEncoder::new(File::create(output)?, Compression::default()));

    for path in files {
        let rel = path.strip_prefix(chart_dir).map_err(|e| CoreError::Archive {
            message: e.to_string(),
        })?;
        let rel = rel.to_string_lossy().replace('\\', "/");
        add_file_to_archive(&mut builder, &path, &format!("{}/{}", chart_name, rel))?;
    }

    builder.into_inner()?.finish()?;

    file_digest(output)
}

/// `sha256:<hex>` of a file's contents
pub fn file_digest(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}

fn add_file_to_archive<W: Write>(
    builder: &mut Builder<W>,
    file_path: &Path,
    archive_path: &str,
) -> Result<()> {
    let content = std::fs::read(file_path)?;
    let mut header = Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_cksum();

    builder.append_data(&mut header, archive_path, content.as_slice())?;

    Ok(())
}
