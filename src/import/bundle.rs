//! Bundle extraction: a downloaded source may be plain, zipped, gzipped, or
//! a gzipped tarball. Everything is read into memory; the canonical
//! documents are JSON and comfortably fit, and the adapters parse from a
//! slice anyway.

use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;

use super::{BundleFormat, ImportError};

/// Maximum decompressed size accepted from any bundle (2 GB).
const MAX_DECOMPRESSED_SIZE: u64 = 2 * 1024 * 1024 * 1024;

pub fn read_bundle(path: &Path, format: BundleFormat) -> Result<Vec<u8>, ImportError> {
    match format {
        BundleFormat::None => Ok(std::fs::read(path)?),
        BundleFormat::Zip => read_zip(path),
        BundleFormat::Gz => {
            let file = std::fs::File::open(path)?;
            read_capped(GzDecoder::new(file))
        }
        BundleFormat::TarGz => read_tar_gz(path),
    }
}

fn read_zip(path: &Path) -> Result<Vec<u8>, ImportError> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;

    let mut total_uncompressed: u64 = 0;
    for i in 0..archive.len() {
        if let Ok(entry) = archive.by_index(i) {
            total_uncompressed += entry.size();
        }
    }
    if total_uncompressed > MAX_DECOMPRESSED_SIZE {
        return Err(ImportError::MalformedInput(format!(
            "zip decompresses to {total_uncompressed} bytes (max {MAX_DECOMPRESSED_SIZE})"
        )));
    }

    // Prefer a .json entry, otherwise take the first file in the archive.
    let name = {
        let names: Vec<String> = archive.file_names().map(|n| n.to_string()).collect();
        names
            .iter()
            .find(|n| n.ends_with(".json"))
            .or_else(|| names.first())
            .cloned()
            .ok_or_else(|| ImportError::MalformedInput("empty zip archive".into()))?
    };
    let entry = archive.by_name(&name)?;
    read_capped(entry)
}

fn read_tar_gz(path: &Path) -> Result<Vec<u8>, ImportError> {
    let file = std::fs::File::open(path)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));

    let mut fallback: Option<Vec<u8>> = None;
    for entry in archive.entries()? {
        let entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let is_json = entry
            .path()
            .ok()
            .map(|p| p.to_string_lossy().ends_with(".json"))
            .unwrap_or(false);
        let data = read_capped(entry)?;
        if is_json {
            return Ok(data);
        }
        if fallback.is_none() {
            fallback = Some(data);
        }
    }
    fallback.ok_or_else(|| ImportError::MalformedInput("empty tar archive".into()))
}

fn read_capped(reader: impl Read) -> Result<Vec<u8>, ImportError> {
    let mut data = Vec::new();
    let mut limited = reader.take(MAX_DECOMPRESSED_SIZE + 1);
    limited.read_to_end(&mut data)?;
    if data.len() as u64 > MAX_DECOMPRESSED_SIZE {
        return Err(ImportError::MalformedInput(format!(
            "bundle decompresses past the {MAX_DECOMPRESSED_SIZE} byte limit"
        )));
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicU32, Ordering};

    static COUNTER: AtomicU32 = AtomicU32::new(0);

    fn temp_path(suffix: &str) -> std::path::PathBuf {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!(
            "liveboard-bundle-test-{}-{}.{}",
            std::process::id(),
            n,
            suffix
        ))
    }

    #[test]
    fn plain_file_passes_through() {
        let path = temp_path("json");
        std::fs::write(&path, b"{\"stops\": []}").unwrap();
        let data = read_bundle(&path, BundleFormat::None).unwrap();
        assert_eq!(data, b"{\"stops\": []}");
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn zip_extracts_json_entry() {
        let path = temp_path("zip");
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file("readme.txt", options).unwrap();
        writer.write_all(b"not the payload").unwrap();
        writer.start_file("export.json", options).unwrap();
        writer.write_all(b"{\"ctdf_version\": \"1.0\"}").unwrap();
        writer.finish().unwrap();

        let data = read_bundle(&path, BundleFormat::Zip).unwrap();
        assert_eq!(data, b"{\"ctdf_version\": \"1.0\"}");
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn gz_decompresses() {
        let path = temp_path("gz");
        let file = std::fs::File::create(&path).unwrap();
        let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        encoder.write_all(b"{\"journeys\": []}").unwrap();
        encoder.finish().unwrap();

        let data = read_bundle(&path, BundleFormat::Gz).unwrap();
        assert_eq!(data, b"{\"journeys\": []}");
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn tar_gz_extracts_json_member() {
        let path = temp_path("tar.gz");
        let file = std::fs::File::create(&path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);

        let payload = b"{\"operators\": []}";
        let mut header = tar::Header::new_gnu();
        header.set_size(payload.len() as u64);
        header.set_cksum();
        builder.append_data(&mut header, "export.json", &payload[..]).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let data = read_bundle(&path, BundleFormat::TarGz).unwrap();
        assert_eq!(data, payload);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let result = read_bundle(Path::new("/nonexistent/liveboard.json"), BundleFormat::None);
        assert!(matches!(result, Err(ImportError::Io(_))));
    }
}
