//! Archive Module
//!
//! Receivers usually mail aggregate reports as `.zip` or `.gz` attachments. This module
//! unpacks such a bundle into raw report documents for the `inspect` command. It enforces
//! limits on file size, decompressed size, entry count, compression ratio and entry name
//! length, and refuses entries whose names try to escape the extraction root.
//!
//! Decompressed reads are capped at the configured limit plus one byte, so a bomb is
//! detected without ever inflating it fully.

use crate::config::Config;
use crate::error::ArchiveError;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use zip::ZipArchive;

/// Returns every report document inside `path`. A plain `.xml` file yields itself.
pub fn extract_reports<P: AsRef<Path>>(path: P, config: &Config) -> Result<Vec<Vec<u8>>, ArchiveError> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let file_size = file.metadata()?.len();
    if file_size > config.max_file_size as u64 {
        return Err(ArchiveError::TooLarge {
            what: "File",
            limit: config.max_file_size as u64,
        });
    }

    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "zip" => extract_zip(file, config),
        "gz" => {
            let decoder = GzDecoder::new(BufReader::new(file));
            Ok(vec![read_capped(
                decoder,
                config.max_decompressed_size as u64,
                "Decompressed size",
            )?])
        }
        "xml" => Ok(vec![read_capped(
            BufReader::new(file),
            config.max_file_size as u64,
            "XML file size",
        )?]),
        _ => Err(ArchiveError::Unsupported(
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        )),
    }
}

fn extract_zip(file: File, config: &Config) -> Result<Vec<Vec<u8>>, ArchiveError> {
    let mut archive = ZipArchive::new(BufReader::new(file))?;
    if archive.len() > config.max_files_in_zip {
        return Err(ArchiveError::TooManyEntries {
            count: archive.len(),
            limit: config.max_files_in_zip,
        });
    }

    let budget = config.max_decompressed_size as u64;
    let mut total: u64 = 0;
    let mut extracted = Vec::new();
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        let name = entry.name().to_string();
        if name.contains("..") || name.starts_with('/') || name.starts_with('\\') {
            return Err(ArchiveError::PathTraversal(name));
        }
        if name.len() > config.max_filename_length {
            return Err(ArchiveError::NameTooLong(name.len()));
        }
        if entry.is_dir() {
            continue;
        }

        let compressed = entry.compressed_size();
        if compressed > 0 {
            let ratio = entry.size() as f64 / compressed as f64;
            if ratio > config.max_compression_ratio {
                return Err(ArchiveError::CompressionRatio(ratio));
            }
        }

        // Declared sizes can lie, so the read itself is capped too.
        let remaining = budget.saturating_sub(total);
        if entry.size() > remaining {
            return Err(ArchiveError::TooLarge {
                what: "Total decompressed size",
                limit: budget,
            });
        }
        let contents = read_capped(entry, remaining, "Total decompressed size")
            .map_err(|e| match e {
                ArchiveError::TooLarge { what, .. } => ArchiveError::TooLarge { what, limit: budget },
                other => other,
            })?;
        total += contents.len() as u64;
        extracted.push(contents);
    }
    Ok(extracted)
}

fn read_capped<R: Read>(reader: R, limit: u64, what: &'static str) -> Result<Vec<u8>, ArchiveError> {
    let mut contents = Vec::new();
    reader.take(limit.saturating_add(1)).read_to_end(&mut contents)?;
    if contents.len() as u64 > limit {
        return Err(ArchiveError::TooLarge { what, limit });
    }
    Ok(contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    const REPORT: &[u8] = b"<feedback><report_metadata><report_id>z-1</report_id></report_metadata></feedback>";

    fn config() -> Config {
        Config::from_lookup(|_| None).unwrap()
    }

    #[test]
    fn test_zip_entries_are_returned_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("google.com!example.com!1700000000!1700086399.zip");
        let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
        zip.start_file("one.xml", SimpleFileOptions::default()).unwrap();
        zip.write_all(REPORT).unwrap();
        zip.start_file("two.xml", SimpleFileOptions::default()).unwrap();
        zip.write_all(b"<feedback/>").unwrap();
        zip.finish().unwrap();

        let docs = extract_reports(&path, &config()).unwrap();
        assert_eq!(docs, vec![REPORT.to_vec(), b"<feedback/>".to_vec()]);
    }

    #[test]
    fn test_gzip_is_decompressed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.xml.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(REPORT).unwrap();
        encoder.finish().unwrap();

        let docs = extract_reports(&path, &config()).unwrap();
        assert_eq!(docs, vec![REPORT.to_vec()]);
    }

    #[test]
    fn test_gzip_over_budget_is_refused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::best());
        encoder.write_all(&vec![b'A'; 64 * 1024]).unwrap();
        encoder.finish().unwrap();

        let mut config = config();
        config.max_decompressed_size = 1024;
        let err = extract_reports(&path, &config).unwrap_err();
        assert!(matches!(err, ArchiveError::TooLarge { limit: 1024, .. }), "{}", err);
    }

    #[test]
    fn test_plain_xml_passes_through() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.xml");
        std::fs::write(&path, REPORT).unwrap();
        assert_eq!(extract_reports(&path, &config()).unwrap(), vec![REPORT.to_vec()]);
    }

    #[test]
    fn test_too_many_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("many.zip");
        let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
        for i in 0..3 {
            zip.start_file(format!("{}.xml", i), SimpleFileOptions::default()).unwrap();
            zip.write_all(b"<feedback/>").unwrap();
        }
        zip.finish().unwrap();

        let mut config = config();
        config.max_files_in_zip = 2;
        let err = extract_reports(&path, &config).unwrap_err();
        assert!(matches!(err, ArchiveError::TooManyEntries { count: 3, limit: 2 }));
    }

    #[test]
    fn test_long_entry_name() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("long.zip");
        let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
        zip.start_file(format!("{}.xml", "a".repeat(40)), SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"<feedback/>").unwrap();
        zip.finish().unwrap();

        let mut config = config();
        config.max_filename_length = 16;
        assert!(matches!(
            extract_reports(&path, &config).unwrap_err(),
            ArchiveError::NameTooLong(44)
        ));
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.pdf");
        std::fs::write(&path, b"%PDF").unwrap();
        let err = extract_reports(&path, &config()).unwrap_err();
        assert!(err.to_string().contains("Unsupported file type: report.pdf"));
    }
}
