//! Reading and writing documents on disk.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use bzip2::Compression;
use tracing::{debug, trace};

use super::{dump_formatted, parse_reader};
use crate::constants::ATTR_LAST_WRITTEN;
use crate::error::Result;
use crate::node::Element;

/// Suffix that marks a bzip2 compressed document.
pub const BZIP2_SUFFIX: &str = ".bz2";

/// Compression level used when writing compressed documents.
const BZIP2_LEVEL: u32 = 5;

/// Returns true if `path` names a compressed document.
pub fn is_compressed_path(path: &Path) -> bool {
    path.to_str().is_some_and(|p| p.ends_with(BZIP2_SUFFIX))
}

/// Parses a document from a file, decompressing `.bz2` files transparently.
pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Element> {
    let path = path.as_ref();
    let file = BufReader::new(File::open(path)?);
    if is_compressed_path(path) {
        trace!(path = %path.display(), "reading compressed document");
        parse_reader(BzDecoder::new(file))
    } else {
        parse_reader(file)
    }
}

/// Writes `doc` to `path` in formatted form.
///
/// The root is stamped with the current time in `cib-last-written` first.
/// The file is created readable and writable by its owner only, and is
/// synced to disk before returning. Returns the number of bytes of markup
/// written, before compression.
pub fn write_file<P: AsRef<Path>>(doc: &mut Element, path: P, compress: bool) -> Result<usize> {
    let path = path.as_ref();
    let now = chrono::Local::now().format("%a %b %e %H:%M:%S %Y").to_string();
    doc.set_attr(ATTR_LAST_WRITTEN, now);

    let text = dump_formatted(doc);
    let file = open_private(path)?;

    let file = if compress {
        let mut encoder = BzEncoder::new(BufWriter::new(file), Compression::new(BZIP2_LEVEL));
        encoder.write_all(text.as_bytes())?;
        encoder.finish()?.into_inner().map_err(|e| e.into_error())?
    } else {
        let mut writer = BufWriter::new(file);
        writer.write_all(text.as_bytes())?;
        writer.into_inner().map_err(|e| e.into_error())?
    };
    file.sync_all()?;

    debug!(path = %path.display(), bytes = text.len(), compress, "wrote document");
    Ok(text.len())
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // mode() only applies to newly created files
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::xml::parse_str;

    fn sample() -> Element {
        parse_str(r#"<cib epoch="3"><configuration><nodes><node id="n1" uname="alpha"/></nodes></configuration><status/></cib>"#)
            .unwrap()
    }

    #[test]
    fn test_write_and_read_plain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cib.xml");
        let mut doc = sample();

        let written = write_file(&mut doc, &path, false).unwrap();
        assert!(written > 0);
        assert!(doc.has_attr(ATTR_LAST_WRITTEN));

        let back = parse_file(&path).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn test_write_and_read_compressed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cib.xml.bz2");
        let mut doc = sample();

        write_file(&mut doc, &path, true).unwrap();
        let raw = std::fs::read(&path).unwrap();
        assert_eq!(&raw[..3], b"BZh");

        let back = parse_file(&path).unwrap();
        assert_eq!(back, doc);
    }

    #[cfg(unix)]
    #[test]
    fn test_written_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cib.xml");
        write_file(&mut sample(), &path, false).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_compressed_suffix_must_be_exact() {
        assert!(is_compressed_path(Path::new("/var/lib/cib.xml.bz2")));
        assert!(!is_compressed_path(Path::new("/var/lib/cib.xml.bz2.sig")));
        assert!(!is_compressed_path(Path::new("/var/lib/cib.xml")));
    }

    #[test]
    fn test_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.xml");
        std::fs::write(&path, "").unwrap();
        assert!(matches!(parse_file(&path), Err(Error::EmptyInput)));
    }
}
