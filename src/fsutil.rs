// src/fsutil.rs

use sha2::{Digest, Sha256};
use std::{
    fs::{self, File},
    io::{self, BufReader, Read, Write},
    path::Path,
};
use tempfile::{Builder, NamedTempFile};

use crate::error::{IoResultExt, Result};

/// Write `path` atomically: `write` fills a temp file in the same directory,
/// which is fsynced and then renamed over `path`. On any error the temp file
/// is removed and `path` is left as it was.
pub fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let tmp = stage(path, write).at_path(path)?;
    tmp.persist(path).map_err(|e| e.error).at_path(path)?;
    Ok(())
}

/// Like [`write_atomic`], but fails with `AlreadyExists` instead of
/// replacing an existing file.
pub fn create_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let tmp = stage(path, write).at_path(path)?;
    tmp.persist_noclobber(path).map_err(|e| e.error).at_path(path)?;
    Ok(())
}

/// Atomically replace `dst` with the bytes of `src`.
pub fn copy_atomic(src: &Path, dst: &Path) -> Result<()> {
    let mut input = File::open(src).at_path(src)?;
    write_atomic(dst, |f| io::copy(&mut input, f).map(|_| ()))
}

fn stage<F>(path: &Path, write: F) -> io::Result<NamedTempFile>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let prefix = format!(
        ".{}.",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    );
    let mut tmp = Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(dir)?;

    write(tmp.as_file_mut())?;
    tmp.as_file_mut().flush()?;
    tmp.as_file().sync_all()?;
    Ok(tmp)
}

/// Lower-hex SHA-256 of everything `reader` yields.
pub fn sha256_reader<R: Read>(reader: R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut reader = BufReader::new(reader);
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let file = File::open(path).at_path(path)?;
    sha256_reader(file).at_path(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use tempfile::tempdir;

    fn leftovers(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".tmp"))
            .collect()
    }

    #[test]
    fn interrupted_write_leaves_original_intact() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("central_db.csv");
        fs::write(&path, "orderCode\nORDER001\n").unwrap();

        let res = write_atomic(&path, |f| {
            f.write_all(b"orderCode\nORD")?;
            Err(io::Error::new(io::ErrorKind::Other, "simulated crash"))
        });

        assert!(matches!(res, Err(StoreError::StorageIo { .. })));
        assert_eq!(fs::read_to_string(&path).unwrap(), "orderCode\nORDER001\n");
        assert!(leftovers(tmp.path()).is_empty());
    }

    #[test]
    fn write_replaces_and_creates_parent() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("nested").join("central_db.csv");
        write_atomic(&path, |f| f.write_all(b"a")).unwrap();
        write_atomic(&path, |f| f.write_all(b"b")).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "b");
    }

    #[test]
    fn create_refuses_to_clobber() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("snap.csv");
        create_atomic(&path, |f| f.write_all(b"first")).unwrap();
        let err = create_atomic(&path, |f| f.write_all(b"second")).unwrap_err();
        match err {
            StoreError::StorageIo { source, .. } => {
                assert_eq!(source.kind(), io::ErrorKind::AlreadyExists)
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(fs::read_to_string(&path).unwrap(), "first");
        assert!(leftovers(tmp.path()).is_empty());
    }

    #[test]
    fn sha256_of_known_input() {
        let digest = sha256_reader(&b"abc"[..]).unwrap();
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
