//! Saving for hexstream
//!
//! The whole buffer is streamed to a temporary file next to the target, which
//! then replaces the target in one rename. The rest of the input is loaded
//! first, so a save always contains everything the source will ever produce.

use crate::storage::Buffer;
use anyhow::{Context, Result};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// Path an existing file is moved to before being replaced
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push("~");
    PathBuf::from(name)
}

/// Write `buffer` to `path`, returning the number of bytes written
///
/// Uses an atomic save strategy:
/// 1. Write to a temporary file in the target's directory
/// 2. Sync to disk
/// 3. Optionally copy an existing target to `name~`
/// 4. Rename the temporary file over the target
///
/// The target stays in place until the final rename, so a failed save
/// leaves it untouched.
pub fn save_buffer(buffer: &Buffer, path: &Path, backup: bool) -> Result<u64> {
    let target_dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let temp_file =
        NamedTempFile::new_in(target_dir).context("Failed to create temporary file")?;

    let written = {
        let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, temp_file.as_file());
        let written = buffer
            .write_to(&mut writer)
            .context("Failed to write buffer")?;
        writer.flush().context("Failed to flush output")?;
        written
    };

    temp_file
        .as_file()
        .sync_data()
        .context("Failed to sync temporary file")?;

    if let Ok(metadata) = fs::metadata(path) {
        if let Err(e) = fs::set_permissions(temp_file.path(), metadata.permissions()) {
            log::warn!("save: could not copy permissions of {}: {}", path.display(), e);
        }
        if backup {
            let backup = backup_path(path);
            fs::copy(path, &backup)
                .with_context(|| format!("Failed to create backup {}", backup.display()))?;
            log::debug!("save: backed up {} to {}", path.display(), backup.display());
        }
    }

    temp_file
        .persist(path)
        .context("Failed to save file (rename failed)")?;

    log::info!("save: wrote {} bytes to {}", written, path.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{ReadPolicy, ReaderSource};
    use crate::pointer::Pointer;
    use std::io::Cursor;
    use tempfile::tempdir;

    #[test]
    fn test_save_loads_unread_input() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let data: Vec<u8> = (0..=255u8).cycle().take(5000).collect();
        let buffer = Buffer::new(
            Box::new(ReaderSource::new(Cursor::new(data.clone()))),
            ReadPolicy::new(8, 64),
        );
        let mut p = Pointer::new(&buffer).unwrap();
        p.insert(b'!');

        let written = save_buffer(&buffer, &path, false).unwrap();
        assert_eq!(written, 5001);
        let saved = fs::read(&path).unwrap();
        assert_eq!(saved[0], b'!');
        assert_eq!(&saved[1..], &data[..]);
    }

    #[test]
    fn test_backup_keeps_previous_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.txt");
        fs::write(&path, b"old").unwrap();

        let buffer = Buffer::from_bytes(b"new".to_vec());
        save_buffer(&buffer, &path, true).unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"new");
        assert_eq!(fs::read(backup_path(&path)).unwrap(), b"old");
    }

    #[test]
    fn test_overwrite_without_backup() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.txt");
        fs::write(&path, b"old").unwrap();

        save_buffer(&Buffer::from_bytes(b"fresh".to_vec()), &path, false).unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"fresh");
        assert!(!backup_path(&path).exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_save_keeps_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("script.sh");
        fs::write(&path, b"old").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o750)).unwrap();

        save_buffer(&Buffer::from_bytes(b"new".to_vec()), &path, true).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o750);
        assert_eq!(fs::read(backup_path(&path)).unwrap(), b"old");
    }

    #[test]
    fn test_failed_save_leaves_target() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("taken");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("inside"), b"keep").unwrap();

        let err = save_buffer(&Buffer::from_bytes(b"new".to_vec()), &path, true).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed"));
        assert_eq!(fs::read(path.join("inside")).unwrap(), b"keep");
        assert!(!backup_path(&path).exists());
    }

    #[test]
    fn test_backup_path() {
        assert_eq!(backup_path(Path::new("a/b.bin")), PathBuf::from("a/b.bin~"));
    }
}
