use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    #[error("Target file already exists. Choose a different target or remove the existing file.")]
    TargetExists(PathBuf),
    #[error("Source DB not found. If you are creating a new DB, you can copy an empty template or run the server to create the default DB.")]
    SourceMissing(PathBuf),
    #[error("Migration failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub bytes: u64,
    pub sha256: String,
}

/// Copies `source` to `target`, refusing to overwrite anything. A partially
/// written target is removed on failure.
pub fn migrate_database(source: &Path, target: &Path) -> Result<MigrationReport, MigrateError> {
    let mut src = match File::open(source) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(MigrateError::SourceMissing(source.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };
    let mut dst = match OpenOptions::new().write(true).create_new(true).open(target) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(MigrateError::TargetExists(target.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };

    let copied = copy_hashing(&mut src, &mut dst).and_then(|r| dst.sync_all().map(|_| r));
    match copied {
        Ok((bytes, sha256)) => {
            tracing::info!(source = %source.display(), target = %target.display(), bytes, "database migrated");
            Ok(MigrationReport { bytes, sha256 })
        }
        Err(e) => {
            drop(dst);
            let _ = std::fs::remove_file(target);
            Err(e.into())
        }
    }
}

fn copy_hashing(src: &mut File, dst: &mut File) -> io::Result<(u64, String)> {
    let mut hasher = Sha256::new();
    let mut tee = Tee { out: dst, hasher: &mut hasher };
    let bytes = io::copy(src, &mut tee)?;
    Ok((bytes, hex::encode(hasher.finalize())))
}

struct Tee<'a> {
    out: &'a mut File,
    hasher: &'a mut Sha256,
}

impl io::Write for Tee<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.out.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("{}-{}", prefix, nanos));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn copies_and_refuses_to_overwrite() {
        let dir = temp_dir("coach-migrate-unit");
        let src = dir.join("a.db");
        let dst = dir.join("b.db");
        std::fs::write(&src, b"sqlite bytes").expect("write");
        let report = migrate_database(&src, &dst).expect("migrate");
        assert_eq!(report.bytes, 12);
        assert_eq!(std::fs::read(&dst).expect("read"), b"sqlite bytes");

        std::fs::write(&src, b"changed").expect("write");
        assert!(matches!(
            migrate_database(&src, &dst),
            Err(MigrateError::TargetExists(_))
        ));
        assert_eq!(std::fs::read(&dst).expect("read"), b"sqlite bytes");
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn report_carries_lowercase_hex_digest() {
        let dir = temp_dir("coach-migrate-unit-digest");
        let src = dir.join("a.db");
        std::fs::write(&src, b"abc").expect("write");
        let report = migrate_database(&src, &dir.join("b.db")).expect("migrate");
        assert_eq!(
            report.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn missing_source_leaves_no_target() {
        let dir = temp_dir("coach-migrate-unit-missing");
        let dst = dir.join("b.db");
        assert!(matches!(
            migrate_database(&dir.join("nope.db"), &dst),
            Err(MigrateError::SourceMissing(_))
        ));
        assert!(!dst.exists());
        let _ = std::fs::remove_dir_all(dir);
    }
}
