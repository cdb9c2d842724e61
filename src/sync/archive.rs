use std::{
    ffi::OsStr,
    io,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use log::info;

/// Name of the directory, next to the moved repository, that holds archived copies.
pub const ARCHIVE_DIR: &str = "archive";

/// Moves `target` into `<parent>/archive/<timestamp>-<name>` and returns the new location.
///
/// The timestamp has microsecond resolution; if the name is still taken a
/// counter is appended until it is not. The move itself is a single rename.
pub fn archive_directory(target: &Path) -> io::Result<PathBuf> {
    let (parent, name) = match (target.parent(), target.file_name()) {
        (Some(parent), Some(name)) => (parent, name),
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot archive {}", target.display()),
            ))
        }
    };

    if name.eq_ignore_ascii_case(ARCHIVE_DIR) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is an archive directory", target.display()),
        ));
    }

    let archive_root = parent.join(ARCHIVE_DIR);
    std::fs::create_dir_all(&archive_root)?;

    let stamp = timestamp();
    let mut attempt = 0;
    let destination = loop {
        let candidate = archive_root.join(archive_name(&stamp, attempt, name));
        if !candidate.exists() {
            break candidate;
        }
        attempt += 1;
    };

    std::fs::rename(target, &destination)?;
    info!("Archived {} to {}", target.display(), destination.display());
    Ok(destination)
}

fn archive_name(stamp: &str, attempt: usize, name: &OsStr) -> PathBuf {
    let mut archived = if attempt == 0 {
        format!("{stamp}-")
    } else {
        format!("{stamp}.{attempt}-")
    };
    archived.push_str(&name.to_string_lossy());
    PathBuf::from(archived)
}

fn timestamp() -> String {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}.{:06}", elapsed.as_secs(), elapsed.subsec_micros())
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn moves_directory_into_archive() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("G").join("Repo");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("local-only.txt"), "keep me").unwrap();

        let archived = archive_directory(&target).unwrap();

        assert!(!target.exists());
        assert_eq!(archived.parent().unwrap(), root.path().join("G").join(ARCHIVE_DIR));
        let file_name = archived.file_name().unwrap().to_string_lossy().into_owned();
        assert!(file_name.ends_with("-Repo"), "{file_name}");
        assert_eq!(
            std::fs::read_to_string(archived.join("local-only.txt")).unwrap(),
            "keep me"
        );
    }

    #[test]
    fn repeated_archives_get_distinct_names() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("Repo");

        let mut archived = Vec::new();
        for _ in 0..3 {
            std::fs::create_dir_all(&target).unwrap();
            archived.push(archive_directory(&target).unwrap());
        }

        archived.sort();
        archived.dedup();
        assert_eq!(archived.len(), 3);
        assert!(archived.iter().all(|path| path.is_dir()));
    }

    #[test]
    fn refuses_to_archive_the_archive_directory() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join(ARCHIVE_DIR);
        std::fs::create_dir_all(&target).unwrap();

        let error = archive_directory(&target).unwrap_err();

        assert_eq!(error.kind(), io::ErrorKind::InvalidInput);
        assert!(target.is_dir());
    }

    #[test]
    fn names_embed_counter_on_collision() {
        assert_eq!(
            archive_name("1.000001", 0, OsStr::new("Repo")),
            PathBuf::from("1.000001-Repo")
        );
        assert_eq!(
            archive_name("1.000001", 2, OsStr::new("Repo")),
            PathBuf::from("1.000001.2-Repo")
        );
    }
}
