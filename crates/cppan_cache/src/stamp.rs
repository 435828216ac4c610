use std::path::Path;

/// Reads a stamp file; `None` when it is absent or unreadable. The content
/// is the hex hash of whatever was last fetched successfully.
pub fn read_stamp(path: &Path) -> Option<String> {
    let contents = std::fs::read_to_string(path).ok()?;
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

/// Writes a stamp file, creating parent directories as needed.
pub fn write_stamp(path: &Path, hash: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs_err::create_dir_all(parent)?;
    }
    fs_err::write(path, hash)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let stamp = dir.path().join("a/b/pkg.sha256");

        assert_eq!(read_stamp(&stamp), None);
        write_stamp(&stamp, "abc123").unwrap();
        assert_eq!(read_stamp(&stamp).as_deref(), Some("abc123"));
    }
}
