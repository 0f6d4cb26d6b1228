//! Small shared helpers.

use std::io::Read;
use std::path::Path;

/// Read at most `limit` bytes of a file as lossy UTF-8, appending an
/// ellipsis when the file goes on. Missing or unreadable files yield an
/// empty string; callers decide whether that matters.
pub(crate) fn read_bounded(path: &Path, limit: usize) -> String {
    let Ok(mut file) = std::fs::File::open(path) else {
        return String::new();
    };
    let mut buf = vec![0u8; limit];
    let mut filled = 0;
    while filled < limit {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(_) => break,
        }
    }
    buf.truncate(filled);

    let mut text = String::from_utf8_lossy(&buf).into_owned();
    if filled == limit {
        let mut probe = [0u8; 1];
        if matches!(file.read(&mut probe), Ok(n) if n > 0) {
            text.push_str("...");
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_whole_small_files() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"short diagnostic").unwrap();
        assert_eq!(read_bounded(f.path(), 512), "short diagnostic");
    }

    #[test]
    fn truncates_with_ellipsis() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&[b'x'; 600]).unwrap();
        let text = read_bounded(f.path(), 512);
        assert_eq!(text.len(), 515);
        assert!(text.ends_with("..."));
    }

    #[test]
    fn missing_file_reads_empty() {
        assert_eq!(read_bounded(Path::new("/no/such/file"), 64), "");
    }
}
