//! File-based secret loading for the two provider API keys (spec §6:
//! "Secrets read from files at configurable paths").

use std::path::Path;

/// Read a secret from a file and trim surrounding whitespace. Returns
/// `None` if the file is absent or empty — callers decide whether that's
/// fatal (forecast key) or a fallback trigger (route key).
pub fn read_secret(path: &str) -> Option<String> {
    match std::fs::read_to_string(Path::new(path)) {
        Ok(contents) => {
            let trimmed = contents.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Err(e) => {
            tracing::debug!("secret file {} not readable: {}", path, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, content: &str) -> String {
        let path = std::env::temp_dir().join(format!("triprisk-secret-test-{}-{}", std::process::id(), name));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path.to_string_lossy().to_string()
    }

    #[test]
    fn test_read_secret_trims_whitespace() {
        let path = write_temp("trim", "  sk-abc123\n");
        assert_eq!(read_secret(&path), Some("sk-abc123".to_string()));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_read_secret_empty_file_is_none() {
        let path = write_temp("empty", "   \n");
        assert_eq!(read_secret(&path), None);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_read_secret_missing_file_is_none() {
        assert_eq!(read_secret("/nonexistent/path/to/secret"), None);
    }
}
