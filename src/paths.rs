use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static EXE_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the directory containing the executable.
pub fn get_exe_dir() -> &'static PathBuf {
    EXE_DIR.get_or_init(|| {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."))
    })
}

/// Returns the logs directory: `<exe_dir>/logs/`
pub fn get_logs_dir() -> PathBuf {
    get_exe_dir().join("logs")
}

/// Resolves the configured output directory. Absolute paths are used as-is,
/// relative paths are anchored at the executable directory.
pub fn resolve_output_dir(configured: &str) -> PathBuf {
    let p = Path::new(configured);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        get_exe_dir().join(p)
    }
}

/// Ensures the logs and output directories exist. Call at startup.
pub fn ensure_directories(output_dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(get_logs_dir())?;
    std::fs::create_dir_all(output_dir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_output_dir_absolute_passthrough() {
        let abs = if cfg!(windows) { r"C:\data\out" } else { "/data/out" };
        assert_eq!(resolve_output_dir(abs), PathBuf::from(abs));
    }

    #[test]
    fn test_resolve_output_dir_relative_under_exe() {
        let resolved = resolve_output_dir("output");
        assert!(resolved.ends_with("output"));
        assert!(resolved.starts_with(get_exe_dir()));
    }
}
