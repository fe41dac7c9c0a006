use std::path::{Path, PathBuf};

/// Per-user socket in the system temp directory: `<tmp>/eye-<uid>.sock`.
pub fn socket_path() -> PathBuf {
    socket_path_in(&std::env::temp_dir())
}

pub fn socket_path_in(dir: &Path) -> PathBuf {
    dir.join(format!("eye-{}.sock", current_uid()))
}

fn current_uid() -> u32 {
    // SAFETY: getuid has no preconditions and never fails.
    unsafe { libc::getuid() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_path_is_per_user() {
        let path = socket_path_in(Path::new("/tmp"));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("eye-"));
        assert!(name.ends_with(".sock"));
        assert_eq!(name, format!("eye-{}.sock", current_uid()));
    }
}
