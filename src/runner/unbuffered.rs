//! Line buffering for child processes.
//!
//! libc switches stdout to full buffering when it is not a terminal, which
//! would hold a deploy script's output back until several kilobytes pile up.
//! `stdbuf -oL -eL` forces line buffering for programs that use stdio.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Look `program` up in a `PATH`-style list of directories.
pub fn find_in_path(program: &str, path_var: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

/// The `stdbuf` binary from the current `PATH`, if installed.
pub fn find_stdbuf() -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    find_in_path("stdbuf", &path_var)
}

/// Arguments placed in front of the real command.
pub fn stdbuf_args() -> [&'static str; 2] {
    ["-oL", "-eL"]
}

#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
pub fn is_executable(path: &Path) -> bool {
    path.is_file()
}
