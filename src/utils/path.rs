use std::env;
use std::fs::{read_dir, DirEntry};
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use log::{debug, error};

fn is_executable(entry: &DirEntry) -> bool {
    match entry.metadata() {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(e) => {
            debug!("aspsh: metadata error: {:?}", e);
            false
        }
    }
}

fn search_path() -> Vec<PathBuf> {
    match env::var_os("PATH") {
        Some(path) => env::split_paths(&path).collect(),
        None => {
            error!("aspsh: env PATH is not set");
            Vec::new()
        }
    }
}

/// 在 PATH 中查找可执行文件；带 `/` 的名字按路径直接检查。
pub fn find_file_in_path(filename: &str) -> Option<PathBuf> {
    if filename.contains('/') {
        let path = Path::new(filename);
        return path.exists().then(|| path.to_path_buf());
    }
    for dir in search_path() {
        let candidate = dir.join(filename);
        match candidate.metadata() {
            Ok(meta) if meta.is_file() && meta.permissions().mode() & 0o111 != 0 => {
                return Some(candidate);
            }
            Ok(_) => continue,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => debug!("aspsh: stat error: {}: {}", candidate.display(), e),
        }
    }
    None
}

/// PATH 中全部可执行文件名，按 PATH 顺序。
pub fn executables_in_path() -> Vec<String> {
    let mut names = Vec::new();
    for dir in search_path() {
        let list = match read_dir(&dir) {
            Ok(list) => list,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    error!("aspsh: fs read_dir error: {}: {}", dir.display(), e);
                }
                continue;
            }
        };
        for entry in list.flatten() {
            if !is_executable(&entry) {
                continue;
            }
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
    }
    names
}

/// 目录下的条目名，子目录带 `/` 后缀。
pub fn dir_entries(dir: &Path) -> Vec<String> {
    let list = match read_dir(dir) {
        Ok(list) => list,
        Err(e) => {
            debug!("aspsh: fs read_dir error: {}: {}", dir.display(), e);
            return Vec::new();
        }
    };
    let mut names = Vec::new();
    for entry in list.flatten() {
        let Ok(mut name) = entry.file_name().into_string() else {
            continue;
        };
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            name.push('/');
        }
        names.push(name);
    }
    names.sort();
    names
}

pub fn home_dir() -> PathBuf {
    match env::var_os("HOME") {
        Some(home) => PathBuf::from(home),
        None => PathBuf::from("/"),
    }
}

/// 把 HOME 前缀缩写成 `~`。
pub fn tildify(path: &Path) -> String {
    let home = home_dir();
    match path.strip_prefix(&home) {
        Ok(rest) if home != Path::new("/") => {
            if rest.as_os_str().is_empty() {
                "~".to_string()
            } else {
                format!("~/{}", rest.display())
            }
        }
        _ => path.display().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_file_in_path_resolves_sh() {
        assert!(find_file_in_path("sh").is_some());
        assert!(find_file_in_path("definitely_not_a_program_aspsh").is_none());
    }

    #[test]
    fn test_tildify_leaves_foreign_paths() {
        assert_eq!(tildify(Path::new("/nonexistent/x")), "/nonexistent/x");
    }
}
