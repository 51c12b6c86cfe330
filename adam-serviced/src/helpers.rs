//! File naming helpers shared by every workstation.

use std::path::{Component, Path, PathBuf};
use chrono::{DateTime, Local};

/// `year_month_day_hour_minute_second` of local time
pub fn timestamp_extension(now: DateTime<Local>) -> String {
    let extension = now.format("%Y_%m_%d_%H_%M_%S").to_string();
    tracing::info!("Generated timestamp extension: {}", extension);
    extension
}

/// `YYYY/MM_DD` of local time, with the platform separator
pub fn timestamp_subpath(now: DateTime<Local>) -> String {
    let year = now.format("%Y").to_string();
    let day = now.format("%m_%d").to_string();
    let subpath = Path::new(&year).join(day).to_string_lossy().into_owned();
    tracing::info!("Generated timestamp subpath: {}", subpath);
    subpath
}

/// Join path components and normalize the result lexically.
/// An absolute component discards everything before it.
pub fn construct_path<S: AsRef<str>>(parts: &[S]) -> String {
    let mut joined = PathBuf::new();
    for part in parts {
        joined.push(part.as_ref());
    }
    let result = normalize(&joined).to_string_lossy().into_owned();
    tracing::info!("Constructed path: {}", result);
    result
}

/// Components joined with underscores
pub fn file_prefix<S: AsRef<str>>(parts: &[S]) -> String {
    let result = parts.iter().map(AsRef::as_ref).collect::<Vec<_>>().join("_");
    tracing::info!("Generated file prefix: {}", result);
    result
}

/// Collapse `.` and `name/..` without touching the filesystem.
/// `..` directly under a root is dropped; leading `..` of a relative path is kept.
fn normalize(path: &Path) -> PathBuf {
    let mut out: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }

    if out.is_empty() {
        return PathBuf::from(".");
    }
    out.iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 3, 7, 9, 5, 2).unwrap()
    }

    #[test]
    fn test_timestamp_formats() {
        assert_eq!(timestamp_extension(fixed_time()), "2025_03_07_09_05_02");
        let expected = Path::new("2025").join("03_07");
        assert_eq!(timestamp_subpath(fixed_time()), expected.to_string_lossy());
    }

    #[test]
    fn test_file_prefix_joins_with_underscore() {
        assert_eq!(file_prefix(&["SN123", "A7V", "eol"]), "SN123_A7V_eol");
        assert_eq!(file_prefix(&["single"]), "single");
    }

    #[cfg(unix)]
    #[test]
    fn test_construct_path_normalizes() {
        assert_eq!(construct_path(&["results", "SN1", "..", "SN2", "./run"]), "results/SN2/run");
        assert_eq!(construct_path(&["a", "/srv", "b"]), "/srv/b");
        assert_eq!(construct_path(&["..", "x"]), "../x");
        assert_eq!(construct_path(&["/", "..", "etc"]), "/etc");
        assert_eq!(construct_path(&["a", ".."]), ".");
        assert_eq!(construct_path(&["a//b/"]), "a/b");
    }
}
