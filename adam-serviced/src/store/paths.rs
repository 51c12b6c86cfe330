use std::path::{Component, Path, PathBuf};
use shared::protocol::DEFAULT_MEASUREMENT_DIR;

/// Map a workstation-supplied directory name onto a path under `base`.
///
/// Absolute roots, drive prefixes, `.` and `..` are dropped rather than
/// honored, so the result can never escape `base`. If nothing is left the
/// default measurement directory is used.
pub fn resolve_json_directory(requested: &str, base: &Path) -> PathBuf {
    let safe_parts: Vec<_> = Path::new(requested)
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part),
            Component::Prefix(_)
            | Component::RootDir
            | Component::CurDir
            | Component::ParentDir => None,
        })
        .collect();

    if safe_parts.is_empty() {
        return base.join(DEFAULT_MEASUREMENT_DIR);
    }

    let mut resolved = base.to_path_buf();
    resolved.extend(safe_parts);
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_segments_are_dropped() {
        let base = Path::new("/home/line");
        assert_eq!(resolve_json_directory("../../etc", base), base.join("etc"));
        assert_eq!(
            resolve_json_directory("a/../b/./c", base),
            base.join("a").join("b").join("c")
        );
    }

    #[test]
    fn test_absolute_root_is_stripped() {
        let base = Path::new("/home/line");
        assert_eq!(
            resolve_json_directory("/abs/path", base),
            base.join("abs").join("path")
        );
    }

    #[test]
    fn test_empty_result_falls_back_to_default() {
        let base = Path::new("/home/line");
        assert_eq!(resolve_json_directory("", base), base.join("measurements"));
        assert_eq!(resolve_json_directory("../..", base), base.join("measurements"));
        assert_eq!(resolve_json_directory("/", base), base.join("measurements"));
    }

    #[test]
    fn test_plain_name_is_kept() {
        let base = Path::new("/home/line");
        assert_eq!(resolve_json_directory("line_b/eol", base), base.join("line_b/eol"));
    }
}
