use time::OffsetDateTime;
use time::macros::format_description;

use syncprop_core::parent_path;

pub fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn stamp_label(stamp: i64) -> String {
    let format = format_description!("[year]-[month]-[day] [hour][minute][second]");
    OffsetDateTime::from_unix_timestamp(stamp)
        .ok()
        .and_then(|at| at.format(&format).ok())
        .unwrap_or_else(|| stamp.to_string())
}

/// Name for keeping the previous local content of `path` next to it.
pub fn conflict_file_name(path: &str, stamp: i64) -> String {
    let dir = match parent_path(path) {
        Some(parent) if !parent.is_empty() => format!("{parent}/"),
        _ => String::new(),
    };
    let name = &path[dir.len()..];
    let label = stamp_label(stamp);

    if let Some((stem, ext)) = name.rsplit_once('.')
        && !stem.is_empty()
    {
        return format!("{dir}{stem} (conflicted copy {label}).{ext}");
    }

    format!("{dir}{name} (conflicted copy {label})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_extension_after_marker() {
        assert_eq!(
            conflict_file_name("Docs/A.txt", 0),
            "Docs/A (conflicted copy 1970-01-01 000000).txt"
        );
    }

    #[test]
    fn names_without_extension() {
        assert_eq!(
            conflict_file_name("photos", 1_700_000_000),
            "photos (conflicted copy 2023-11-14 221320)"
        );
    }

    #[test]
    fn dotfiles_are_not_split() {
        assert_eq!(
            conflict_file_name("cfg/.env", 0),
            "cfg/.env (conflicted copy 1970-01-01 000000)"
        );
    }
}
