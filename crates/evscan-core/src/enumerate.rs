// Evscan Device Enumeration
// Glob expansion, character-device filtering and bulk open

use std::fmt;
use std::fs;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::device::InputDevice;

/// Pattern used when the caller does not supply one.
pub const DEFAULT_GLOB: &str = "/dev/input/event*";

/// Result type for enumeration
pub type EnumerateResult<T> = Result<T, EnumerateError>;

/// Errors that can occur while expanding a device glob
#[derive(Debug, thiserror::Error)]
pub enum EnumerateError {
    #[error("invalid glob pattern {pattern:?}: {reason}")]
    Pattern { pattern: String, reason: String },
}

fn has_meta(component: &str) -> bool {
    component.contains(['*', '?', '[', '\\'])
}

/// Translate one path component of a glob into an anchored regex.
///
/// Supports `*`, `?`, and `[...]` classes (with `!` or `^` negation).
/// Wildcards never match `/`.
pub fn component_regex(component: &str) -> Result<Regex, String> {
    let mut out = String::from("^");
    let mut chars = component.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '[' => {
                out.push('[');
                if matches!(chars.peek(), Some(&'!') | Some(&'^')) {
                    chars.next();
                    out.push('^');
                }
                let mut closed = false;
                let mut first = true;
                while let Some(c) = chars.next() {
                    match c {
                        ']' if !first => {
                            closed = true;
                            break;
                        }
                        '\\' | '[' | ']' | '&' | '~' => {
                            out.push('\\');
                            out.push(c);
                        }
                        '-' => out.push('-'),
                        _ => out.push(c),
                    }
                    first = false;
                }
                if !closed {
                    return Err("unterminated character class".to_string());
                }
                out.push(']');
            }
            '\\' => match chars.next() {
                Some(escaped) => out.push_str(&regex::escape(&escaped.to_string())),
                None => return Err("trailing backslash".to_string()),
            },
            _ => out.push_str(&regex::escape(&c.to_string())),
        }
    }

    out.push('$');
    Regex::new(&out).map_err(|e| e.to_string())
}

/// Expand `pattern` into the existing paths it matches.
///
/// Matches are sorted by name within each directory. Directories that are
/// missing or cannot be read match nothing; only a malformed pattern is an
/// error.
pub fn expand_glob(pattern: &str) -> EnumerateResult<Vec<PathBuf>> {
    let invalid = |reason: String| EnumerateError::Pattern {
        pattern: pattern.to_string(),
        reason,
    };

    if pattern.is_empty() {
        return Err(invalid("empty pattern".to_string()));
    }

    let mut candidates = vec![if pattern.starts_with('/') {
        PathBuf::from("/")
    } else {
        PathBuf::new()
    }];

    for component in pattern.split('/').filter(|c| !c.is_empty()) {
        if !has_meta(component) {
            for candidate in &mut candidates {
                candidate.push(component);
            }
            continue;
        }

        let matcher = component_regex(component).map_err(invalid)?;
        let mut next = Vec::new();
        for dir in &candidates {
            next.extend(matching_entries(dir, &matcher));
        }
        candidates = next;
    }

    candidates.retain(|path| !path.as_os_str().is_empty() && fs::symlink_metadata(path).is_ok());
    Ok(candidates)
}

fn matching_entries(dir: &Path, matcher: &Regex) -> Vec<PathBuf> {
    let read_from = if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    };

    let entries = match fs::read_dir(read_from) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound || e.raw_os_error() == Some(libc::ENOTDIR) => {
            return Vec::new()
        }
        Err(e) => {
            log::debug!("skipping {}: {}", read_from.display(), e);
            return Vec::new();
        }
    };

    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| matcher.is_match(name))
        .collect();
    names.sort();

    names.into_iter().map(|name| dir.join(name)).collect()
}

/// Whether `path` exists and is a character device node.
pub fn is_input_device<P: AsRef<Path>>(path: P) -> bool {
    fs::metadata(path)
        .map(|meta| meta.file_type().is_char_device())
        .unwrap_or(false)
}

/// Character-device paths matching `pattern`, in glob order.
pub fn list_input_device_paths(pattern: &str) -> EnumerateResult<Vec<PathBuf>> {
    let mut paths = expand_glob(pattern)?;
    paths.retain(|path| is_input_device(path));
    Ok(paths)
}

/// Open every path with `open`, keeping the successes in order.
///
/// A path that fails to open is logged and left out; it never aborts the
/// rest of the listing.
pub fn open_all<T, E, F>(paths: &[PathBuf], mut open: F) -> Vec<T>
where
    F: FnMut(&Path) -> Result<T, E>,
    E: fmt::Display,
{
    paths
        .iter()
        .filter_map(|path| match open(path) {
            Ok(device) => Some(device),
            Err(e) => {
                log::debug!("skipping {}: {}", path.display(), e);
                None
            }
        })
        .collect()
}

/// Open every input device matching `pattern` (default [`DEFAULT_GLOB`]).
///
/// Devices that cannot be opened or probed are skipped, as are directories
/// that cannot be read. Only a bad pattern is reported as an error.
pub fn list_input_devices(pattern: Option<&str>) -> EnumerateResult<Vec<InputDevice>> {
    let paths = list_input_device_paths(pattern.unwrap_or(DEFAULT_GLOB))?;
    Ok(open_all(&paths, |path| InputDevice::open(path)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_regex_star() {
        let re = component_regex("event*").unwrap();
        assert!(re.is_match("event0"));
        assert!(re.is_match("event"));
        assert!(re.is_match("event17"));
        assert!(!re.is_match("mouse0"));
        assert!(!re.is_match("xevent0"));
    }

    #[test]
    fn test_component_regex_question_and_class() {
        let re = component_regex("event?").unwrap();
        assert!(re.is_match("event3"));
        assert!(!re.is_match("event12"));

        let re = component_regex("event[0-2]").unwrap();
        assert!(re.is_match("event1"));
        assert!(!re.is_match("event3"));

        let re = component_regex("event[!0]").unwrap();
        assert!(re.is_match("event1"));
        assert!(!re.is_match("event0"));
    }

    #[test]
    fn test_component_regex_escapes_literals() {
        let re = component_regex("by-id.kbd+*").unwrap();
        assert!(re.is_match("by-id.kbd+event"));
        assert!(!re.is_match("by-idXkbd+event"));
    }

    #[test]
    fn test_component_regex_errors() {
        assert!(component_regex("event[0-").is_err());
        assert!(component_regex("event\\").is_err());
    }

    #[test]
    fn test_expand_glob_rejects_bad_pattern() {
        let err = expand_glob("/dev/input/event[").unwrap_err();
        assert!(matches!(err, EnumerateError::Pattern { .. }));
        assert!(expand_glob("").is_err());
    }

    #[test]
    fn test_expand_glob_missing_directory() {
        assert!(expand_glob("/nonexistent/evscan/event*").unwrap().is_empty());
    }

    #[test]
    fn test_escape_only_component_is_unescaped() {
        assert!(has_meta("a\\b"));
        let re = component_regex("a\\b").unwrap();
        assert!(re.is_match("ab"));
        assert!(!re.is_match("a\\b"));
    }

    #[test]
    fn test_matching_entries_on_a_file_is_empty() {
        let matcher = component_regex("*").unwrap();
        assert!(matching_entries(Path::new("/dev/null"), &matcher).is_empty());
    }

    #[test]
    fn test_is_input_device() {
        assert!(is_input_device("/dev/null"));
        assert!(!is_input_device("/"));
        assert!(!is_input_device("/nonexistent/evscan/event0"));
    }

    #[test]
    fn test_open_all_skips_failures_in_order() {
        let paths: Vec<PathBuf> = ["a", "b", "c", "d"].iter().map(PathBuf::from).collect();
        let opened = open_all(&paths, |path| {
            if path == Path::new("b") {
                Err("permission denied")
            } else {
                Ok(path.to_path_buf())
            }
        });
        assert_eq!(
            opened,
            vec![PathBuf::from("a"), PathBuf::from("c"), PathBuf::from("d")]
        );
    }
}
