//! Reversible escaping of module paths and versions
//!
//! Module paths and versions are case-sensitive, but they end up as
//! directory names on filesystems that may not be. Every uppercase letter is
//! therefore written as the escape marker `!` followed by its lowercase form
//! (`github.com/Azure` becomes `github.com/!azure`), which makes the escaped
//! form safe both as a URL segment and as a path component.
//!
//! The functions here are pure. `unescape_*` rejects every string that the
//! matching `escape_*` could not have produced, so
//! `unescape_path(&escape_path(x)?)? == x` for every valid `x`.

use crate::constants::protocol::ESCAPE_MARKER;
use crate::errors::{CodecError, CodecResult};

/// Escape a module path for use in URLs and cache paths
///
/// # Errors
///
/// Returns `CodecError::InvalidModulePath` if `path` is not a valid module path
pub fn escape_path(path: &str) -> CodecResult<String> {
    check_path(path)?;
    Ok(escape_string(path))
}

/// Decode an escaped module path
///
/// # Errors
///
/// Returns `CodecError::InvalidEscape` for malformed escape sequences and
/// `CodecError::InvalidModulePath` if the decoded path is not valid
pub fn unescape_path(escaped: &str) -> CodecResult<String> {
    let path = unescape_string(escaped).ok_or_else(|| CodecError::InvalidEscape {
        what: "module path",
        input: escaped.to_string(),
    })?;
    check_path(&path)?;
    Ok(path)
}

/// Escape a version for use in URLs and cache paths
///
/// # Errors
///
/// Returns `CodecError::InvalidVersion` if `version` is not a valid version element
pub fn escape_version(version: &str) -> CodecResult<String> {
    check_version(version)?;
    Ok(escape_string(version))
}

/// Decode an escaped version
///
/// # Errors
///
/// Returns `CodecError::InvalidEscape` for malformed escape sequences and
/// `CodecError::InvalidVersion` if the decoded version is not valid
pub fn unescape_version(escaped: &str) -> CodecResult<String> {
    let version = unescape_string(escaped).ok_or_else(|| CodecError::InvalidEscape {
        what: "version",
        input: escaped.to_string(),
    })?;
    check_version(&version)?;
    Ok(version)
}

/// Validate a decoded module path
///
/// A module path is a non-empty sequence of `/`-separated elements. Each
/// element is made of ASCII letters, digits and `-._~`, and may neither
/// begin nor end with a dot. The first element names a host: it must
/// contain a dot, use only lowercase letters, digits, `.` and `-`, and not
/// start with `-`.
pub fn check_path(path: &str) -> CodecResult<()> {
    let invalid = |reason: &str| CodecError::InvalidModulePath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    if path.is_empty() {
        return Err(invalid("empty string"));
    }
    if path.starts_with('/') || path.ends_with('/') {
        return Err(invalid("leading or trailing slash"));
    }

    for element in path.split('/') {
        check_path_element(element).map_err(|reason| invalid(&reason))?;
    }

    let host = path.split('/').next().unwrap_or_default();
    if !host.contains('.') {
        return Err(invalid("missing dot in first path element"));
    }
    if host.starts_with('-') {
        return Err(invalid("leading dash in first path element"));
    }
    if let Some(c) = host
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '.' || *c == '-'))
    {
        return Err(invalid(&format!("invalid char {c:?} in first path element")));
    }

    Ok(())
}

/// Validate a decoded version
///
/// Versions are a single element of ASCII letters, digits and `-._~+`. Both
/// semantic tags (`v1.2.3-rc.1+meta`) and branch names (`main`) qualify.
pub fn check_version(version: &str) -> CodecResult<()> {
    let invalid = |reason: String| CodecError::InvalidVersion {
        version: version.to_string(),
        reason,
    };

    if version.is_empty() {
        return Err(invalid("empty string".to_string()));
    }
    if version == "." || version == ".." {
        return Err(invalid("reserved name".to_string()));
    }
    if let Some(c) = version.chars().find(|c| !is_version_char(*c)) {
        return Err(invalid(format!("invalid char {c:?}")));
    }
    Ok(())
}

fn check_path_element(element: &str) -> Result<(), String> {
    if element.is_empty() {
        return Err("empty path element".to_string());
    }
    if element.starts_with('.') || element.ends_with('.') {
        return Err(format!("leading or trailing dot in path element {element:?}"));
    }
    if let Some(c) = element.chars().find(|c| !is_path_char(*c)) {
        return Err(format!("invalid char {c:?}"));
    }
    Ok(())
}

fn is_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~')
}

fn is_version_char(c: char) -> bool {
    is_path_char(c) || c == '+'
}

fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for c in s.chars() {
        if c.is_ascii_uppercase() {
            out.push(ESCAPE_MARKER);
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Reverse `escape_string`, returning `None` for any input it cannot produce
fn unescape_string(escaped: &str) -> Option<String> {
    let mut out = String::with_capacity(escaped.len());
    let mut bang = false;

    for c in escaped.chars() {
        if !c.is_ascii() {
            return None;
        }
        if bang {
            bang = false;
            if !c.is_ascii_lowercase() {
                return None;
            }
            out.push(c.to_ascii_uppercase());
            continue;
        }
        if c == ESCAPE_MARKER {
            bang = true;
            continue;
        }
        if c.is_ascii_uppercase() {
            return None;
        }
        out.push(c);
    }

    if bang {
        return None;
    }
    Some(out)
}
