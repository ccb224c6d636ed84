//! Ref name validation following git-style conventions.
//!
//! Valid ref names:
//! - Must start with `refs/` and have at least one component after it
//! - Must not contain whitespace, `~`, `^`, `:`, `?`, `*`, `[`, `\`
//! - Must not contain `..` or `@{`
//! - Must not end with `/`, `.`, or `.lock`
//! - Components between slashes must be non-empty and not start with `.`

use crate::error::{StoreError, StoreResult};

/// Characters that are forbidden anywhere in a ref name.
const FORBIDDEN_CHARS: &[char] = &[' ', '\t', '\n', '\r', '~', '^', ':', '?', '*', '[', '\\'];

fn invalid(name: &str, reason: impl Into<String>) -> StoreError {
    StoreError::InvalidRefName {
        name: name.to_string(),
        reason: reason.into(),
    }
}

/// Validate a full ref name such as `refs/heads/master`.
///
/// ```
/// use arbor_store::validate_ref_name;
///
/// assert!(validate_ref_name("refs/heads/master").is_ok());
/// assert!(validate_ref_name("refs/heads/feature/auth").is_ok());
/// assert!(validate_ref_name("master").is_err());
/// assert!(validate_ref_name("refs/heads/bad..name").is_err());
/// ```
pub fn validate_ref_name(name: &str) -> StoreResult<()> {
    let rest = name
        .strip_prefix("refs/")
        .ok_or_else(|| invalid(name, "must start with 'refs/'"))?;
    if rest.is_empty() {
        return Err(invalid(name, "missing ref path after 'refs/'"));
    }

    if let Some(ch) = FORBIDDEN_CHARS.iter().find(|ch| name.contains(**ch)) {
        return Err(invalid(name, format!("contains forbidden character: {ch:?}")));
    }
    if name.contains("..") {
        return Err(invalid(name, "must not contain '..'"));
    }
    if name.contains("@{") {
        return Err(invalid(name, "must not contain '@{'"));
    }
    if name.ends_with('/') || name.ends_with('.') || name.ends_with(".lock") {
        return Err(invalid(name, "must not end with '/', '.', or '.lock'"));
    }

    for component in rest.split('/') {
        if component.is_empty() {
            return Err(invalid(name, "path components must not be empty"));
        }
        if component.starts_with('.') {
            return Err(invalid(
                name,
                format!("component must not start with '.': {component:?}"),
            ));
        }
    }

    Ok(())
}
