//! Unique, filesystem-safe names for roots and tree entries.

use std::sync::LazyLock;

use regex::Regex;

static UNSAFE_RUNS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[@#%^&\\|=\[\]~`,<>?:;"/]+"#).expect("static name pattern is valid")
});

/// Reduce an arbitrary string (often a URL or path) to a display-safe base
/// name: the last `/` segment, without a `.git` suffix, with runs of unsafe
/// characters collapsed to a single space.
pub fn base_name(input: &str) -> String {
    let last = input.rsplit('/').next().unwrap_or(input);
    let last = last.strip_suffix(".git").unwrap_or(last);
    let cleaned = UNSAFE_RUNS.replace_all(last, " ");
    let trimmed = cleaned.trim();
    if matches!(trimmed, "" | "." | "..") {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Generate a name from `input` that `is_taken` rejects nowhere.
///
/// Collisions are resolved by appending `-2`, `-3`, and so on.
///
/// ```
/// use arbor_vfs::names::unique_name;
///
/// let taken = ["repo", "repo-2"];
/// let name = unique_name("https://example.com/me/repo.git", |n| taken.contains(&n));
/// assert_eq!(name, "repo-3");
/// ```
pub fn unique_name(input: &str, is_taken: impl Fn(&str) -> bool) -> String {
    let base = base_name(input);
    let mut name = base.clone();
    let mut n = 1u64;
    while is_taken(&name) {
        n += 1;
        name = format!("{base}-{n}");
    }
    name
}
