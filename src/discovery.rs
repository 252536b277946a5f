//! Expands command line patterns into test files.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use globset::{GlobBuilder, GlobMatcher};
use tracing::{debug, warn};

#[derive(thiserror::Error, Debug)]
pub enum DiscoveryError {
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("failed to read directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Resolve `patterns` against `base` and return matching files, sorted and
/// without duplicates.
///
/// A pattern naming an existing file is taken as-is. Otherwise it is a glob
/// (`*`, `?`, `**`, `[...]`, `{a,b}`), matched case-insensitively. `*` does
/// not cross directory separators, `**` does. Glob syntax in `base` itself is
/// taken literally.
pub fn discover<S: AsRef<str>>(
    patterns: &[S],
    base: &Path,
) -> Result<Vec<PathBuf>, DiscoveryError> {
    let mut found = BTreeSet::new();

    for pattern in patterns {
        let pattern = pattern.as_ref();
        let before = found.len();

        let literal = base.join(pattern);
        if literal.is_file() {
            found.insert(literal);
        } else {
            expand(pattern, base, &mut found)?;
        }

        if found.len() == before {
            warn!("pattern '{}' matched no files", pattern);
        }
    }

    debug!("discovered {} test files", found.len());
    Ok(found.into_iter().collect())
}

fn expand(
    pattern: &str,
    base: &Path,
    found: &mut BTreeSet<PathBuf>,
) -> Result<(), DiscoveryError> {
    let (prefix, glob) = split_pattern(Path::new(pattern));
    if glob.is_empty() {
        return Ok(());
    }

    let matcher = compile(&glob).map_err(|source| DiscoveryError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })?;

    let Some(root) = resolve_dir(base, &prefix) else {
        return Ok(());
    };

    walk(&root, &root, &matcher, found)
}

fn compile(pattern: &str) -> Result<GlobMatcher, globset::Error> {
    Ok(GlobBuilder::new(pattern)
        .case_insensitive(true)
        .literal_separator(true)
        .build()?
        .compile_matcher())
}

/// Split a pattern into its leading components without glob syntax and the
/// remaining glob, joined with `/`.
fn split_pattern(pattern: &Path) -> (PathBuf, String) {
    let mut prefix = PathBuf::new();
    let mut rest: Vec<String> = Vec::new();

    for component in pattern.components() {
        let literal = match component {
            Component::Normal(part) => !has_glob_syntax(&part.to_string_lossy()),
            _ => true,
        };
        if rest.is_empty() && literal {
            prefix.push(component);
        } else {
            rest.push(component.as_os_str().to_string_lossy().into_owned());
        }
    }

    (prefix, rest.join("/"))
}

fn has_glob_syntax(s: &str) -> bool {
    s.contains(['*', '?', '[', ']', '{', '}'])
}

/// Join `prefix` onto `base` one component at a time, falling back to a
/// case-insensitive lookup when the exact name does not exist.
fn resolve_dir(base: &Path, prefix: &Path) -> Option<PathBuf> {
    let mut dir = base.to_path_buf();
    for component in prefix.components() {
        let Component::Normal(name) = component else {
            dir.push(component);
            continue;
        };

        let exact = dir.join(name);
        if exact.is_dir() {
            dir = exact;
            continue;
        }

        let wanted = name.to_string_lossy();
        let entry = std::fs::read_dir(&dir).ok()?.flatten().find(|entry| {
            entry.file_name().to_string_lossy().eq_ignore_ascii_case(&wanted)
                && entry.path().is_dir()
        })?;
        dir = entry.path();
    }

    dir.is_dir().then_some(dir)
}

fn walk(
    root: &Path,
    dir: &Path,
    matcher: &GlobMatcher,
    found: &mut BTreeSet<PathBuf>,
) -> Result<(), DiscoveryError> {
    let entries = std::fs::read_dir(dir).map_err(|source| DiscoveryError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    for entry in entries {
        let entry = entry.map_err(|source| DiscoveryError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|source| DiscoveryError::Io {
            path: path.clone(),
            source,
        })?;

        if file_type.is_dir() {
            // symlinked directories are not followed, so cycles cannot occur
            walk(root, &path, matcher, found)?;
        } else if path.is_file() {
            let relative = path.strip_prefix(root).unwrap_or(&path);
            if matcher.is_match(relative) {
                found.insert(path);
            }
        }
    }

    Ok(())
}
