use crate::{Error, Result};

/// Joins path fragments into a clean absolute-or-relative path
///
/// Duplicate slashes collapse, `.` segments drop out and `..` removes the
/// previous segment. A leading `/` on `base` is kept.
pub fn join<S: AsRef<str>>(base: &str, parts: &[S]) -> String {
    let absolute = base.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();

    let fragments = std::iter::once(base).chain(parts.iter().map(AsRef::as_ref));
    for fragment in fragments {
        for segment in fragment.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                segment => segments.push(segment),
            }
        }
    }

    match (absolute, segments.is_empty()) {
        (true, _) => format!("/{}", segments.join("/")),
        (false, true) => ".".to_string(),
        (false, false) => segments.join("/"),
    }
}

/// Every ancestor of `path` and `path` itself, root-most first
///
/// Empty segments produce no prefix, so `/` alone yields nothing to ensure.
pub fn prefixes(path: &str) -> Result<Vec<String>> {
    if path.is_empty() {
        return Err(Error::InvalidPath {
            path: String::new(),
            reason: "path has no segments",
        });
    }
    if !path.starts_with('/') {
        return Err(Error::InvalidPath {
            path: path.to_string(),
            reason: "path must be absolute",
        });
    }

    let mut current = String::new();
    Ok(path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            current.push('/');
            current.push_str(segment);
            current.clone()
        })
        .collect())
}

/// Last segment of a path
pub fn leaf(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
}

/// Everything before the last segment, `/` for top-level nodes
pub fn parent(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => "/",
        Some(idx) => &trimmed[..idx],
        None => "",
    }
}
