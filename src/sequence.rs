// Ordering of sequential sibling nodes
//
// The backend appends a zero-padded decimal counter of fixed width to every
// sequential node. For equal-width zero-padded strings byte order equals
// numeric order, so the suffixes are compared as text.

use crate::path::leaf;

/// Width of the sequence suffix the backend appends
pub const SEQUENCE_WIDTH: usize = 10;

/// Trailing sequence suffix of a node name, if it is long enough to carry one
pub fn sequence_suffix(name: &str, width: usize) -> Option<&str> {
    let name = leaf(name);
    let start = name.len().checked_sub(width)?;
    name.get(start..)
}

/// Numeric value of the sequence suffix
pub fn sequence_number(name: &str, width: usize) -> Option<u64> {
    let suffix = sequence_suffix(name, width)?;
    if !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

/// Sorts sibling names by their sequence suffix, lowest first
///
/// Names shorter than `width` cannot carry a suffix and are dropped. The sort
/// is stable, equal suffixes keep their input order.
pub fn sort_children<I, S>(names: I, width: usize) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut sorted: Vec<String> = names
        .into_iter()
        .map(Into::into)
        .filter(|name| leaf(name).len() >= width)
        .collect();

    sorted.sort_by(|a, b| {
        let a = leaf(a).as_bytes();
        let b = leaf(b).as_bytes();
        a[a.len() - width..].cmp(&b[b.len() - width..])
    });
    sorted
}
