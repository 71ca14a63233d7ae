//! The Nested-Root Detector (§4.5): when one element's path is literally
//! a prefix of another's — `/lib` and `/lib/sub.jar` both on the
//! classpath — the outer element's own scan must not also descend into
//! what the inner element already owns as its own root. Directories and
//! archives are detected in separate passes (modules have no on-disk path
//! to compare, so they're skipped entirely).
use std::sync::Arc;

use crate::element::ClasspathElement;

/// Runs both passes (directories, then archives) over `final_order`,
/// calling [`ClasspathElement::set_nested_root_prefixes`] on every
/// element found to contain another.
pub fn detect_nested_roots(final_order: &[Arc<ClasspathElement>]) {
    detect_pass(final_order, ClasspathElement::is_directory);
    detect_pass(final_order, ClasspathElement::is_archive);
}

fn detect_pass(final_order: &[Arc<ClasspathElement>], kind_matches: fn(&ClasspathElement) -> bool) {
    // Only an element of `kind_matches` can be the *outer* container this
    // pass looks for, but what it might contain is not limited to its own
    // kind — a directory containing a jar is exactly scenario 4's shape.
    // Both passes sort the same full (directory + archive) candidate list
    // so the lexicographic "stop at the first non-match" rule below still
    // holds regardless of which kind shows up next in sort order.
    let mut candidates: Vec<(&Arc<ClasspathElement>, String)> = final_order
        .iter()
        .filter_map(|element| element.nesting_path().map(|path| (element, path)))
        .collect();
    candidates.sort_by(|a, b| a.1.cmp(&b.1));

    for i in 0..candidates.len() {
        let (outer, outer_path) = &candidates[i];
        if !kind_matches(outer) {
            continue;
        }
        let mut prefixes = Vec::new();

        for (_, inner_path) in &candidates[i + 1..] {
            match suffix_if_nested(outer_path, inner_path) {
                Some(suffix) => prefixes.push(suffix),
                // Lexicographic order guarantees no further match once one
                // fails (§4.5): every candidate from here on sorts after
                // `inner_path` and so can't share `outer_path` as a
                // prefix either.
                None => break,
            }
        }

        if !prefixes.is_empty() {
            outer.set_nested_root_prefixes(prefixes);
        }
    }
}

/// If `inner` begins with `outer` followed by a `/` or `!` separator, and
/// the remainder contains no further `!`, returns the relative suffix
/// (with a trailing `/`) to register as a nested-root prefix on `outer`.
fn suffix_if_nested(outer: &str, inner: &str) -> Option<String> {
    for separator in ['/', '!'] {
        let prefix = format!("{outer}{separator}");
        if let Some(rest) = inner.strip_prefix(&prefix) {
            if !rest.contains('!') {
                return Some(format!("{rest}/"));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{ElementArena, ElementKind};
    use std::path::PathBuf;

    fn directory(arena: &ElementArena, path: &str) -> Arc<ClasspathElement> {
        arena.insert(|id| {
            ClasspathElement::new(id, ElementKind::Directory { path: PathBuf::from(path) }, path.to_string(), None, 0)
        })
    }

    fn archive(arena: &ElementArena, outer_path: &str) -> Arc<ClasspathElement> {
        arena.insert(|id| {
            ClasspathElement::new(
                id,
                ElementKind::Archive {
                    resolved_path: PathBuf::from(outer_path),
                    outer_filesystem_path: PathBuf::from(outer_path),
                    nested_chain: Vec::new(),
                },
                outer_path.to_string(),
                None,
                0,
            )
        })
    }

    #[test]
    fn directory_containing_an_archive_gets_its_prefix() {
        let arena = ElementArena::new();
        let lib = directory(&arena, "/lib");
        let sub = archive(&arena, "/lib/sub.jar");

        detect_nested_roots(&[lib.clone(), sub.clone()]);

        assert_eq!(lib.nested_root_prefixes(), vec!["sub.jar/".to_string()]);
        assert!(sub.nested_root_prefixes().is_empty());
    }

    #[test]
    fn unrelated_paths_get_no_prefixes() {
        let arena = ElementArena::new();
        let a = directory(&arena, "/a");
        let b = directory(&arena, "/b");

        detect_nested_roots(&[a.clone(), b.clone()]);

        assert!(a.nested_root_prefixes().is_empty());
        assert!(b.nested_root_prefixes().is_empty());
    }

    #[test]
    fn prefix_that_is_not_a_path_boundary_does_not_match() {
        let arena = ElementArena::new();
        let lib = directory(&arena, "/lib");
        let libxyz = directory(&arena, "/libxyz");

        detect_nested_roots(&[lib.clone(), libxyz.clone()]);

        assert!(lib.nested_root_prefixes().is_empty());
    }

    #[test]
    fn directories_and_archives_are_separate_passes() {
        // A directory and an archive that happen to share a path prefix
        // are still compared (mixed containment is real — a directory
        // nested-root pass runs over all directories, independently of
        // the archive pass over all archives) but the point of the
        // separate-pass rule is that a directory never shadows another
        // directory just because an archive sits between them in sort
        // order; exercised implicitly by operating on disjoint vectors.
        let arena = ElementArena::new();
        let lib = directory(&arena, "/lib");
        let nested_dir = directory(&arena, "/lib/classes");

        detect_nested_roots(&[lib.clone(), nested_dir.clone()]);

        assert_eq!(lib.nested_root_prefixes(), vec!["classes/".to_string()]);
    }
}
