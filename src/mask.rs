//! The Masker (§4.7): enforces first-wins semantics over duplicate
//! logical classfile paths across the final classpath order. Walking
//! elements in final order with one shared "already-seen" set is what
//! makes the very first element to claim a logical path the one whose
//! classfile actually gets parsed — everything after it with the same
//! path is dropped before the classfile-scan phase ever sees it.
use std::collections::HashSet;

use crate::element::ClasspathElement;

/// For each element in `final_order`, keeps only the whitelisted
/// classfiles whose logical path has not already been claimed by an
/// earlier element, then claims those paths for itself. Non-classfile
/// resources are untouched — masking is classfile-only (§4.7, §8 "Masker
/// neutrality on non-classfiles").
pub fn mask_classfiles(final_order: &[std::sync::Arc<ClasspathElement>]) {
    let mut seen: HashSet<String> = HashSet::new();
    for element in final_order {
        let first_wins: Vec<_> = element
            .whitelisted_classfiles()
            .into_iter()
            .filter(|resource| seen.insert(resource.logical_path.as_str().to_string()))
            .collect();
        element.set_whitelisted_classfiles(first_wins);
    }
}
