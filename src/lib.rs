#![cfg_attr(
    feature = "cargo-clippy",
    warn(
        clippy::manual_filter_map,
        clippy::map_unwrap_or,
        clippy::module_name_repetitions,
        clippy::print_stdout,
        clippy::unwrap_used,
    )
)]

//! A classpath scanner: discovers the ordered set of code-containing
//! locations visible to a running program (directories, archives, nested
//! archives, module descriptors), parses each classfile found within
//! them, and links the results into a queryable type graph.
//!
//! [`scan::run_scan`] is the entry point: given a
//! [`discovery::ClasspathDiscovery`] collaborator and a [`scan::ScanSpec`],
//! it runs the full pipeline described in the crate's design docs —
//! opener phase, ordering, nested-root detection, path scan, masking,
//! classfile scan with upward closure, linking — and returns an immutable
//! [`scan::ScanResult`].

pub mod cancel;
pub mod classfile;
pub mod discovery;
pub mod element;
pub mod errors;
pub mod linker;
pub mod mask;
pub mod manifest;
pub mod nested_archive;
pub mod nested_root;
pub mod order;
pub mod path_resolver;
pub mod resource;
pub mod scan;
pub mod singleton_map;
pub mod upward_closure;
pub mod work_queue;
