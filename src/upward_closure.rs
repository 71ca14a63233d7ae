//! The Upward-Closure Scheduler (§4.9): when
//! `extendScanningUpwardsToExternalClasses` is enabled, every type name an
//! included classfile references — superclass, interfaces, annotations —
//! gets probed for on the classpath and, if found, scheduled for parsing
//! too, even if it falls outside the include filter. This is what lets a
//! downstream query answer "what does `a.A`'s superclass actually look
//! like" when `x.B` itself was never going to be scanned on its own.
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::classfile::{ClassfileUnit, UnlinkedRecord};
use crate::element::{ClasspathElement, ElementId};
use crate::resource::classfile_path_for_type_name;
use crate::work_queue::WorkQueueHandle;

/// The well-known root of the class hierarchy. Every class without an
/// explicit superclass extends it implicitly, and it is never itself
/// found on a user classpath, so failing to locate it is expected rather
/// than worth a log line (§4.9 step 4).
const JAVA_LANG_OBJECT: &str = "java.lang.Object";

/// The run-wide set of type names already scanned or already scheduled,
/// used to make upward scheduling idempotent (§4.9 step 1, §8 "Upward
/// closure idempotence"): pre-seeded with every included classfile's type
/// name before the classfile-scan phase starts, then grown as upward
/// closure schedules more.
pub struct ScannedNames(Mutex<HashSet<String>>);

impl ScannedNames {
    pub fn new() -> Self {
        ScannedNames(Mutex::new(HashSet::new()))
    }

    /// Unconditionally records `name` as seen (used for pre-seeding).
    pub fn mark_seen(&self, name: String) {
        self.0.lock().expect("scanned names mutex poisoned").insert(name);
    }

    /// Atomic add-if-absent: returns `true` the first time `name` is
    /// claimed, `false` on every subsequent call. Exactly one caller wins
    /// the race to schedule a given name.
    fn claim(&self, name: &str) -> bool {
        self.0
            .lock()
            .expect("scanned names mutex poisoned")
            .insert(name.to_string())
    }
}

impl Default for ScannedNames {
    fn default() -> Self {
        Self::new()
    }
}

pub struct UpwardClosureScheduler {
    final_order: Vec<Arc<ClasspathElement>>,
    scanned_names: Arc<ScannedNames>,
    enabled: bool,
}

impl UpwardClosureScheduler {
    pub fn new(final_order: Vec<Arc<ClasspathElement>>, scanned_names: Arc<ScannedNames>, enabled: bool) -> Self {
        UpwardClosureScheduler {
            final_order,
            scanned_names,
            enabled,
        }
    }

    pub fn element(&self, id: ElementId) -> &Arc<ClasspathElement> {
        self.final_order
            .iter()
            .find(|element| element.id == id)
            .expect("classfile unit references an element outside the final order")
    }

    /// Inspects `record`'s referenced type names and enqueues a
    /// `ClassfileUnit` for each one found on the classpath and not already
    /// claimed. A no-op if upward closure is disabled.
    pub fn schedule(&self, record: &UnlinkedRecord, handle: &WorkQueueHandle<ClassfileUnit>) {
        if !self.enabled {
            return;
        }

        let owner = self.element(record.owning_element).clone();
        for name in record.referenced_type_names() {
            if name == JAVA_LANG_OBJECT {
                continue;
            }
            if !self.scanned_names.claim(name) {
                continue;
            }
            match self.locate(&owner, name) {
                Some((element, resource_path)) => {
                    handle.add_work_unit(ClassfileUnit {
                        element: element.id,
                        resource: resource_path,
                        is_external: true,
                    });
                }
                None => {
                    log::debug!("upward closure: '{name}' not found on the classpath");
                }
            }
        }
    }

    /// Probes `owner` first, then every other element in final order
    /// (§4.9 step 3), for the classfile resource that would hold `name`.
    fn locate(
        &self,
        owner: &Arc<ClasspathElement>,
        name: &str,
    ) -> Option<(Arc<ClasspathElement>, crate::resource::Resource)> {
        let target = classfile_path_for_type_name(name);

        if let Some(resource) = owner.resources().into_iter().find(|r| r.logical_path == target) {
            return Some((owner.clone(), resource));
        }

        self.final_order
            .iter()
            .filter(|element| element.id != owner.id)
            .find_map(|element| {
                element
                    .resources()
                    .into_iter()
                    .find(|r| r.logical_path == target)
                    .map(|resource| (element.clone(), resource))
            })
    }
}
