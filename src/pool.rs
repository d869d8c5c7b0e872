use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::elements::Element;
use crate::ir::ClassDef;

/// Identity of an in-project method discovered as an invocation target.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) struct ProjectMethod {
    pub(crate) class_name: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
}

impl ProjectMethod {
    pub(crate) fn new(class_name: &str, name: &str, descriptor: &str) -> Self {
        Self {
            class_name: class_name.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        }
    }
}

/// Memoized simulation results for project methods, scoped to one run.
///
/// Only finished results are shared; "currently simulating" is tracked in
/// each simulation's own call chain, so a memoized entry never depends on
/// scheduling order and repeated runs stay deterministic.
#[derive(Default)]
pub(crate) struct MethodPool {
    results: Mutex<BTreeMap<ProjectMethod, Element>>,
}

impl MethodPool {
    pub(crate) fn lookup(&self, method: &ProjectMethod) -> Option<Element> {
        self.results
            .lock()
            .expect("method pool lock")
            .get(method)
            .cloned()
    }

    pub(crate) fn record(&self, method: ProjectMethod, element: Element) {
        self.results
            .lock()
            .expect("method pool lock")
            .entry(method)
            .or_insert(element);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.results.lock().expect("method pool lock").len()
    }
}

/// Per-run analysis state: the loaded project classes and the method pool.
/// Constructed fresh for every top-level analysis invocation.
pub(crate) struct AnalysisContext {
    pub(crate) classes: BTreeMap<String, ClassDef>,
    pub(crate) pool: MethodPool,
}

impl AnalysisContext {
    pub(crate) fn new(classes: Vec<ClassDef>) -> Self {
        let classes = classes
            .into_iter()
            .map(|class| (class.name.clone(), class))
            .collect();
        Self {
            classes,
            pool: MethodPool::default(),
        }
    }

    /// Whether the named class belongs to the analyzed project.
    pub(crate) fn is_project_class(&self, class_name: &str) -> bool {
        self.classes.contains_key(class_name)
    }

    pub(crate) fn find_method(&self, method: &ProjectMethod) -> Option<&crate::ir::MethodDef> {
        self.classes.get(&method.class_name)?.methods.iter().find(
            |candidate| candidate.name == method.name && candidate.descriptor == method.descriptor,
        )
    }
}
