use super::{lint_dependencies, Context, Error, Project, Settings, SharedContext};
use pipeline::functions::Registry;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

/// Name of the Context which always exists.
pub const DEFAULT_CONTEXT: &str = "default";

/// ContextManager creates and tracks the Contexts of a Project.
/// Every Context it hands out is registered under a unique name
/// until that Context is cleared.
pub struct ContextManager {
    weak_self: Weak<ContextManager>,
    project: Rc<Project>,
    settings: Rc<Settings>,
    functions: Rc<Registry>,
    contexts: RefCell<BTreeMap<String, SharedContext>>,
    next_id: Cell<usize>,
    default: SharedContext,
}

impl ContextManager {
    pub fn new(project: Project, settings: Settings) -> Rc<Self> {
        Self::with_functions(project, settings, Registry::default())
    }

    pub fn with_functions(project: Project, settings: Settings, functions: Registry) -> Rc<Self> {
        let warnings = lint_dependencies(&project);
        if warnings != 0 {
            tracing::warn!(project = project.name(), warnings, "project has undeclared dependencies");
        }
        let project = Rc::new(project);
        let settings = Rc::new(settings);

        Rc::new_cyclic(|weak_self: &Weak<ContextManager>| {
            let default = Context::new(
                DEFAULT_CONTEXT.to_string(),
                true,
                weak_self.clone(),
                project.clone(),
                settings.clone(),
            );
            Self {
                weak_self: weak_self.clone(),
                project,
                settings,
                functions: Rc::new(functions),
                contexts: RefCell::new(BTreeMap::new()),
                next_id: Cell::new(1),
                default: Rc::new(RefCell::new(default)),
            }
        })
    }

    pub fn project(&self) -> &Rc<Project> {
        &self.project
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn functions(&self) -> Rc<Registry> {
        self.functions.clone()
    }

    pub fn default_context(&self) -> SharedContext {
        self.default.clone()
    }

    /// Create a new Context. A child Context inherits the variables,
    /// parameters and execution state of its `parent`, and is cleared
    /// along with it.
    pub fn provide(&self, parent: Option<&SharedContext>) -> Result<SharedContext, Error> {
        let id = self.next_id.get();
        self.next_id.set(id + 1);

        let name = match parent {
            Some(parent) => {
                let parent = parent.borrow();
                if parent.is_cleared() {
                    return Err(Error::Cleared(parent.name().to_string()));
                }
                format!("{}/{id}", parent.name())
            }
            None => format!("context-{id}"),
        };

        let mut context = Context::new(
            name.clone(),
            false,
            self.weak_self.clone(),
            self.project.clone(),
            self.settings.clone(),
        );
        if let Some(parent) = parent {
            context.inherit(&parent.borrow());
            parent.borrow_mut().add_child(&name);
        }

        let context = Rc::new(RefCell::new(context));
        self.contexts
            .borrow_mut()
            .insert(name.clone(), context.clone());

        tracing::debug!(context = %name, "provided context");
        Ok(context)
    }

    pub fn get(&self, name: &str) -> Option<SharedContext> {
        if name == DEFAULT_CONTEXT {
            return Some(self.default.clone());
        }
        self.contexts.borrow().get(name).cloned()
    }

    pub(crate) fn remove(&self, name: &str) {
        self.contexts.borrow_mut().remove(name);
    }

    /// Names of the live Contexts, other than the default one.
    pub fn names(&self) -> Vec<String> {
        self.contexts.borrow().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.contexts.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.borrow().is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn manager() -> Rc<ContextManager> {
        let project = Project::from_yaml(
            r#"
name: demo
variables: {region: north}
sources:
  regions:
    type: rows
    columns: [{name: region}]
    rows: [["${region}"]]
"#,
        )
        .unwrap();
        ContextManager::new(project, Settings::default())
    }

    #[test]
    fn test_children_are_cleared_with_their_parent() {
        let manager = manager();
        let root = manager.provide(None).unwrap();
        let child = manager.provide(Some(&root)).unwrap();
        let sibling = manager.provide(Some(&root)).unwrap();
        let grandchild = manager.provide(Some(&child)).unwrap();

        assert_eq!(
            manager.names(),
            vec!["context-1", "context-1/2", "context-1/2/4", "context-1/3"]
        );
        assert_eq!(grandchild.borrow().variable("region"), Some("north"));

        for ctx in [&child, &sibling, &grandchild] {
            Context::processor(ctx, "regions").unwrap().run().unwrap();
            assert_eq!(ctx.borrow().live_sources(), 1);
        }

        Context::clear(&root).unwrap();
        assert!(manager.is_empty());
        for ctx in [&child, &sibling, &grandchild] {
            assert!(ctx.borrow().is_cleared());
            assert_eq!(ctx.borrow().live_sources(), 0);
        }

        insta::assert_snapshot!(
            manager.provide(Some(&root)).err().unwrap(),
            @"context context-1 was already cleared"
        );
    }

    #[test]
    fn test_clearing_twice_or_the_default_fails() {
        let manager = manager();
        let ctx = manager.provide(None).unwrap();

        Context::clear(&ctx).unwrap();
        insta::assert_snapshot!(
            Context::clear(&ctx).unwrap_err(),
            @"context context-1 was already cleared"
        );
        insta::assert_snapshot!(
            Context::clear(&manager.default_context()).unwrap_err(),
            @"the default context cannot be cleared"
        );
    }
}
