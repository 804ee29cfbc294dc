use super::{ContextManager, Error, Manager, Project, Settings, Source};
use persist::{PersistenceManager, PersistorDefinition, SharedDatastore, SharedPersistence};
use pipeline::{ExecutionState, Processor};
use row::naming;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::{Rc, Weak};
use std::sync::Arc;

pub type SharedContext = Rc<RefCell<Context>>;

lazy_static::lazy_static! {
    static ref VARIABLE_RE: regex::Regex =
        regex::Regex::new(r"\$\{([^}]*)\}").expect("is a valid regex");
}

/// Context is an isolated namespace of live components for one execution.
/// Sources and connections are instantiated on first use within a Context,
/// and released when it's cleared.
pub struct Context {
    name: String,
    parent: Option<String>,
    default: bool,
    manager: Weak<ContextManager>,
    project: Rc<Project>,
    settings: Rc<Settings>,
    variables: BTreeMap<String, String>,
    parameters: BTreeMap<String, String>,
    children: Vec<String>,
    sources: BTreeMap<String, Rc<RefCell<Source>>>,
    persistence: PersistenceManager,
    // Connections borrowed from an ancestor.
    adopted: Vec<String>,
    state: Option<Arc<ExecutionState>>,
    cleared: bool,
}

impl Context {
    pub(crate) fn new(
        name: String,
        default: bool,
        manager: Weak<ContextManager>,
        project: Rc<Project>,
        settings: Rc<Settings>,
    ) -> Self {
        Self {
            name,
            parent: None,
            default,
            manager,
            variables: project.config().variables.clone(),
            project,
            settings,
            parameters: BTreeMap::new(),
            children: Vec::new(),
            sources: BTreeMap::new(),
            persistence: PersistenceManager::new(),
            adopted: Vec::new(),
            state: None,
            cleared: false,
        }
    }

    // Seed a new child from its parent.
    pub(crate) fn inherit(&mut self, parent: &Context) {
        self.parent = Some(parent.name.clone());
        self.variables = parent.variables.clone();
        self.parameters = parent.parameters.clone();
        if let Some(state) = &parent.state {
            self.set_state(state.clone());
        }
    }

    pub(crate) fn add_child(&mut self, name: &str) {
        self.children.push(name.to_string());
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn is_default(&self) -> bool {
        self.default
    }

    pub fn is_cleared(&self) -> bool {
        self.cleared
    }

    pub fn project(&self) -> &Rc<Project> {
        &self.project
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn manager(&self) -> Option<Rc<ContextManager>> {
        self.manager.upgrade()
    }

    pub fn state(&self) -> Option<&Arc<ExecutionState>> {
        self.state.as_ref()
    }

    pub fn set_state(&mut self, state: Arc<ExecutionState>) {
        self.persistence.set_state(state.clone());
        self.state = Some(state);
    }

    pub fn is_executable(&self) -> bool {
        self.state.as_ref().map_or(true, |s| s.is_executable())
    }

    pub fn variables(&self) -> &BTreeMap<String, String> {
        &self.variables
    }

    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    /// Set a declared variable.
    pub fn set_variable(&mut self, name: &str, value: impl Into<String>) -> bool {
        match self.variables.get_mut(name) {
            Some(slot) => {
                *slot = value.into();
                true
            }
            None => false,
        }
    }

    /// Accept externally supplied variables. Declared variables are overridden,
    /// and execution parameters and internal parameters are recorded.
    /// Anything else is dropped with a warning.
    pub fn add_variables<I, K, V>(&mut self, variables: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in variables {
            let (key, value) = (key.into(), value.into());

            if let Some(slot) = self.variables.get_mut(&key) {
                *slot = value;
            } else if self.settings.is_execution_parameter(&key) || naming::is_internal(&key) {
                self.parameters.insert(key, value);
            } else {
                tracing::warn!(context = %self.name, variable = %key, "variable is not declared; ignoring it");
            }
        }
    }

    /// Execution parameter `key`, falling back to its configured default.
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters
            .get(key)
            .or_else(|| self.settings.execution_parameters.get(key))
            .map(String::as_str)
    }

    pub fn fetch_size(&self) -> usize {
        self.parameter("fetchSize")
            .and_then(|s| s.parse().ok())
            .unwrap_or(self.settings.fetch_size)
    }

    pub fn bulk_size(&self) -> usize {
        self.parameter("bulkSize")
            .and_then(|s| s.parse().ok())
            .unwrap_or(self.settings.bulk_size)
    }

    /// Replace every `${name}` of `text` with the value of variable `name`.
    pub fn substitute(&self, text: &str) -> Result<String, Error> {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for captures in VARIABLE_RE.captures_iter(text) {
            let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            let name = name.as_str().trim();
            let value = self
                .variables
                .get(name)
                .or_else(|| self.parameters.get(name))
                .ok_or_else(|| Error::UnknownVariable(name.to_string()))?;

            out.push_str(&text[last..whole.start()]);
            out.push_str(value);
            last = whole.end();
        }
        out.push_str(&text[last..]);
        Ok(out)
    }

    /// Source `name` of this Context, instantiated on first use.
    pub fn source(&mut self, name: &str) -> Result<Rc<RefCell<Source>>, Error> {
        if let Some(source) = self.sources.get(name) {
            return Ok(source.clone());
        }
        let config = self.project.source(name)?.clone();
        let locator = self.project.locator(Manager::Sources, name);
        let source = Rc::new(RefCell::new(Source::new(locator, config)));
        self.sources.insert(name.to_string(), source.clone());

        tracing::debug!(context = %self.name, source = name, "instantiated source");
        Ok(source)
    }

    /// Number of sources instantiated in this Context.
    pub fn live_sources(&self) -> usize {
        self.sources.len()
    }

    /// Build a new Processor over source `name` of `ctx`.
    pub fn processor(ctx: &SharedContext, name: &str) -> Result<Processor, Error> {
        let source = ctx.borrow_mut().source(name)?;
        let mut source = source.try_borrow_mut().map_err(|_| {
            let locator = ctx.borrow().project.locator(Manager::Sources, name);
            Error::CyclicSource(locator.to_string())
        })?;
        source.processor(ctx)
    }

    /// Mark source `name` as dirty, so that cached output of it and its dependents isn't reused.
    /// Live dependents are marked as well, and each stays dirty until it's rebuilt.
    pub fn mark_dirty(&mut self, name: &str) -> Result<(), Error> {
        self.source(name)?.borrow_mut().mark_dirty();

        let project = self.project.clone();
        for dependent in project.dependents(name) {
            if let Some(source) = self.sources.get(dependent) {
                if let Ok(mut source) = source.try_borrow_mut() {
                    source.mark_dirty();
                }
            }
        }
        Ok(())
    }

    /// Whether source `name` or anything it transitively depends on is dirty.
    pub fn is_dirty(&self, name: &str) -> bool {
        let mut visited = BTreeSet::new();
        self.is_dirty_from(name, &mut visited)
    }

    fn is_dirty_from<'s>(&'s self, name: &'s str, visited: &mut BTreeSet<&'s str>) -> bool {
        if !visited.insert(name) {
            return false;
        }
        let own = self
            .sources
            .get(name)
            .and_then(|s| s.try_borrow().ok().map(|s| s.is_marked_dirty()))
            .unwrap_or(false);

        own || self
            .project
            .dependencies(name)
            .into_iter()
            .any(|dependency| self.is_dirty_from(dependency, visited))
    }

    /// Persistence of connection `name`. Kept connections are shared with
    /// the parent context, so that child contexts see what it has written.
    pub fn persistence(ctx: &SharedContext, name: &str) -> Result<SharedPersistence, Error> {
        let (config, parent, manager) = {
            let c = ctx.borrow();
            (c.project.connection(name)?.clone(), c.parent.clone(), c.manager())
        };

        if config.keep() {
            let parent = parent.zip(manager).and_then(|(p, m)| m.get(&p));
            if let Some(parent) = parent {
                let persistence = Context::persistence(&parent, name)?;
                let mut c = ctx.borrow_mut();
                if !c.adopted.iter().any(|a| a == name) {
                    c.adopted.push(name.to_string());
                }
                c.persistence.adopt(name, persistence.clone());
                return Ok(persistence);
            }
        }

        let adapter = config.adapter(name);
        let persistence = ctx.borrow_mut().persistence.persistence(&adapter)?;
        Ok(persistence)
    }

    /// New Datastore of `ctx` writing `definition` through connection `name`.
    pub fn datastore(
        ctx: &SharedContext,
        name: &str,
        definition: PersistorDefinition,
    ) -> Result<SharedDatastore, Error> {
        Context::persistence(ctx, name)?;

        let mut c = ctx.borrow_mut();
        let adapter = c.project.connection(name)?.adapter(name);
        let datastore = c.persistence.provide(&adapter, definition)?;
        if let Some(state) = &c.state {
            datastore.borrow_mut().set_state(state.clone());
        }
        Ok(datastore)
    }

    /// Clear `ctx` and, first, all of its children: drop source caches,
    /// close datastores and connections not borrowed from an ancestor,
    /// and detach from the ContextManager. Clearing twice is an error,
    /// as is clearing the default context.
    pub fn clear(ctx: &SharedContext) -> Result<(), Error> {
        let (name, children, manager) = {
            let c = ctx.borrow();
            if c.default {
                return Err(Error::ClearDefault);
            }
            if c.cleared {
                return Err(Error::Cleared(c.name.clone()));
            }
            (c.name.clone(), c.children.clone(), c.manager())
        };

        if let Some(manager) = &manager {
            for child in children.iter().filter_map(|child| manager.get(child)) {
                Context::clear(&child)?;
            }
        }

        {
            let mut c = ctx.borrow_mut();
            for source in c.sources.values() {
                if let Ok(mut source) = source.try_borrow_mut() {
                    source.invalidate();
                }
            }
            c.sources.clear();

            let adopted = std::mem::take(&mut c.adopted);
            let kept: Vec<&str> = adopted.iter().map(String::as_str).collect();
            c.persistence.clear(&kept)?;

            c.variables.clear();
            c.parameters.clear();
            c.children.clear();
            c.state = None;
            c.cleared = true;
        }

        if let Some(manager) = &manager {
            manager.remove(&name);
        }
        tracing::debug!(context = %name, "cleared context");
        Ok(())
    }
}
