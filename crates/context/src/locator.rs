use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Manager is the kind of component collection a Locator addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Manager {
    Connections,
    Sources,
    Functions,
    Loads,
    Jobs,
}

impl Manager {
    pub fn as_str(&self) -> &'static str {
        match self {
            Manager::Connections => "connections",
            Manager::Sources => "sources",
            Manager::Functions => "functions",
            Manager::Loads => "loads",
            Manager::Jobs => "jobs",
        }
    }
}

impl FromStr for Manager {
    type Err = super::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "connections" => Manager::Connections,
            "sources" => Manager::Sources,
            "functions" => Manager::Functions,
            "loads" => Manager::Loads,
            "jobs" => Manager::Jobs,
            _ => return Err(super::Error::Locator(format!("unknown manager {s:?}"))),
        })
    }
}

/// Locator is the dotted path `project.manager.name` of a component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Locator {
    pub project: String,
    pub manager: Manager,
    pub name: String,
}

impl Locator {
    pub fn new(project: impl Into<String>, manager: Manager, name: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            manager,
            name: name.into(),
        }
    }

    /// Locator of a sibling component in the same project.
    pub fn sibling(&self, manager: Manager, name: impl Into<String>) -> Self {
        Self::new(self.project.clone(), manager, name)
    }
}

impl FromStr for Locator {
    type Err = super::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hops: Vec<&str> = s.split('.').map(str::trim).filter(|h| !h.is_empty()).collect();
        match hops.as_slice() {
            [project, manager, name] => Ok(Self::new(*project, manager.parse()?, *name)),
            _ => Err(super::Error::Locator(format!(
                "{s:?} is not of the form project.manager.name"
            ))),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.manager.as_str(), self.name)
    }
}
