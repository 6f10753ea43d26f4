use super::activity::ActivityElement;
use super::{Element, ElementId};

/// Named, callable statement list.
///
/// Only activities are accepted as statements; other element kinds are dropped on insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct SubroutineElement {
    pub(crate) id: ElementId,
    pub name: Option<String>,
    pub(crate) statements: Vec<ActivityElement>,
}

impl Default for SubroutineElement {
    fn default() -> Self {
        Self {
            id: ElementId::new(),
            name: None,
            statements: Vec::new(),
        }
    }
}

impl SubroutineElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn id(&self) -> ElementId {
        self.id
    }

    pub fn statements(&self) -> &[ActivityElement] {
        &self.statements
    }

    /// Returns whether the element was accepted.
    pub fn add(&mut self, element: Element) -> bool {
        match element {
            Element::Activity(activity) => {
                self.statements.push(activity);
                true
            }
            other => {
                tracing::debug!(
                    subroutine = self.name.as_deref().unwrap_or_default(),
                    kind = ?other.kind(),
                    "Ignoring non-activity subroutine statement"
                );
                false
            }
        }
    }

    pub fn push(&mut self, activity: ActivityElement) {
        self.statements.push(activity);
    }

    pub fn remove(&mut self, id: ElementId) -> Option<ActivityElement> {
        let index = self
            .statements
            .iter()
            .position(|statement| statement.id == id)?;
        Some(self.statements.remove(index))
    }

    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.statements
            .iter()
            .position(|statement| statement.display_name() == Some(name))
    }

    /// Deep copy; the subroutine and each statement get a fresh identity.
    pub fn duplicate(&self) -> Self {
        Self {
            id: ElementId::new(),
            name: self.name.clone(),
            statements: self
                .statements
                .iter()
                .map(ActivityElement::duplicate)
                .collect(),
        }
    }
}
