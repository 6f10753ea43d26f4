//! Timeline definition model.
//!
//! A definition exclusively owns an ordered list of elements; subroutines own their
//! statements. Upward navigation goes through a child → parent table kept by the
//! definition, never through references held by the children.

mod activity;
mod persist;
mod subroutine;
mod sync_pattern;
mod time_text;
mod trigger;

pub use activity::{ActivityElement, JumpTarget, NoticeDevice};
pub use subroutine::SubroutineElement;
pub use sync_pattern::SyncPattern;
pub use time_text::{format_time, parse_time};
pub use trigger::{DefaultElement, TriggerElement};

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(Uuid);

impl ElementId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[cfg(test)]
    pub(crate) const fn nil() -> Self {
        Self(Uuid::nil())
    }
}

impl Default for ElementId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(formatter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Default,
    Activity,
    Trigger,
    Subroutine,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Default(DefaultElement),
    Activity(ActivityElement),
    Trigger(TriggerElement),
    Subroutine(SubroutineElement),
}

impl Element {
    pub fn id(&self) -> ElementId {
        match self {
            Element::Default(element) => element.id,
            Element::Activity(element) => element.id,
            Element::Trigger(element) => element.id,
            Element::Subroutine(element) => element.id,
        }
    }

    pub fn kind(&self) -> ElementKind {
        match self {
            Element::Default(_) => ElementKind::Default,
            Element::Activity(_) => ElementKind::Activity,
            Element::Trigger(_) => ElementKind::Trigger,
            Element::Subroutine(_) => ElementKind::Subroutine,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Element::Default(element) => element.name.as_deref(),
            Element::Activity(element) => element.display_name(),
            Element::Trigger(element) => element.display_name(),
            Element::Subroutine(element) => element.name.as_deref(),
        }
    }

    pub fn as_activity(&self) -> Option<&ActivityElement> {
        match self {
            Element::Activity(activity) => Some(activity),
            _ => None,
        }
    }

    pub fn as_activity_mut(&mut self) -> Option<&mut ActivityElement> {
        match self {
            Element::Activity(activity) => Some(activity),
            _ => None,
        }
    }

    pub fn as_trigger(&self) -> Option<&TriggerElement> {
        match self {
            Element::Trigger(trigger) => Some(trigger),
            _ => None,
        }
    }

    pub fn as_subroutine(&self) -> Option<&SubroutineElement> {
        match self {
            Element::Subroutine(subroutine) => Some(subroutine),
            _ => None,
        }
    }

    pub fn as_subroutine_mut(&mut self) -> Option<&mut SubroutineElement> {
        match self {
            Element::Subroutine(subroutine) => Some(subroutine),
            _ => None,
        }
    }

    pub fn duplicate(&self) -> Self {
        match self {
            Element::Default(element) => Element::Default(element.duplicate()),
            Element::Activity(element) => Element::Activity(element.duplicate()),
            Element::Trigger(element) => Element::Trigger(element.duplicate()),
            Element::Subroutine(element) => Element::Subroutine(element.duplicate()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locale {
    #[default]
    JA,
    EN,
    FR,
    DE,
    KO,
    CN,
}

impl Locale {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "JA" => Some(Self::JA),
            "EN" => Some(Self::EN),
            "FR" => Some(Self::FR),
            "DE" => Some(Self::DE),
            "KO" => Some(Self::KO),
            "CN" => Some(Self::CN),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JA => "JA",
            Self::EN => "EN",
            Self::FR => "FR",
            Self::DE => "DE",
            Self::KO => "KO",
            Self::CN => "CN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParentRef {
    Root,
    Subroutine(ElementId),
}

/// Statement list that a cursor can walk: the root list or one subroutine,
/// identified by the subroutine's index in the root list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Root,
    Subroutine(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Statement { scope: Scope, index: usize },
    Subroutine { index: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedTarget {
    pub element: ElementId,
    pub target: String,
    pub is_call: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TimelineDefinition {
    pub name: String,
    pub zone: String,
    pub locale: Locale,
    pub(crate) file: Option<PathBuf>,
    pub(crate) is_active: bool,
    elements: Vec<Element>,
    parents: HashMap<ElementId, ParentRef>,
}

impl TimelineDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    pub fn file_name(&self) -> Option<String> {
        self.file
            .as_deref()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().to_string())
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub(crate) fn elements_mut(&mut self) -> &mut [Element] {
        &mut self.elements
    }

    pub fn add(&mut self, element: Element) -> ElementId {
        let index = self.elements.len();
        self.insert(index, element)
    }

    /// Inserts at `index`, clamped to the list length. An element whose identity is
    /// already in this definition is inserted as a fresh duplicate; the returned id is
    /// the one actually stored.
    pub fn insert(&mut self, index: usize, mut element: Element) -> ElementId {
        if self.shares_identity(&element) {
            element = element.duplicate();
        }
        let id = element.id();
        self.index_parents(&element);
        let index = index.min(self.elements.len());
        self.elements.insert(index, element);
        id
    }

    /// Adds a statement to the subroutine `subroutine` and returns its id; non-activities
    /// are rejected. A statement already in this definition is added as a duplicate.
    pub fn add_statement(
        &mut self,
        subroutine: ElementId,
        mut element: Element,
    ) -> Option<ElementId> {
        if self.shares_identity(&element) {
            element = element.duplicate();
        }
        let statement_id = element.id();
        let target = self
            .elements
            .iter_mut()
            .filter_map(Element::as_subroutine_mut)
            .find(|candidate| candidate.id == subroutine)?;

        if !target.add(element) {
            return None;
        }

        self.parents
            .insert(statement_id, ParentRef::Subroutine(subroutine));
        Some(statement_id)
    }

    /// Removes an element from whichever list owns it.
    pub fn remove(&mut self, id: ElementId) -> Option<Element> {
        match self.parents.get(&id).copied()? {
            ParentRef::Root => {
                let index = self.elements.iter().position(|element| element.id() == id)?;
                let removed = self.elements.remove(index);
                self.unindex_parents(&removed);
                Some(removed)
            }
            ParentRef::Subroutine(owner) => {
                let removed = self
                    .elements
                    .iter_mut()
                    .filter_map(Element::as_subroutine_mut)
                    .find(|subroutine| subroutine.id == owner)?
                    .remove(id)?;
                self.parents.remove(&id);
                Some(Element::Activity(removed))
            }
        }
    }

    /// Clones an element with fresh identities and inserts it right after the source.
    pub fn duplicate_element(&mut self, id: ElementId) -> Option<ElementId> {
        match self.parents.get(&id).copied()? {
            ParentRef::Root => {
                let index = self.elements.iter().position(|element| element.id() == id)?;
                let copy = self.elements[index].duplicate();
                Some(self.insert(index + 1, copy))
            }
            ParentRef::Subroutine(owner) => {
                let subroutine = self
                    .elements
                    .iter_mut()
                    .filter_map(Element::as_subroutine_mut)
                    .find(|subroutine| subroutine.id == owner)?;
                let index = subroutine
                    .statements
                    .iter()
                    .position(|statement| statement.id == id)?;
                let copy = subroutine.statements[index].duplicate();
                let copy_id = copy.id;
                subroutine.statements.insert(index + 1, copy);
                self.parents.insert(copy_id, ParentRef::Subroutine(owner));
                Some(copy_id)
            }
        }
    }

    pub fn parent_of(&self, id: ElementId) -> Option<ParentRef> {
        self.parents.get(&id).copied()
    }

    pub fn activity(&self, id: ElementId) -> Option<&ActivityElement> {
        self.activities().find(|activity| activity.id == id)
    }

    /// Every activity, root ones and subroutine statements, in definition order.
    pub fn activities(&self) -> impl Iterator<Item = &ActivityElement> {
        self.elements.iter().flat_map(|element| match element {
            Element::Activity(activity) => std::slice::from_ref(activity).iter(),
            Element::Subroutine(subroutine) => subroutine.statements.iter(),
            _ => Default::default(),
        })
    }

    pub fn subroutine_by_name(&self, name: &str) -> Option<(usize, &SubroutineElement)> {
        self.elements
            .iter()
            .enumerate()
            .find_map(|(index, element)| match element {
                Element::Subroutine(subroutine) if subroutine.name.as_deref() == Some(name) => {
                    Some((index, subroutine))
                }
                _ => None,
            })
    }

    pub(crate) fn scope_len(&self, scope: Scope) -> usize {
        match scope {
            Scope::Root => self.elements.len(),
            Scope::Subroutine(index) => self
                .elements
                .get(index)
                .and_then(Element::as_subroutine)
                .map(|subroutine| subroutine.statements.len())
                .unwrap_or(0),
        }
    }

    pub(crate) fn statement(&self, scope: Scope, index: usize) -> Option<&ActivityElement> {
        match scope {
            Scope::Root => self.elements.get(index)?.as_activity(),
            Scope::Subroutine(owner) => self
                .elements
                .get(owner)?
                .as_subroutine()?
                .statements
                .get(index),
        }
    }

    pub(crate) fn statement_mut(
        &mut self,
        scope: Scope,
        index: usize,
    ) -> Option<&mut ActivityElement> {
        match scope {
            Scope::Root => self.elements.get_mut(index)?.as_activity_mut(),
            Scope::Subroutine(owner) => self
                .elements
                .get_mut(owner)?
                .as_subroutine_mut()?
                .statements
                .get_mut(index),
        }
    }

    /// Resolves a jump target from inside `from`.
    ///
    /// Names are looked up in the current subroutine first, then among root elements.
    /// A call only resolves to a subroutine.
    pub fn resolve(&self, target: JumpTarget<'_>, from: Scope) -> Option<Destination> {
        match target {
            JumpTarget::Call(name) => self
                .subroutine_by_name(name)
                .map(|(index, _)| Destination::Subroutine { index }),
            JumpTarget::Goto(name) => {
                if let Scope::Subroutine(owner) = from {
                    let local = self
                        .elements
                        .get(owner)
                        .and_then(Element::as_subroutine)
                        .and_then(|subroutine| subroutine.position_of(name));
                    if let Some(index) = local {
                        return Some(Destination::Statement { scope: from, index });
                    }
                }

                self.elements
                    .iter()
                    .enumerate()
                    .find_map(|(index, element)| match element {
                        Element::Activity(activity) if activity.display_name() == Some(name) => {
                            Some(Destination::Statement {
                                scope: Scope::Root,
                                index,
                            })
                        }
                        Element::Subroutine(subroutine)
                            if subroutine.name.as_deref() == Some(name) =>
                        {
                            Some(Destination::Subroutine { index })
                        }
                        _ => None,
                    })
            }
        }
    }

    /// Jump targets that do not resolve. These fall through at runtime.
    pub fn unresolved_targets(&self) -> Vec<UnresolvedTarget> {
        let mut unresolved = Vec::new();
        let mut check = |id: ElementId, target: Option<JumpTarget<'_>>, scope: Scope| {
            let Some(target) = target else {
                return;
            };
            if self.resolve(target, scope).is_none() {
                unresolved.push(UnresolvedTarget {
                    element: id,
                    target: target.name().to_string(),
                    is_call: matches!(target, JumpTarget::Call(_)),
                });
            }
        };

        for (index, element) in self.elements.iter().enumerate() {
            match element {
                Element::Activity(activity) => {
                    check(activity.id, activity.jump_destination(), Scope::Root)
                }
                Element::Trigger(trigger) => {
                    check(trigger.id, trigger.jump_destination(), Scope::Root)
                }
                Element::Subroutine(subroutine) => {
                    for statement in &subroutine.statements {
                        check(
                            statement.id,
                            statement.jump_destination(),
                            Scope::Subroutine(index),
                        );
                    }
                }
                Element::Default(_) => {}
            }
        }

        unresolved
    }

    /// Resets every runtime latch, numbering activities in definition order.
    pub fn init_runtime(&mut self) {
        let mut seq = 1;
        for element in &mut self.elements {
            match element {
                Element::Activity(activity) => {
                    activity.init(Some(seq));
                    seq += 1;
                }
                Element::Subroutine(subroutine) => {
                    for statement in &mut subroutine.statements {
                        statement.init(Some(seq));
                        seq += 1;
                    }
                }
                Element::Trigger(trigger) => trigger.init(),
                Element::Default(_) => {}
            }
        }
    }

    /// Replaces the content with a freshly loaded definition, keeping the active flag.
    pub(crate) fn replace_with(&mut self, loaded: TimelineDefinition) {
        let is_active = self.is_active;
        *self = loaded;
        self.is_active = is_active;
    }

    fn shares_identity(&self, element: &Element) -> bool {
        if self.parents.contains_key(&element.id()) {
            return true;
        }
        match element {
            Element::Subroutine(subroutine) => subroutine
                .statements
                .iter()
                .any(|statement| self.parents.contains_key(&statement.id)),
            _ => false,
        }
    }

    fn index_parents(&mut self, element: &Element) {
        self.parents.insert(element.id(), ParentRef::Root);
        if let Element::Subroutine(subroutine) = element {
            for statement in &subroutine.statements {
                self.parents
                    .insert(statement.id, ParentRef::Subroutine(subroutine.id));
            }
        }
    }

    fn unindex_parents(&mut self, element: &Element) {
        self.parents.remove(&element.id());
        if let Element::Subroutine(subroutine) = element {
            for statement in &subroutine.statements {
                self.parents.remove(&statement.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ActivityElement, Destination, Element, ElementKind, JumpTarget, ParentRef, Scope,
        SubroutineElement, TimelineDefinition, TriggerElement,
    };
    use std::time::Duration;

    fn activity(seconds: u64, text: &str) -> Element {
        Element::Activity(ActivityElement::new(Duration::from_secs(seconds), text))
    }

    fn sample() -> TimelineDefinition {
        let mut definition = TimelineDefinition::new("Test Raid");
        definition.add(activity(10, "A"));
        definition.add(activity(20, "B"));
        let mut add_phase = SubroutineElement::new("AddPhase");
        add_phase.push(ActivityElement::new(Duration::from_secs(5), "Adds"));
        add_phase.push(ActivityElement::new(Duration::from_secs(9), "B"));
        definition.add(Element::Subroutine(add_phase));
        definition.add(activity(300, "Enrage"));
        definition
    }

    #[test]
    fn parents_are_tracked_by_the_definition() {
        let definition = sample();
        let subroutine = definition.elements()[2].as_subroutine().unwrap();
        let statement = subroutine.statements()[0].id();

        assert_eq!(
            definition.parent_of(definition.elements()[0].id()),
            Some(ParentRef::Root)
        );
        assert_eq!(
            definition.parent_of(statement),
            Some(ParentRef::Subroutine(subroutine.id()))
        );
    }

    #[test]
    fn removing_a_subroutine_drops_its_statements_from_the_index() {
        let mut definition = sample();
        let subroutine = definition.elements()[2].as_subroutine().unwrap().clone();

        let removed = definition.remove(subroutine.id()).unwrap();

        assert_eq!(removed.kind(), ElementKind::Subroutine);
        assert_eq!(definition.elements().len(), 3);
        for statement in subroutine.statements() {
            assert_eq!(definition.parent_of(statement.id()), None);
        }
    }

    #[test]
    fn duplicate_inserts_after_source_with_new_identity() {
        let mut definition = sample();
        let source = definition.elements()[0].id();

        let copy = definition.duplicate_element(source).unwrap();

        assert_ne!(copy, source);
        assert_eq!(definition.elements()[1].id(), copy);
        assert_eq!(definition.elements()[1].name(), Some("A"));
        assert_eq!(definition.parent_of(copy), Some(ParentRef::Root));
    }

    #[test]
    fn adding_the_same_element_twice_keeps_ids_unique() {
        let mut definition = TimelineDefinition::new("Clones");
        let meteor = activity(45, "Meteor");

        let first = definition.add(meteor.clone());
        let second = definition.add(meteor);

        assert_ne!(first, second);
        assert_eq!(definition.elements()[1].id(), second);
        assert_eq!(definition.parent_of(first), Some(ParentRef::Root));
        assert_eq!(definition.parent_of(second), Some(ParentRef::Root));

        definition.remove(second).unwrap();
        assert!(definition.activity(first).is_some(), "the original survives");
    }

    #[test]
    fn readding_a_subroutine_regenerates_its_statement_ids() {
        let mut definition = sample();
        let subroutine = definition.elements()[2].clone();
        let statement = subroutine.as_subroutine().unwrap().statements()[0].id();

        let copy = definition.add(subroutine);
        let copied_statement = definition
            .elements()
            .last()
            .and_then(Element::as_subroutine)
            .unwrap()
            .statements()[0]
            .id();

        assert_ne!(copied_statement, statement);
        assert_eq!(definition.parent_of(copied_statement), Some(ParentRef::Subroutine(copy)));
        assert_eq!(
            definition.parent_of(statement),
            Some(ParentRef::Subroutine(definition.elements()[2].id()))
        );
    }

    #[test]
    fn add_statement_duplicates_a_statement_already_present() {
        let mut definition = sample();
        let subroutine = definition.elements()[2].id();
        let existing = Element::Activity(
            definition.elements()[2].as_subroutine().unwrap().statements()[0].clone(),
        );

        let added = definition.add_statement(subroutine, existing.clone()).unwrap();

        assert_ne!(added, existing.id());
        assert_eq!(definition.parent_of(added), Some(ParentRef::Subroutine(subroutine)));
    }

    #[test]
    fn add_statement_rejects_non_activities() {
        let mut definition = sample();
        let subroutine = definition.elements()[2].id();

        assert!(definition.add_statement(subroutine, activity(12, "More adds")).is_some());
        assert!(definition
            .add_statement(subroutine, Element::Trigger(TriggerElement::new("x")))
            .is_none());
        assert_eq!(
            definition.elements()[2].as_subroutine().unwrap().statements().len(),
            3
        );
    }

    #[test]
    fn goto_resolves_locally_before_root() {
        let definition = sample();

        assert_eq!(
            definition.resolve(JumpTarget::Goto("B"), Scope::Subroutine(2)),
            Some(Destination::Statement {
                scope: Scope::Subroutine(2),
                index: 1
            })
        );
        assert_eq!(
            definition.resolve(JumpTarget::Goto("B"), Scope::Root),
            Some(Destination::Statement {
                scope: Scope::Root,
                index: 1
            })
        );
        assert_eq!(
            definition.resolve(JumpTarget::Goto("Enrage"), Scope::Subroutine(2)),
            Some(Destination::Statement {
                scope: Scope::Root,
                index: 3
            })
        );
        assert_eq!(
            definition.resolve(JumpTarget::Goto("AddPhase"), Scope::Root),
            Some(Destination::Subroutine { index: 2 })
        );
    }

    #[test]
    fn call_only_resolves_subroutines() {
        let definition = sample();

        assert_eq!(
            definition.resolve(JumpTarget::Call("AddPhase"), Scope::Root),
            Some(Destination::Subroutine { index: 2 })
        );
        assert_eq!(definition.resolve(JumpTarget::Call("Enrage"), Scope::Root), None);
    }

    #[test]
    fn unresolved_targets_are_reported() {
        let mut definition = sample();
        let mut broken = ActivityElement::new(Duration::from_secs(40), "Broken");
        broken.goto = Some("Nowhere".to_string());
        let broken_id = definition.add(Element::Activity(broken));
        let mut bad_call = ActivityElement::new(Duration::from_secs(50), "Bad call");
        bad_call.call = Some("Enrage".to_string());
        definition.add(Element::Activity(bad_call));

        let unresolved = definition.unresolved_targets();

        assert_eq!(unresolved.len(), 2);
        assert_eq!(unresolved[0].element, broken_id);
        assert_eq!(unresolved[0].target, "Nowhere");
        assert!(!unresolved[0].is_call);
        assert!(unresolved[1].is_call);
    }

    #[test]
    fn init_runtime_numbers_activities_in_order() {
        let mut definition = sample();
        definition.init_runtime();

        let seqs: Vec<usize> = definition.activities().map(ActivityElement::seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }
}
