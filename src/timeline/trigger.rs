use super::activity::{jump_destination, JumpTarget, NoticeDevice};
use super::sync_pattern::SyncPattern;
use super::ElementId;

/// Pattern-activated action. Unlike an activity it has no schedule and never latches:
/// every matching line while the timeline is active fires it again.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerElement {
    pub(crate) id: ElementId,
    pub name: Option<String>,
    pub text: Option<String>,
    pub sync: Option<SyncPattern>,
    pub notice: Option<String>,
    pub notice_device: Option<NoticeDevice>,
    pub goto: Option<String>,
    pub call: Option<String>,
    pub(crate) fired_count: u64,
}

impl Default for TriggerElement {
    fn default() -> Self {
        Self {
            id: ElementId::new(),
            name: None,
            text: None,
            sync: None,
            notice: None,
            notice_device: None,
            goto: None,
            call: None,
            fired_count: 0,
        }
    }
}

impl TriggerElement {
    pub fn new(sync: &str) -> Self {
        Self {
            sync: SyncPattern::from_attribute(Some(sync)),
            ..Self::default()
        }
    }

    pub fn id(&self) -> ElementId {
        self.id
    }

    pub fn display_name(&self) -> Option<&str> {
        self.name.as_deref().or(self.text.as_deref())
    }

    pub fn set_sync(&mut self, source: Option<&str>) {
        self.sync = SyncPattern::from_attribute(source);
    }

    pub fn jump_destination(&self) -> Option<JumpTarget<'_>> {
        jump_destination(self.call.as_deref(), self.goto.as_deref())
    }

    pub fn is_match(&self, line: &str) -> bool {
        self.sync
            .as_ref()
            .map(|pattern| pattern.is_match(line))
            .unwrap_or(false)
    }

    pub fn fired_count(&self) -> u64 {
        self.fired_count
    }

    pub fn init(&mut self) {
        self.fired_count = 0;
    }

    pub fn duplicate(&self) -> Self {
        Self {
            id: ElementId::new(),
            ..self.clone()
        }
    }
}

/// Per-timeline default value for an attribute of other elements. Carried verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultElement {
    pub(crate) id: ElementId,
    pub name: Option<String>,
    pub target_element: Option<String>,
    pub target_attribute: Option<String>,
    pub value: Option<String>,
}

impl Default for DefaultElement {
    fn default() -> Self {
        Self {
            id: ElementId::new(),
            name: None,
            target_element: None,
            target_attribute: None,
            value: None,
        }
    }
}

impl DefaultElement {
    pub fn id(&self) -> ElementId {
        self.id
    }

    pub fn duplicate(&self) -> Self {
        Self {
            id: ElementId::new(),
            ..self.clone()
        }
    }
}
