use crate::timeline::{Destination, JumpTarget, Scope, TimelineDefinition};

/// Execution position: a statement list, an index into it, and the clock value that
/// statement times in this list are relative to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    pub scope: Scope,
    pub index: usize,
    pub base: f64,
}

impl Frame {
    fn root() -> Self {
        Self {
            scope: Scope::Root,
            index: 0,
            base: 0.0,
        }
    }
}

/// Owned copy of a jump so the element it came from can be mutated while it is followed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Jump {
    Call(String),
    Goto(String),
}

impl Jump {
    pub fn from_target(target: JumpTarget<'_>) -> Self {
        match target {
            JumpTarget::Call(name) => Self::Call(name.to_string()),
            JumpTarget::Goto(name) => Self::Goto(name.to_string()),
        }
    }

    fn as_target(&self) -> JumpTarget<'_> {
        match self {
            Self::Call(name) => JumpTarget::Call(name),
            Self::Goto(name) => JumpTarget::Goto(name),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Call(name) | Self::Goto(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transfer {
    FallThrough,
    Jumped(Frame),
    Called { entered: Frame, return_to: Frame },
    Unresolved(Jump),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    frame: Option<Frame>,
    call_stack: Vec<Frame>,
}

impl Default for Cursor {
    fn default() -> Self {
        Self::new()
    }
}

impl Cursor {
    pub fn new() -> Self {
        Self {
            frame: Some(Frame::root()),
            call_stack: Vec::new(),
        }
    }

    pub fn current(&self) -> Option<Frame> {
        self.frame
    }

    pub fn call_stack(&self) -> &[Frame] {
        &self.call_stack
    }

    pub fn is_finished(&self) -> bool {
        self.frame.is_none()
    }

    pub fn reset(&mut self, definition: &TimelineDefinition) {
        self.frame = Some(Frame::root());
        self.call_stack.clear();
        self.settle(definition);
    }

    pub(crate) fn move_to(&mut self, index: usize) {
        if let Some(frame) = self.frame.as_mut() {
            frame.index = index;
        }
    }

    /// Moves past the current statement.
    pub fn advance(&mut self, definition: &TimelineDefinition) {
        if let Some(frame) = self.frame.as_mut() {
            frame.index += 1;
        }
        self.settle(definition);
    }

    /// Follows `jump` out of the current statement.
    ///
    /// `resume_offset` is added to the current index to form the return point of a call:
    /// 1 when an executed statement calls, 0 when a trigger interrupts.
    /// A goto onto a statement retimes its scope so the target is due at `clock_now`.
    pub fn follow(
        &mut self,
        definition: &mut TimelineDefinition,
        jump: Option<&Jump>,
        clock_now: f64,
        resume_offset: usize,
    ) -> Transfer {
        let Some(jump) = jump else {
            if resume_offset > 0 {
                self.advance(definition);
            }
            return Transfer::FallThrough;
        };

        let from = self.frame.map(|frame| frame.scope).unwrap_or(Scope::Root);
        let Some(destination) = definition.resolve(jump.as_target(), from) else {
            tracing::warn!(
                timeline = %definition.name,
                target = jump.name(),
                "Jump target does not resolve; falling through"
            );
            if resume_offset > 0 {
                self.advance(definition);
            }
            return Transfer::Unresolved(jump.clone());
        };

        match (jump, destination) {
            (Jump::Call(_), Destination::Subroutine { index }) => {
                let return_to = self.frame.map(|frame| Frame {
                    index: frame.index + resume_offset,
                    ..frame
                });
                let entered = Frame {
                    scope: Scope::Subroutine(index),
                    index: 0,
                    base: clock_now,
                };
                if let Some(return_to) = return_to {
                    self.call_stack.push(return_to);
                }
                reinit_from(definition, entered.scope, 0);
                self.frame = Some(entered);
                self.settle(definition);
                tracing::debug!(
                    timeline = %definition.name,
                    target = jump.name(),
                    depth = self.call_stack.len(),
                    "Called subroutine"
                );
                Transfer::Called {
                    entered,
                    return_to: return_to.unwrap_or(entered),
                }
            }
            (_, Destination::Subroutine { index }) => {
                let entered = Frame {
                    scope: Scope::Subroutine(index),
                    index: 0,
                    base: clock_now,
                };
                reinit_from(definition, entered.scope, 0);
                self.frame = Some(entered);
                self.settle(definition);
                tracing::debug!(timeline = %definition.name, target = jump.name(), "Jumped into subroutine");
                Transfer::Jumped(entered)
            }
            (_, Destination::Statement { scope, index }) => {
                let target_time = definition
                    .statement(scope, index)
                    .map(|target| target.time.as_secs_f64())
                    .unwrap_or(0.0);
                let entered = Frame {
                    scope,
                    index,
                    base: clock_now - target_time,
                };
                reinit_from(definition, scope, index);
                self.frame = Some(entered);
                self.settle(definition);
                tracing::debug!(timeline = %definition.name, target = jump.name(), "Jumped to statement");
                Transfer::Jumped(entered)
            }
        }
    }

    /// Skips non-activity root entries and returns from finished subroutines.
    fn settle(&mut self, definition: &TimelineDefinition) {
        while let Some(frame) = self.frame.as_mut() {
            let length = definition.scope_len(frame.scope);
            while frame.index < length && definition.statement(frame.scope, frame.index).is_none() {
                frame.index += 1;
            }

            if frame.index < length {
                return;
            }

            self.frame = self.call_stack.pop();
        }
    }
}

/// Clears latches of the statements a jump lands on so they can run again.
fn reinit_from(definition: &mut TimelineDefinition, scope: Scope, start: usize) {
    let length = definition.scope_len(scope);
    for index in start..length {
        if let Some(statement) = definition.statement_mut(scope, index) {
            statement.init(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Cursor, Frame, Jump, Transfer};
    use crate::timeline::{
        ActivityElement, Element, Scope, SubroutineElement, TimelineDefinition, TriggerElement,
    };
    use std::time::Duration;

    fn definition() -> TimelineDefinition {
        let mut definition = TimelineDefinition::new("Cursor");
        definition.add(Element::Trigger(TriggerElement::new("wipe")));
        definition.add(Element::Activity(ActivityElement::new(
            Duration::from_secs(10),
            "A",
        )));
        let mut add_phase = SubroutineElement::new("AddPhase");
        add_phase.push(ActivityElement::new(Duration::from_secs(5), "Adds"));
        definition.add(Element::Subroutine(add_phase));
        definition.add(Element::Activity(ActivityElement::new(
            Duration::from_secs(20),
            "B",
        )));
        definition.add(Element::Subroutine(SubroutineElement::new("Empty")));
        definition
    }

    #[test]
    fn reset_skips_leading_non_activities() {
        let definition = definition();
        let mut cursor = Cursor::new();
        cursor.reset(&definition);

        assert_eq!(cursor.current().unwrap().index, 1);
    }

    #[test]
    fn advance_skips_subroutine_bodies_and_finishes_at_end() {
        let definition = definition();
        let mut cursor = Cursor::new();
        cursor.reset(&definition);

        cursor.advance(&definition);
        assert_eq!(cursor.current().unwrap().index, 3);

        cursor.advance(&definition);
        assert!(cursor.is_finished());
    }

    #[test]
    fn call_pushes_return_point_and_pops_at_end() {
        let mut definition = definition();
        let mut cursor = Cursor::new();
        cursor.reset(&definition);

        let transfer = cursor.follow(
            &mut definition,
            Some(&Jump::Call("AddPhase".to_string())),
            10.0,
            1,
        );

        let entered = Frame {
            scope: Scope::Subroutine(2),
            index: 0,
            base: 10.0,
        };
        assert_eq!(
            transfer,
            Transfer::Called {
                entered,
                return_to: Frame {
                    scope: Scope::Root,
                    index: 2,
                    base: 0.0
                }
            }
        );
        assert_eq!(cursor.call_stack().len(), 1);

        cursor.advance(&definition);
        assert_eq!(
            cursor.current(),
            Some(Frame {
                scope: Scope::Root,
                index: 3,
                base: 0.0
            })
        );
        assert!(cursor.call_stack().is_empty());
    }

    #[test]
    fn calling_an_empty_subroutine_returns_immediately() {
        let mut definition = definition();
        let mut cursor = Cursor::new();
        cursor.reset(&definition);

        cursor.follow(
            &mut definition,
            Some(&Jump::Call("Empty".to_string())),
            10.0,
            1,
        );

        assert_eq!(cursor.current().unwrap().scope, Scope::Root);
        assert_eq!(cursor.current().unwrap().index, 3);
    }

    #[test]
    fn unresolved_target_falls_through() {
        let mut definition = definition();
        let mut cursor = Cursor::new();
        cursor.reset(&definition);

        let transfer = cursor.follow(
            &mut definition,
            Some(&Jump::Goto("Nowhere".to_string())),
            10.0,
            1,
        );

        assert_eq!(transfer, Transfer::Unresolved(Jump::Goto("Nowhere".to_string())));
        assert_eq!(cursor.current().unwrap().index, 3);
    }

    #[test]
    fn goto_onto_a_statement_is_timed_from_the_jump() {
        let mut definition = definition();
        let mut cursor = Cursor::new();
        cursor.reset(&definition);
        cursor.advance(&definition);

        let transfer = cursor.follow(
            &mut definition,
            Some(&Jump::Goto("A".to_string())),
            42.0,
            1,
        );

        let entered = Frame {
            scope: Scope::Root,
            index: 1,
            base: 32.0,
        };
        assert_eq!(transfer, Transfer::Jumped(entered));
        assert_eq!(cursor.current(), Some(entered));
    }

    #[test]
    fn goto_does_not_push_a_return_point() {
        let mut definition = definition();
        let mut cursor = Cursor::new();
        cursor.reset(&definition);

        cursor.follow(
            &mut definition,
            Some(&Jump::Goto("AddPhase".to_string())),
            10.0,
            1,
        );
        assert!(cursor.call_stack().is_empty());

        cursor.advance(&definition);
        assert!(cursor.is_finished(), "goto abandons the calling scope");
    }
}
