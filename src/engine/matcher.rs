use crate::timeline::{Scope, TimelineDefinition};

use super::cursor::Frame;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncMatch {
    pub scope: Scope,
    pub index: usize,
    pub effective_time: f64,
}

/// Indices of the activities in the near-term window of `frame`, in list order.
pub(crate) fn window_indices(
    definition: &TimelineDefinition,
    frame: Frame,
    visible_activities: usize,
) -> Vec<usize> {
    let length = definition.scope_len(frame.scope);
    (frame.index..length)
        .filter(|index| {
            definition
                .statement(frame.scope, *index)
                .map(|activity| !activity.is_done())
                .unwrap_or(false)
        })
        .take(visible_activities)
        .collect()
}

/// Finds the armed activity a line synchronizes.
///
/// Candidates are tried in ascending effective time, ties broken by window position,
/// and the first whose pattern matches wins.
pub(crate) fn find_sync_match(
    definition: &TimelineDefinition,
    frame: Frame,
    visible_activities: usize,
    line: &str,
) -> Option<SyncMatch> {
    let mut candidates: Vec<SyncMatch> = window_indices(definition, frame, visible_activities)
        .into_iter()
        .filter_map(|index| {
            let activity = definition.statement(frame.scope, index)?;
            activity.can_sync().then(|| SyncMatch {
                scope: frame.scope,
                index,
                effective_time: frame.base + activity.time.as_secs_f64(),
            })
        })
        .collect();

    candidates.sort_by(|left, right| {
        left.effective_time
            .total_cmp(&right.effective_time)
            .then(left.index.cmp(&right.index))
    });

    candidates.into_iter().find(|candidate| {
        definition
            .statement(candidate.scope, candidate.index)
            .and_then(|activity| activity.sync.as_ref())
            .map(|pattern| pattern.is_match(line))
            .unwrap_or(false)
    })
}
