//! # Action Queues
//!
//! One FIFO queue of not-yet-confirmed mutations per entity kind, plus the
//! distinguished refresh queue. Queues are append-only until an entry is
//! dequeued (replayed or discarded); no coalescing or deduplication is
//! performed, so two offline edits to the same entity stay two entries and
//! replay in order.
//!
//! ## Invariants
//!
//! - Within one entity-kind queue, actions affecting the same entity are
//!   never reordered relative to each other.
//! - A pending refresh marker is always selected before any entity mutation,
//!   regardless of enqueue timestamps.

use std::collections::{HashMap, VecDeque};

use crate::model::{EntityKind, LocalKey, StableId};
use crate::offline::action::{QueuedAction, RefreshMarker};

/// FIFO queue for one entity kind.
#[derive(Debug, Default, Clone)]
pub struct ActionQueue {
    items: VecDeque<QueuedAction>,
}

impl ActionQueue {
    pub fn enqueue(&mut self, action: QueuedAction) {
        self.items.push_back(action);
    }

    pub fn peek_head(&self) -> Option<&QueuedAction> {
        self.items.front()
    }

    pub fn dequeue_head(&mut self) -> Option<QueuedAction> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedAction> {
        self.items.iter()
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = &mut QueuedAction> {
        self.items.iter_mut()
    }
}

/// All queues the replay scheduler drains: one per entity kind plus the
/// refresh queue.
#[derive(Debug, Default)]
pub struct QueueSet {
    queues: HashMap<EntityKind, ActionQueue>,
    refresh: VecDeque<RefreshMarker>,
}

impl QueueSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action to the tail of its entity-kind queue.
    pub fn enqueue(&mut self, action: QueuedAction) {
        self.queues.entry(action.entity).or_default().enqueue(action);
    }

    /// Append a refresh marker, unless one is already pending. Refresh work
    /// is idempotent, so a single pending marker covers every 401 that
    /// triggered it.
    pub fn enqueue_refresh(&mut self, marker: RefreshMarker) -> bool {
        if self.refresh_pending() {
            return false;
        }
        self.refresh.push_back(marker);
        true
    }

    pub fn refresh_pending(&self) -> bool {
        !self.refresh.is_empty()
    }

    pub fn peek_refresh(&self) -> Option<&RefreshMarker> {
        self.refresh.front()
    }

    pub fn dequeue_refresh(&mut self) -> Option<RefreshMarker> {
        self.refresh.pop_front()
    }

    /// The entity kind whose head action has the globally smallest enqueue
    /// timestamp. Ties break on the fixed kind order, which keeps selection
    /// deterministic.
    pub fn next_kind(&self) -> Option<EntityKind> {
        let mut best: Option<(EntityKind, chrono::DateTime<chrono::Utc>)> = None;
        for kind in EntityKind::ALL {
            if let Some(head) = self.queues.get(&kind).and_then(|q| q.peek_head()) {
                match best {
                    Some((_, at)) if head.queued_at >= at => {}
                    _ => best = Some((kind, head.queued_at)),
                }
            }
        }
        best.map(|(kind, _)| kind)
    }

    pub fn peek_head(&self, kind: EntityKind) -> Option<&QueuedAction> {
        self.queues.get(&kind).and_then(|q| q.peek_head())
    }

    pub fn dequeue_head(&mut self, kind: EntityKind) -> Option<QueuedAction> {
        self.queues.get_mut(&kind).and_then(|q| q.dequeue_head())
    }

    /// Rewrite the local key of every queued action referencing the stable
    /// id. Called once per entity, at create-confirmation.
    pub fn repoint(&mut self, stable_id: StableId, canonical_key: LocalKey) -> usize {
        let mut repointed = 0;
        for queue in self.queues.values_mut() {
            for action in queue.iter_mut() {
                if action.stable_id == stable_id {
                    action.local_key = canonical_key;
                    repointed += 1;
                }
            }
        }
        repointed
    }

    /// Whether any queued action still references the stable id. Hydration
    /// skips such entities so replay keeps last-write-wins by replay order.
    pub fn pending_for(&self, stable_id: StableId) -> bool {
        self.queues
            .values()
            .any(|q| q.iter().any(|a| a.stable_id == stable_id))
    }

    /// Total queued entity mutations (refresh markers excluded).
    pub fn total_pending(&self) -> usize {
        self.queues.values().map(|q| q.len()).sum()
    }

    /// Rebuild from persisted rows on engine open.
    pub fn load(&mut self, actions: Vec<QueuedAction>, refresh: Vec<RefreshMarker>) {
        for action in actions {
            self.enqueue(action);
        }
        self.refresh = refresh.into();
    }

    /// Snapshot every queued action, for persistence-free inspection.
    pub fn iter_actions(&self) -> impl Iterator<Item = &QueuedAction> {
        EntityKind::ALL
            .into_iter()
            .filter_map(|kind| self.queues.get(&kind))
            .flat_map(|q| q.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offline::action::ActionKind;
    use chrono::{Duration, Utc};

    fn action(entity: EntityKind, offset_ms: i64) -> QueuedAction {
        QueuedAction::new(
            ActionKind::Update,
            entity,
            StableId::new(),
            1,
            serde_json::json!({}),
            Utc::now() + Duration::milliseconds(offset_ms),
        )
    }

    #[test]
    fn test_fifo_within_one_kind() {
        let mut queues = QueueSet::new();
        let first = action(EntityKind::Book, 0);
        let second = action(EntityKind::Book, 1);
        queues.enqueue(first.clone());
        queues.enqueue(second.clone());

        assert_eq!(queues.dequeue_head(EntityKind::Book).unwrap().id, first.id);
        assert_eq!(queues.dequeue_head(EntityKind::Book).unwrap().id, second.id);
        assert!(queues.dequeue_head(EntityKind::Book).is_none());
    }

    #[test]
    fn test_next_kind_picks_globally_oldest_head() {
        let mut queues = QueueSet::new();
        queues.enqueue(action(EntityKind::Chapter, 10));
        queues.enqueue(action(EntityKind::Book, 20));
        queues.enqueue(action(EntityKind::Tag, 5));

        assert_eq!(queues.next_kind(), Some(EntityKind::Tag));
        queues.dequeue_head(EntityKind::Tag);
        assert_eq!(queues.next_kind(), Some(EntityKind::Chapter));
        queues.dequeue_head(EntityKind::Chapter);
        assert_eq!(queues.next_kind(), Some(EntityKind::Book));
    }

    #[test]
    fn test_refresh_marker_is_deduplicated() {
        let mut queues = QueueSet::new();
        assert!(queues.enqueue_refresh(RefreshMarker::new(Utc::now())));
        assert!(!queues.enqueue_refresh(RefreshMarker::new(Utc::now())));
        assert!(queues.refresh_pending());

        queues.dequeue_refresh();
        assert!(!queues.refresh_pending());
    }

    #[test]
    fn test_repoint_rewrites_every_reference() {
        let mut queues = QueueSet::new();
        let stable = StableId::new();
        let now = Utc::now();
        let mut create = QueuedAction::new(
            ActionKind::Create,
            EntityKind::Book,
            stable,
            -1000,
            serde_json::json!({}),
            now,
        );
        create.local_key = -1000;
        let update = QueuedAction::new(
            ActionKind::Update,
            EntityKind::Book,
            stable,
            -1000,
            serde_json::json!({}),
            now + Duration::milliseconds(1),
        );
        let unrelated = action(EntityKind::Book, 2);
        let unrelated_key = unrelated.local_key;
        queues.enqueue(create);
        queues.enqueue(update);
        queues.enqueue(unrelated);

        assert_eq!(queues.repoint(stable, 101), 2);
        let keys: Vec<LocalKey> = queues.iter_actions().map(|a| a.local_key).collect();
        assert_eq!(keys, vec![101, 101, unrelated_key]);
    }

    #[test]
    fn test_pending_for() {
        let mut queues = QueueSet::new();
        let queued = action(EntityKind::Short, 0);
        let stable = queued.stable_id;
        queues.enqueue(queued);

        assert!(queues.pending_for(stable));
        assert!(!queues.pending_for(StableId::new()));
    }

    #[test]
    fn test_load_preserves_order() {
        let mut queues = QueueSet::new();
        let first = action(EntityKind::Prompt, 0);
        let second = action(EntityKind::Prompt, 1);
        queues.load(vec![first.clone(), second.clone()], Vec::new());

        assert_eq!(queues.total_pending(), 2);
        assert_eq!(queues.peek_head(EntityKind::Prompt).unwrap().id, first.id);
    }
}
