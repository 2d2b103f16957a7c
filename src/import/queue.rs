use crate::catalog::schema::EntityDescriptor;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// What to do with an entity element, decided from its name.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Import now.
    Consume(Arc<EntityDescriptor>),
    /// Import now although `pending_parents` have not been imported yet.
    ConsumeOutOfOrder {
        descriptor: Arc<EntityDescriptor>,
        pending_parents: Vec<String>,
    },
    /// Buffer until `pending_parents` have been imported.
    Defer {
        descriptor: Arc<EntityDescriptor>,
        pending_parents: Vec<String>,
    },
    /// Not wanted.
    Skip,
}

/// Ordered want-list of entity types plus the discard set of types whose
/// turn was passed over because a later type appeared first.
#[derive(Debug, Default)]
pub struct WantQueue {
    pending: VecDeque<Arc<EntityDescriptor>>,
    discarded: Vec<Arc<EntityDescriptor>>,
    deferring: Vec<Arc<EntityDescriptor>>,
    consumed: HashMap<String, Arc<EntityDescriptor>>,
}

impl WantQueue {
    pub fn new(wanted: impl IntoIterator<Item = Arc<EntityDescriptor>>) -> Self {
        let mut seen = HashSet::new();
        let pending = wanted
            .into_iter()
            .filter(|d| seen.insert(d.name.clone()))
            .collect();
        Self {
            pending,
            ..Self::default()
        }
    }

    pub fn classify(&mut self, name: &str) -> Disposition {
        if let Some(descriptor) = self.deferring.iter().find(|d| d.name == name) {
            return Disposition::Defer {
                descriptor: Arc::clone(descriptor),
                pending_parents: self.pending_parents(descriptor),
            };
        }
        if let Some(descriptor) = self.consumed.get(name) {
            return Disposition::Consume(Arc::clone(descriptor));
        }

        if let Some(pos) = self.pending.iter().position(|d| d.name == name) {
            self.discarded.extend(self.pending.drain(..pos));
            let Some(descriptor) = self.pending.pop_front() else {
                return Disposition::Skip;
            };
            let pending_parents = self.pending_parents(&descriptor);
            if pos == 0 || pending_parents.is_empty() {
                self.mark_consumed(&descriptor);
                return Disposition::Consume(descriptor);
            }
            self.deferring.push(Arc::clone(&descriptor));
            return Disposition::Defer {
                descriptor,
                pending_parents,
            };
        }

        if let Some(pos) = self.discarded.iter().position(|d| d.name == name) {
            let descriptor = self.discarded.remove(pos);
            self.mark_consumed(&descriptor);
            let pending_parents = self.pending_parents(&descriptor);
            if pending_parents.is_empty() {
                return Disposition::Consume(descriptor);
            }
            return Disposition::ConsumeOutOfOrder {
                descriptor,
                pending_parents,
            };
        }

        Disposition::Skip
    }

    fn mark_consumed(&mut self, descriptor: &Arc<EntityDescriptor>) {
        self.consumed
            .insert(descriptor.name.clone(), Arc::clone(descriptor));
    }

    /// Parents of `descriptor` that are still expected later in the stream.
    pub fn pending_parents(&self, descriptor: &EntityDescriptor) -> Vec<String> {
        let mut parents = descriptor
            .parent_names()
            .filter(|p| *p != descriptor.name && self.is_pending(p))
            .map(str::to_string)
            .collect::<Vec<_>>();
        parents.sort();
        parents.dedup();
        parents
    }

    pub fn is_pending(&self, name: &str) -> bool {
        self.pending.iter().any(|d| d.name == name)
            || self.discarded.iter().any(|d| d.name == name)
            || self.deferring.iter().any(|d| d.name == name)
    }

    pub fn has_deferred(&self) -> bool {
        !self.deferring.is_empty()
    }

    /// Deferred types whose parents have all been imported, in dependency
    /// order. Released types count as consumed.
    pub fn release_ready(&mut self) -> Vec<Arc<EntityDescriptor>> {
        let mut released = Vec::new();
        loop {
            let ready = self
                .deferring
                .iter()
                .position(|d| self.pending_parents(d).is_empty());
            let Some(pos) = ready else {
                return released;
            };
            let descriptor = self.deferring.remove(pos);
            self.mark_consumed(&descriptor);
            released.push(descriptor);
        }
    }

    /// Releases every deferred type regardless of its parents, paired with
    /// the parents still outstanding at the moment of release.
    pub fn release_all(&mut self) -> Vec<(Arc<EntityDescriptor>, Vec<String>)> {
        let released = self
            .deferring
            .iter()
            .map(|d| (Arc::clone(d), self.pending_parents(d)))
            .collect::<Vec<_>>();
        self.deferring.clear();
        for (descriptor, _) in &released {
            self.mark_consumed(descriptor);
        }
        released
    }

    /// Wanted types never seen: the queue remainder followed by the discard
    /// set.
    pub fn missing(&self) -> Vec<String> {
        self.pending
            .iter()
            .chain(&self.discarded)
            .map(|d| d.name.clone())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.pending.is_empty() && self.discarded.is_empty() && self.deferring.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{Disposition, WantQueue};
    use crate::catalog::schema::{EntityDescriptor, EntitySpec};
    use crate::catalog::types::ColumnType;
    use std::sync::Arc;

    fn entity(name: &str, parents: &[&str]) -> Arc<EntityDescriptor> {
        let mut spec = EntitySpec::new(name)
            .column("id", ColumnType::Integer, false)
            .column("parent_id", ColumnType::Integer, true)
            .primary_key(0, &["id"]);
        for parent in parents {
            spec = spec.parent(format!("FK_{name}_{parent}"), *parent, &[("parent_id", "id")]);
        }
        Arc::new(spec.build())
    }

    fn name(d: &Disposition) -> &str {
        match d {
            Disposition::Consume(d) => &d.name,
            Disposition::ConsumeOutOfOrder { descriptor, .. }
            | Disposition::Defer { descriptor, .. } => &descriptor.name,
            Disposition::Skip => "",
        }
    }

    #[test]
    fn in_order_types_are_consumed_front_to_back() {
        let mut queue = WantQueue::new([entity("A", &[]), entity("B", &["A"])]);
        assert!(matches!(queue.classify("A"), Disposition::Consume(_)));
        assert!(matches!(queue.classify("A"), Disposition::Consume(_)));
        assert!(matches!(queue.classify("B"), Disposition::Consume(_)));
        assert!(queue.is_complete());
    }

    #[test]
    fn child_ahead_of_parent_is_deferred_until_parent_consumed() {
        let mut queue =
            WantQueue::new([entity("Database", &[]), entity("Entity", &["Database"])]);
        let first = queue.classify("Entity");
        assert_eq!(
            first,
            Disposition::Defer {
                descriptor: entity("Entity", &["Database"]),
                pending_parents: vec!["Database".to_string()],
            }
        );
        assert!(matches!(queue.classify("Entity"), Disposition::Defer { .. }));
        assert!(queue.release_ready().is_empty());

        let parent = queue.classify("Database");
        assert_eq!(name(&parent), "Database");
        assert!(matches!(parent, Disposition::Consume(_)));

        let released = queue.release_ready();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].name, "Entity");
        assert!(queue.is_complete());
        assert!(matches!(queue.classify("Entity"), Disposition::Consume(_)));
    }

    #[test]
    fn passed_over_type_without_pending_parents_is_consumed() {
        let mut queue = WantQueue::new([entity("A", &[]), entity("B", &[])]);
        assert!(matches!(queue.classify("B"), Disposition::Consume(_)));
        assert_eq!(queue.missing(), vec!["A".to_string()]);
        assert!(matches!(queue.classify("A"), Disposition::Consume(_)));
        assert!(queue.missing().is_empty());
    }

    #[test]
    fn discarded_type_with_pending_parent_is_imported_anyway() {
        let mut queue = WantQueue::new([
            entity("P", &[]),
            entity("C", &["P"]),
            entity("X", &[]),
        ]);
        assert!(matches!(queue.classify("X"), Disposition::Consume(_)));
        let child = queue.classify("C");
        assert_eq!(
            child,
            Disposition::ConsumeOutOfOrder {
                descriptor: entity("C", &["P"]),
                pending_parents: vec!["P".to_string()],
            }
        );
        assert_eq!(queue.missing(), vec!["P".to_string()]);
    }

    #[test]
    fn unwanted_types_are_skipped_and_leftovers_reported() {
        let mut queue = WantQueue::new([entity("A", &[]), entity("B", &[])]);
        assert_eq!(queue.classify("Z"), Disposition::Skip);
        assert_eq!(queue.missing(), vec!["A".to_string(), "B".to_string()]);
        assert!(!queue.is_complete());
    }

    #[test]
    fn self_reference_does_not_block() {
        let mut queue = WantQueue::new([entity("Tree", &["Tree"])]);
        assert!(matches!(queue.classify("Tree"), Disposition::Consume(_)));
    }

    #[test]
    fn release_all_frees_blocks_whose_parents_never_arrived() {
        let mut queue = WantQueue::new([entity("P", &[]), entity("C", &["P"])]);
        assert!(matches!(queue.classify("C"), Disposition::Defer { .. }));
        assert!(queue.has_deferred());
        let released = queue.release_all();
        assert_eq!(released[0].0.name, "C");
        assert_eq!(released[0].1, vec!["P".to_string()]);
        assert!(!queue.has_deferred());
        assert_eq!(queue.missing(), vec!["P".to_string()]);
    }

    #[test]
    fn release_all_reports_deferred_parents_as_missing() {
        let mut queue = WantQueue::new([
            entity("A", &[]),
            entity("B", &["A"]),
            entity("X", &[]),
            entity("C", &["B"]),
        ]);
        assert!(matches!(queue.classify("B"), Disposition::Defer { .. }));
        assert!(matches!(queue.classify("C"), Disposition::Defer { .. }));
        let released = queue
            .release_all()
            .into_iter()
            .map(|(d, parents)| (d.name.clone(), parents))
            .collect::<Vec<_>>();
        assert_eq!(
            released,
            vec![
                ("B".to_string(), vec!["A".to_string()]),
                ("C".to_string(), vec!["B".to_string()]),
            ]
        );
    }
}
