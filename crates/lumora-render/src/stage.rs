//! Stages and their dependency-ordered list.
//!
//! Stages are sorted topologically from their `after`/`before` constraints, with
//! registration order as the tie-break. A stage whose `after` dependencies are not
//! registered yet is either rejected (strict mode) or held pending until they appear.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use indexmap::IndexMap;

use crate::error::{PipelineError, PipelineResult};

/// Stage identifier. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(Arc<str>);

impl StageId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StageId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A named point in the frame at which commands execute.
///
/// # Example
///
/// ```
/// use lumora_render::stage::Stage;
///
/// let stage = Stage::new("transparent")
///     .after("opaque")
///     .before("post")
///     .dedicated_translucent();
/// assert!(stage.is_dedicated_translucent());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    id: StageId,
    after: Vec<StageId>,
    before: Vec<StageId>,
    dedicated_translucent: bool,
    translucent_follows_solid: Option<bool>,
}

impl Stage {
    pub fn new(id: impl Into<StageId>) -> Self {
        Self {
            id: id.into(),
            after: Vec::new(),
            before: Vec::new(),
            dedicated_translucent: false,
            translucent_follows_solid: None,
        }
    }

    /// Require this stage to run after `other`. `other` must be registered first.
    pub fn after(mut self, other: impl Into<StageId>) -> Self {
        self.after.push(other.into());
        self
    }

    /// Require this stage to run before `other`, if `other` is ever registered.
    pub fn before(mut self, other: impl Into<StageId>) -> Self {
        self.before.push(other.into());
        self
    }

    /// Mark this stage as a flush point for deferred translucent commands.
    pub fn dedicated_translucent(mut self) -> Self {
        self.dedicated_translucent = true;
        self
    }

    /// Override, for this stage only, whether translucent commands execute right after
    /// the solid ones instead of being deferred.
    pub fn translucent_follows_solid(mut self, follows: bool) -> Self {
        self.translucent_follows_solid = Some(follows);
        self
    }

    pub fn id(&self) -> &StageId {
        &self.id
    }

    pub fn after_stages(&self) -> &[StageId] {
        &self.after
    }

    pub fn before_stages(&self) -> &[StageId] {
        &self.before
    }

    pub fn is_dedicated_translucent(&self) -> bool {
        self.dedicated_translucent
    }

    pub fn follows_solid_override(&self) -> Option<bool> {
        self.translucent_follows_solid
    }
}

/// Outcome of [`StageList::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageInsertion {
    /// The stage is part of the execution order.
    Inserted,
    /// The stage waits for unregistered dependencies.
    Pending,
}

#[derive(Debug)]
struct StageEntry {
    stage: Stage,
    seq: u64,
}

/// Topologically sorted stages plus the stages still waiting for dependencies.
#[derive(Debug, Default)]
pub struct StageList {
    entries: AHashMap<StageId, StageEntry>,
    order: Vec<StageId>,
    pending: IndexMap<StageId, Stage, ahash::RandomState>,
    strict: bool,
    next_seq: u64,
}

impl StageList {
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            ..Self::default()
        }
    }

    /// Register a stage.
    ///
    /// In strict mode, missing dependencies and cycles are errors. Otherwise the stage is
    /// held pending and retried whenever another stage is inserted.
    pub fn register(&mut self, stage: Stage) -> PipelineResult<StageInsertion> {
        let id = stage.id().clone();
        if self.entries.contains_key(&id) || self.pending.contains_key(&id) {
            return Err(PipelineError::DuplicateStage(id));
        }

        let missing = self.missing_dependencies(&stage);
        if !missing.is_empty() {
            if self.strict {
                return Err(PipelineError::UnsatisfiedStageOrder { stage: id, missing });
            }
            tracing::debug!("Stage '{}' pending on {:?}", id, missing);
            self.pending.insert(id, stage);
            return Ok(StageInsertion::Pending);
        }

        match self.try_insert(stage) {
            Ok(()) => {
                self.resolve_pending();
                Ok(StageInsertion::Inserted)
            }
            Err(stage) => {
                if self.strict {
                    return Err(PipelineError::StageCycle { stage: id });
                }
                tracing::warn!("Stage '{}' closes an ordering cycle; holding it pending", id);
                self.pending.insert(id, stage);
                Ok(StageInsertion::Pending)
            }
        }
    }

    fn missing_dependencies(&self, stage: &Stage) -> Vec<StageId> {
        stage
            .after
            .iter()
            .filter(|dep| !self.entries.contains_key(*dep))
            .cloned()
            .collect()
    }

    /// Insert and re-sort. Hands the stage back if the new order would contain a cycle.
    fn try_insert(&mut self, stage: Stage) -> Result<(), Stage> {
        let id = stage.id().clone();
        let entry = StageEntry {
            stage: stage.clone(),
            seq: self.next_seq,
        };
        self.entries.insert(id.clone(), entry);

        match self.sorted() {
            Some(order) => {
                self.next_seq += 1;
                self.order = order;
                Ok(())
            }
            None => {
                self.entries.remove(&id);
                Err(stage)
            }
        }
    }

    fn resolve_pending(&mut self) {
        loop {
            let ready: Vec<StageId> = self
                .pending
                .iter()
                .filter(|(_, stage)| self.missing_dependencies(stage).is_empty())
                .map(|(id, _)| id.clone())
                .collect();

            let mut progressed = false;
            for id in ready {
                let Some(stage) = self.pending.shift_remove(&id) else {
                    continue;
                };
                match self.try_insert(stage) {
                    Ok(()) => {
                        tracing::debug!("Pending stage '{}' inserted", id);
                        progressed = true;
                    }
                    Err(stage) => {
                        self.pending.insert(id, stage);
                    }
                }
            }

            if !progressed {
                break;
            }
        }
    }

    /// Kahn's algorithm over every registered stage. `None` on a cycle.
    fn sorted(&self) -> Option<Vec<StageId>> {
        let mut incoming: AHashMap<&StageId, usize> =
            self.entries.keys().map(|id| (id, 0)).collect();
        let mut outgoing: AHashMap<&StageId, AHashSet<&StageId>> = AHashMap::new();

        for (id, entry) in &self.entries {
            let edges = entry
                .stage
                .after
                .iter()
                .filter_map(|dep| self.entries.get_key_value(dep).map(|(k, _)| (k, id)))
                .chain(
                    entry
                        .stage
                        .before
                        .iter()
                        .filter_map(|dep| self.entries.get_key_value(dep).map(|(k, _)| (id, k))),
                );
            for (from, to) in edges {
                if outgoing.entry(from).or_default().insert(to) {
                    *incoming.entry(to).or_insert(0) += 1;
                }
            }
        }

        // Ready stages keyed by registration sequence, so the earliest registered runs first.
        let mut ready: BTreeMap<u64, &StageId> = incoming
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| (self.entries[*id].seq, *id))
            .collect();

        let mut order = Vec::with_capacity(self.entries.len());
        while let Some((_, id)) = ready.pop_first() {
            order.push(id.clone());
            if let Some(targets) = outgoing.get(id) {
                for target in targets {
                    if let Some(count) = incoming.get_mut(target) {
                        *count -= 1;
                        if *count == 0 {
                            ready.insert(self.entries[*target].seq, *target);
                        }
                    }
                }
            }
        }

        (order.len() == self.entries.len()).then_some(order)
    }

    /// Stages waiting for dependencies, in registration order.
    pub fn pending_stages(&self) -> Vec<StageId> {
        self.pending.keys().cloned().collect()
    }

    pub fn is_pending(&self, id: &StageId) -> bool {
        self.pending.contains_key(id)
    }

    /// Whether the stage is ordered or pending.
    pub fn contains(&self, id: &StageId) -> bool {
        self.entries.contains_key(id) || self.pending.contains_key(id)
    }

    /// An ordered stage.
    pub fn get(&self, id: &StageId) -> Option<&Stage> {
        self.entries.get(id).map(|entry| &entry.stage)
    }

    pub fn position(&self, id: &StageId) -> Option<usize> {
        self.order.iter().position(|s| s == id)
    }

    /// Ordered stage ids.
    pub fn ids(&self) -> &[StageId] {
        &self.order
    }

    /// Ordered stages.
    pub fn ordered(&self) -> impl Iterator<Item = &Stage> {
        self.order.iter().filter_map(|id| self.get(id))
    }

    /// Stages strictly before `id`. Empty if `id` is not ordered.
    pub fn before(&self, id: &StageId) -> Vec<StageId> {
        match self.position(id) {
            Some(pos) => self.order[..pos].to_vec(),
            None => Vec::new(),
        }
    }

    /// Stages strictly after `id`. Empty if `id` is not ordered.
    pub fn after(&self, id: &StageId) -> Vec<StageId> {
        match self.position(id) {
            Some(pos) => self.order[pos + 1..].to_vec(),
            None => Vec::new(),
        }
    }

    /// Stages strictly between `from` and `to`. Empty if either is not ordered or
    /// `to` does not come after `from`.
    pub fn between(&self, from: &StageId, to: &StageId) -> Vec<StageId> {
        match (self.position(from), self.position(to)) {
            (Some(start), Some(end)) if start < end => self.order[start + 1..end].to_vec(),
            _ => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &StageList) -> Vec<&str> {
        list.ids().iter().map(|id| id.as_str()).collect()
    }

    #[test]
    fn test_registration_order_is_tie_break() {
        let mut list = StageList::new(false);
        list.register(Stage::new("a")).unwrap();
        list.register(Stage::new("b")).unwrap();
        list.register(Stage::new("c")).unwrap();
        assert_eq!(ids(&list), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_before_constraint_moves_stage_forward() {
        let mut list = StageList::new(false);
        list.register(Stage::new("opaque")).unwrap();
        list.register(Stage::new("shadow").before("opaque")).unwrap();
        assert_eq!(ids(&list), vec!["shadow", "opaque"]);
    }

    #[test]
    fn test_before_unregistered_stage_is_ignored() {
        let mut list = StageList::new(true);
        assert_eq!(
            list.register(Stage::new("shadow").before("opaque")).unwrap(),
            StageInsertion::Inserted
        );
        list.register(Stage::new("late")).unwrap();
        list.register(Stage::new("opaque")).unwrap();
        assert_eq!(ids(&list), vec!["shadow", "late", "opaque"]);
    }

    #[test]
    fn test_after_constraint() {
        let mut list = StageList::new(false);
        list.register(Stage::new("opaque")).unwrap();
        list.register(Stage::new("sky").before("opaque")).unwrap();
        list.register(Stage::new("post").after("opaque")).unwrap();
        assert_eq!(ids(&list), vec!["sky", "opaque", "post"]);
    }

    #[test]
    fn test_pending_until_dependency_appears() {
        let mut list = StageList::new(false);
        assert_eq!(
            list.register(Stage::new("post").after("opaque")).unwrap(),
            StageInsertion::Pending
        );
        assert_eq!(list.pending_stages(), vec![StageId::new("post")]);
        assert!(list.is_empty());

        assert_eq!(
            list.register(Stage::new("opaque")).unwrap(),
            StageInsertion::Inserted
        );
        assert!(list.pending_stages().is_empty());
        assert_eq!(ids(&list), vec!["opaque", "post"]);
    }

    #[test]
    fn test_pending_chain_resolves() {
        let mut list = StageList::new(false);
        list.register(Stage::new("c").after("b")).unwrap();
        list.register(Stage::new("b").after("a")).unwrap();
        assert_eq!(list.pending_stages().len(), 2);

        list.register(Stage::new("a")).unwrap();
        assert_eq!(ids(&list), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_strict_missing_dependency_is_error() {
        let mut list = StageList::new(true);
        let err = list.register(Stage::new("post").after("opaque")).unwrap_err();
        assert_eq!(
            err,
            PipelineError::UnsatisfiedStageOrder {
                stage: StageId::new("post"),
                missing: vec![StageId::new("opaque")],
            }
        );
        assert!(!list.contains(&StageId::new("post")));
    }

    #[test]
    fn test_cycle_detection() {
        let mut strict = StageList::new(true);
        strict.register(Stage::new("a")).unwrap();
        strict.register(Stage::new("b").after("a")).unwrap();
        let err = strict.register(Stage::new("c").after("b").before("a")).unwrap_err();
        assert_eq!(err, PipelineError::StageCycle { stage: StageId::new("c") });
        assert_eq!(ids(&strict), vec!["a", "b"]);

        let mut lenient = StageList::new(false);
        lenient.register(Stage::new("a")).unwrap();
        lenient.register(Stage::new("b").after("a")).unwrap();
        assert_eq!(
            lenient.register(Stage::new("c").after("b").before("a")).unwrap(),
            StageInsertion::Pending
        );
        assert_eq!(ids(&lenient), vec!["a", "b"]);
        // The rejected stage is handed back intact and parked as pending.
        assert_eq!(lenient.pending_stages(), vec![StageId::new("c")]);
        assert!(lenient.get(&StageId::new("c")).is_none());
        lenient.register(Stage::new("d")).unwrap();
        assert_eq!(ids(&lenient), vec!["a", "b", "d"]);
        assert_eq!(lenient.pending_stages(), vec![StageId::new("c")]);
    }

    #[test]
    fn test_duplicate_stage() {
        let mut list = StageList::new(false);
        list.register(Stage::new("a")).unwrap();
        assert_eq!(
            list.register(Stage::new("a")),
            Err(PipelineError::DuplicateStage(StageId::new("a")))
        );
    }

    #[test]
    fn test_range_queries() {
        let mut list = StageList::new(false);
        for name in ["a", "b", "c", "d"] {
            list.register(Stage::new(name)).unwrap();
        }
        let (a, c, d) = (StageId::new("a"), StageId::new("c"), StageId::new("d"));

        assert_eq!(list.before(&c), vec![StageId::new("a"), StageId::new("b")]);
        assert_eq!(list.after(&c), vec![d.clone()]);
        assert_eq!(list.between(&a, &d), vec![StageId::new("b"), c.clone()]);
        assert!(list.between(&d, &a).is_empty());
        assert!(list.before(&StageId::new("missing")).is_empty());
    }
}
