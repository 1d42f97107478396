//! Deduplication of goals: one live goal per key, shared by everyone who
//! asks for that key.  The registry only holds weak pointers, so it never
//! keeps a goal alive by itself.

use crate::goal::{Goal, GoalNode, GoalPtr, WeakGoalPtr};
use rustc_hash::FxHashMap;
use std::rc::Rc;

#[derive(Default)]
pub struct Registry {
    goals: FxHashMap<String, WeakGoalPtr>,
    next_serial: u64,
    /// Goals created since the worker last looked; each is woken once.
    fresh: Vec<WeakGoalPtr>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The live goal for `key`, if any.
    pub fn get(&self, key: &str) -> Option<GoalPtr> {
        self.goals.get(key).and_then(|weak| weak.upgrade())
    }

    /// Returns the live goal for `key`, or creates one with `factory`.
    /// The factory gets no access to the registry, so the lookup and the
    /// insert cannot be interleaved with another request for the same key.
    pub fn get_or_create<F>(&mut self, key: &str, factory: F) -> GoalPtr
    where
        F: FnOnce() -> Box<dyn Goal>,
    {
        if let Some(goal) = self.get(key) {
            return goal;
        }
        let goal = self.create(factory());
        debug_assert_eq!(goal.key(), key, "goal key disagrees with registry key");
        self.goals.insert(key.to_string(), Rc::downgrade(&goal));
        goal
    }

    /// Creates a goal without registering its key.
    pub fn create(&mut self, goal: Box<dyn Goal>) -> GoalPtr {
        self.next_serial += 1;
        let goal = GoalNode::new(self.next_serial, goal);
        self.fresh.push(Rc::downgrade(&goal));
        goal
    }

    /// Forgets keys whose goal is gone.  Returns how many were dropped.
    pub fn prune(&mut self) -> usize {
        let before = self.goals.len();
        self.goals.retain(|_, weak| weak.strong_count() > 0);
        before - self.goals.len()
    }

    /// Number of keys with a live goal.
    pub fn len(&self) -> usize {
        self.goals.values().filter(|w| w.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total goals ever created through this registry.
    pub fn created(&self) -> usize {
        self.next_serial as usize
    }

    pub(crate) fn live(&self) -> Vec<GoalPtr> {
        self.goals.values().filter_map(|w| w.upgrade()).collect()
    }

    pub(crate) fn take_fresh(&mut self) -> Vec<WeakGoalPtr> {
        std::mem::take(&mut self.fresh)
    }
}
