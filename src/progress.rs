//! Weighted, hierarchically composable progress.
//!
//! A [`Progress`] node covers the range `[start, start + weight]` of the
//! overall bar and reports `absolute_value = start + value * weight`.
//! Chained nodes split the range they share with their predecessor: when B
//! follows A with `SubWeight::Weight(f)`, B takes `f` of A's weight and A
//! keeps the rest, so finishing A moves the bar to `1 - f` and finishing B
//! moves it to 1. `SubWeight::Skip` steps take no room at all.
//!
//! The node is plain data behind a lock; it knows nothing about scheduling.
//! Observer notification goes through the engine's delivery context.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::delivery;

/// Callback invoked with the node whose value changed.
pub type Observer = Arc<dyn Fn(&Progress) + Send + Sync>;

/// How much of the shared range a chained step occupies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SubWeight {
    /// Fraction of the predecessor's current weight handed to this step.
    Weight(f64),
    /// Zero visible weight; used for pure value transforms.
    Skip,
}

impl Default for SubWeight {
    fn default() -> Self {
        SubWeight::Weight(0.5)
    }
}

#[derive(Clone)]
pub struct Progress {
    node: Arc<Node>,
}

struct Node {
    state: Mutex<NodeState>,
    link: Option<Link>,
}

struct Link {
    sub_weight: SubWeight,
    dependency: Progress,
}

struct NodeState {
    weight: f64,
    start: f64,
    value: f64,
    observers: Vec<Observer>,
}

impl Progress {
    pub fn new() -> Self {
        let progress = Self::from_node(Node {
            state: Mutex::new(NodeState::initial(1.0)),
            link: None,
        });
        progress.reset(None);
        progress
    }

    /// A node that follows `dependency` and takes a share of its range.
    pub fn chained(sub_weight: SubWeight, dependency: &Progress) -> Self {
        let weight = match sub_weight {
            SubWeight::Skip => 0.0,
            SubWeight::Weight(_) => 1.0,
        };
        let progress = Self::from_node(Node {
            state: Mutex::new(NodeState::initial(weight)),
            link: Some(Link {
                sub_weight,
                dependency: dependency.clone(),
            }),
        });
        progress.reset(None);
        progress
    }

    fn from_node(node: Node) -> Self {
        Self {
            node: Arc::new(node),
        }
    }

    fn state(&self) -> MutexGuard<'_, NodeState> {
        self.node.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn weight(&self) -> f64 {
        self.state().weight
    }

    pub fn start(&self) -> f64 {
        self.state().start
    }

    pub fn value(&self) -> f64 {
        self.state().value
    }

    pub fn absolute_value(&self) -> f64 {
        let state = self.state();
        state.start + state.value * state.weight
    }

    pub fn sub_weight(&self) -> Option<SubWeight> {
        self.node.link.as_ref().map(|link| link.sub_weight)
    }

    /// Store `value` and notify observers on the delivery context. Setting
    /// the current value again does nothing.
    pub fn update(&self, value: f64) {
        let value = value.clamp(0.0, 1.0);
        {
            let mut state = self.state();
            if state.value == value {
                return;
            }
            state.value = value;
        }

        let weak = Arc::downgrade(&self.node);
        delivery::dispatch(move || {
            if let Some(node) = weak.upgrade() {
                let progress = Progress { node };
                let observers = progress.state().observers.clone();
                for observer in &observers {
                    observer(&progress);
                }
            }
        });
    }

    /// Register an observer. On a chained node the observer is also
    /// registered on every predecessor, so it sees the whole chain move.
    pub fn add_observer(&self, observer: Observer) {
        self.state().observers.push(Arc::clone(&observer));
        if let Some(link) = &self.node.link {
            link.dependency.add_observer(observer);
        }
    }

    /// Convenience for observers that only care about the absolute value.
    pub fn observe(&self, f: impl Fn(f64) + Send + Sync + 'static) {
        self.add_observer(Arc::new(move |progress: &Progress| {
            f(progress.absolute_value())
        }));
    }

    /// Re-parent this node into `root`'s range, taking over its observers.
    /// Without a root the node spans the full `[0, 1]` range again.
    pub fn reset(&self, root: Option<&Progress>) {
        match root {
            Some(root) => {
                let (weight, start, observers) = {
                    let state = root.state();
                    (state.weight, state.start, state.observers.clone())
                };
                self.update_weight(weight);
                self.update_start(start + weight);
                for observer in observers {
                    self.add_observer(observer);
                }
            }
            None => {
                self.update_weight(1.0);
                self.update_start(1.0);
            }
        }
    }

    /// Place this node so that it ends at `full`, then line the chain of
    /// predecessors up behind it.
    fn update_start(&self, full: f64) {
        let start = {
            let mut state = self.state();
            state.start = full - state.weight;
            state.start
        };
        if let Some(link) = &self.node.link {
            link.dependency.update_start(start);
        }
    }

    /// Give this node (and the chain behind it) a total weight of `weight`.
    fn update_weight(&self, weight: f64) {
        let Some(link) = &self.node.link else {
            self.state().weight = weight;
            return;
        };

        let dependency = link.nearest_weighted();
        dependency.update_weight(weight);

        if let SubWeight::Weight(fraction) = link.sub_weight {
            let available = dependency.weight();
            self.state().weight = fraction * available;
            dependency.state().weight = (1.0 - fraction) * available;
        }
    }
}

impl Link {
    /// Walk back over skip steps to the predecessor that actually holds
    /// weight.
    fn nearest_weighted(&self) -> Progress {
        let mut current = self.dependency.clone();
        loop {
            let next = match &current.node.link {
                Some(link) if link.sub_weight == SubWeight::Skip => link.dependency.clone(),
                _ => return current,
            };
            current = next;
        }
    }
}

impl NodeState {
    fn initial(weight: f64) -> Self {
        Self {
            weight,
            start: 0.0,
            value: 0.0,
            observers: Vec::new(),
        }
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Progress")
            .field("weight", &state.weight)
            .field("start", &state.start)
            .field("value", &state.value)
            .field("observers", &state.observers.len())
            .finish()
    }
}
