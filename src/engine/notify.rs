//! Change notification and lazy recomputation
//!
//! Mutations on the repository publish a `ChangeEvent` to every subscribed
//! listener. Anything that caches derived results implements `Recomputable`:
//! `invalidate` marks a result stale, `resolve` recomputes it on demand.

use std::sync::Arc;

use super::error::EngineResult;
use super::ids::IterationId;
use super::output::IterationOutput;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Added(IterationId),
    Updated(IterationId),
    /// The deleted iteration followed by its removed descendants
    Deleted(Vec<IterationId>),
    Deactivated(IterationId),
    Reactivated(IterationId),
}

impl ChangeEvent {
    /// The iteration the event is about
    pub fn iteration(&self) -> Option<IterationId> {
        match self {
            ChangeEvent::Added(id)
            | ChangeEvent::Updated(id)
            | ChangeEvent::Deactivated(id)
            | ChangeEvent::Reactivated(id) => Some(*id),
            ChangeEvent::Deleted(ids) => ids.first().copied(),
        }
    }
}

type Listener = Box<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Publish/subscribe list of listener closures
#[derive(Default)]
pub struct ChangeNotifier {
    listeners: Vec<Listener>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, listener: F)
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    pub fn notify(&self, event: &ChangeEvent) {
        log::trace!("{:?} -> {} listener(s)", event, self.listeners.len());
        for listener in &self.listeners {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// A cache of iteration outputs that can be invalidated and lazily rebuilt
pub trait Recomputable {
    /// Mark `id` and everything derived from it as stale
    fn invalidate(&mut self, id: IterationId) -> EngineResult<()>;

    /// Return the up-to-date output, recomputing if stale
    fn resolve(&mut self, id: IterationId, default: bool) -> EngineResult<Arc<IterationOutput>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_listeners_receive_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut notifier = ChangeNotifier::new();
        let sink = Arc::clone(&seen);
        notifier.subscribe(move |event| sink.lock().unwrap().push(event.clone()));

        notifier.notify(&ChangeEvent::Added(IterationId::Real(1)));
        notifier.notify(&ChangeEvent::Deleted(vec![IterationId::Real(1), IterationId::Real(2)]));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].iteration(), Some(IterationId::Real(1)));
    }
}
