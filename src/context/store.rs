use crate::context::frame::Frame;
use tracing::{trace, warn};

/// What the store currently points at.
#[derive(Clone, Debug, Default)]
pub enum StoreState {
    /// No scope has been entered yet.
    #[default]
    Pristine,
    Active(Frame),
    /// Every entered scope has exited again.
    Root,
}

impl StoreState {
    pub fn frame(&self) -> Option<&Frame> {
        match self {
            StoreState::Active(frame) => Some(frame),
            StoreState::Pristine | StoreState::Root => None,
        }
    }

    /// Same state, comparing active frames by identity.
    pub fn same_as(&self, other: &StoreState) -> bool {
        match (self, other) {
            (StoreState::Pristine, StoreState::Pristine) => true,
            (StoreState::Root, StoreState::Root) => true,
            (StoreState::Active(a), StoreState::Active(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

/// Holds the active frame. Only `enter` and `exit` mutate it.
#[derive(Debug, Default)]
pub struct ScopeStore {
    current: StoreState,
    ancestry: Vec<StoreState>,
}

impl ScopeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Frame> {
        self.current.frame().cloned()
    }

    pub fn state(&self) -> &StoreState {
        &self.current
    }

    /// Number of scopes entered and not yet exited.
    pub fn depth(&self) -> usize {
        self.ancestry.len()
    }

    /// Active frames from the outermost to the current one.
    pub fn chain(&self) -> Vec<Frame> {
        let mut frames: Vec<Frame> = self
            .current
            .frame()
            .map(|frame| frame.ancestors().cloned().collect())
            .unwrap_or_default();
        frames.reverse();
        frames
    }

    pub fn enter(&mut self, frame: Frame) {
        trace!(frame = frame.id(), depth = frame.depth(), "entering scope");
        let previous = std::mem::replace(&mut self.current, StoreState::Active(frame));
        self.ancestry.push(previous);
    }

    /// Restores the frame that was current before the matching `enter`.
    ///
    /// Leaving an outermost scope lands on [`StoreState::Root`], never back on
    /// [`StoreState::Pristine`]. Without a matching `enter` this moves to the
    /// current frame's parent, or to `Root` when there is none.
    pub fn exit(&mut self) {
        if let Some(previous) = self.ancestry.pop() {
            trace!(
                frame = self.current.frame().map(Frame::id),
                "exiting scope"
            );
            self.current = match previous {
                StoreState::Active(frame) => StoreState::Active(frame),
                StoreState::Pristine | StoreState::Root => StoreState::Root,
            };
            return;
        }
        warn!("scope exit without a matching enter");
        self.current = match self.current.frame().and_then(Frame::parent) {
            Some(parent) => StoreState::Active(parent.clone()),
            None => StoreState::Root,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::defaults::FieldRegistry;
    use indexmap::IndexMap;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn frame(parent: Option<Frame>) -> Frame {
        Frame::new(
            parent.as_ref().map_or(1, |p| p.id() + 1),
            IndexMap::new(),
            IndexMap::new(),
            parent,
            Rc::new(RefCell::new(FieldRegistry::new())),
        )
    }

    #[test]
    fn exit_restores_previous_frame_and_lands_on_root() {
        let mut store = ScopeStore::new();
        assert!(matches!(store.state(), StoreState::Pristine));

        let outer = frame(None);
        store.enter(outer.clone());
        let inner = frame(Some(outer.clone()));
        store.enter(inner.clone());
        assert!(store.current().is_some_and(|f| f.ptr_eq(&inner)));
        assert_eq!(store.depth(), 2);

        store.exit();
        assert!(store.current().is_some_and(|f| f.ptr_eq(&outer)));
        store.exit();
        assert!(store.current().is_none());
        assert!(matches!(store.state(), StoreState::Root));
        assert_eq!(store.depth(), 0);
    }

    #[test]
    fn reentering_from_root_returns_to_root() {
        let mut store = ScopeStore::new();
        store.enter(frame(None));
        store.exit();
        store.enter(frame(None));
        store.exit();
        assert!(matches!(store.state(), StoreState::Root));
    }

    #[test]
    fn unmatched_exit_moves_to_parent_then_root() {
        let mut store = ScopeStore::new();
        store.exit();
        assert!(matches!(store.state(), StoreState::Root));
        store.exit();
        assert!(matches!(store.state(), StoreState::Root));
    }

    #[test]
    fn chain_lists_outermost_first() {
        let mut store = ScopeStore::new();
        let a = frame(None);
        let b = frame(Some(a.clone()));
        store.enter(a.clone());
        store.enter(b.clone());
        let chain = store.chain();
        assert_eq!(chain.len(), 2);
        assert!(chain[0].ptr_eq(&a));
        assert!(chain[1].ptr_eq(&b));
    }

    #[test]
    fn same_as_compares_frame_identity() {
        let a = frame(None);
        let b = frame(None);
        assert!(StoreState::Active(a.clone()).same_as(&StoreState::Active(a)));
        assert!(!StoreState::Active(b).same_as(&StoreState::Root));
        assert!(!StoreState::Pristine.same_as(&StoreState::Root));
    }
}
