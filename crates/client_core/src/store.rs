//! Observable state cell shared by the session, cart and feed stores.

use tokio::sync::{broadcast, watch};

const STORE_CHANGE_CAPACITY: usize = 256;

pub struct Store<S> {
    state: watch::Sender<S>,
    changes: broadcast::Sender<S>,
}

impl<S> Store<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn new(initial: S) -> Self {
        let (state, _) = watch::channel(initial);
        let (changes, _) = broadcast::channel(STORE_CHANGE_CAPACITY);
        Self { state, changes }
    }

    pub fn snapshot(&self) -> S {
        self.state.borrow().clone()
    }

    /// Every mutation is delivered in order. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<S> {
        self.changes.subscribe()
    }

    /// Latest-value view; intermediate snapshots may be skipped.
    pub fn watch(&self) -> watch::Receiver<S> {
        self.state.subscribe()
    }

    /// Applies `mutate` and publishes the result. The broadcast happens while
    /// the write lock is held so subscribers see mutations in commit order.
    pub fn update(&self, mutate: impl FnOnce(&mut S)) -> S {
        let mut published = None;
        self.state.send_modify(|state| {
            mutate(state);
            let _ = self.changes.send(state.clone());
            published = Some(state.clone());
        });
        published.unwrap_or_else(|| self.snapshot())
    }

    pub fn replace(&self, next: S) -> S {
        self.update(|state| *state = next)
    }
}

impl<S> Default for Store<S>
where
    S: Clone + Default + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(S::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_every_mutation_in_order() {
        let store = Store::new(0u32);
        let mut rx = store.subscribe();

        store.update(|value| *value += 1);
        store.update(|value| *value += 1);
        store.replace(10);

        assert_eq!(rx.recv().await.expect("first"), 1);
        assert_eq!(rx.recv().await.expect("second"), 2);
        assert_eq!(rx.recv().await.expect("third"), 10);
        assert_eq!(store.snapshot(), 10);
    }

    #[test]
    fn dropped_receiver_does_not_block_updates() {
        let store = Store::new(String::new());
        drop(store.subscribe());

        let published = store.update(|value| value.push_str("hello"));
        assert_eq!(published, "hello");
        assert_eq!(*store.watch().borrow(), "hello");
    }
}
