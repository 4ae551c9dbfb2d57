//! Correlation state shared by callers and the reader loop.
//!
//! Two maps keyed by the same request identifier:
//! - pending calls: the delivery slot each waiting caller reads from
//! - resolver registrations: the import resolver a call brought along
//!
//! Identifiers start at 1 and are never reused. All state sits behind one
//! mutex that is never held across an await.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use crate::error::{Result, SasswireError};
use crate::protocol::CompileResult;
use crate::resolver::ImportResolver;

/// What a waiting caller eventually receives.
pub(crate) type Delivery = Result<CompileResult>;

/// A call's import resolver plus the canonical URLs it has produced so far.
pub(crate) struct Registration {
    resolver: Arc<dyn ImportResolver>,
    canonical: Mutex<HashSet<String>>,
}

impl Registration {
    fn new(resolver: Arc<dyn ImportResolver>) -> Self {
        Self {
            resolver,
            canonical: Mutex::new(HashSet::new()),
        }
    }

    pub(crate) fn resolver(&self) -> Arc<dyn ImportResolver> {
        self.resolver.clone()
    }

    /// Record a URL returned by `canonicalize_url`.
    pub(crate) fn remember(&self, canonical_url: &str) {
        self.canonical
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(canonical_url.to_string());
    }

    /// Whether `load` may be asked for this URL.
    pub(crate) fn knows(&self, canonical_url: &str) -> bool {
        self.canonical
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(canonical_url)
    }
}

struct Inner {
    /// `None` once the identifier space is used up.
    next_id: Option<u32>,
    pending: HashMap<u32, oneshot::Sender<Delivery>>,
    registrations: HashMap<u32, Arc<Registration>>,
    closed: bool,
}

/// Pending calls and resolver registrations for one connection.
pub(crate) struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::starting_at(1)
    }

    fn starting_at(first_id: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: Some(first_id),
                pending: HashMap::new(),
                registrations: HashMap::new(),
                closed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate the next identifier, create its pending call and register
    /// the resolver (if any) under it, all in one step.
    pub(crate) fn submit(
        &self,
        resolver: Option<Arc<dyn ImportResolver>>,
    ) -> Result<(u32, oneshot::Receiver<Delivery>)> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(SasswireError::ConnectionClosed);
        }

        let id = inner.next_id.ok_or_else(|| {
            SasswireError::Protocol("request identifiers exhausted".to_string())
        })?;
        inner.next_id = id.checked_add(1);

        let (tx, rx) = oneshot::channel();
        inner.pending.insert(id, tx);
        if let Some(resolver) = resolver {
            inner
                .registrations
                .insert(id, Arc::new(Registration::new(resolver)));
        }
        Ok((id, rx))
    }

    /// Deliver the final outcome of `id` and release its registration.
    ///
    /// Returns false if no call is pending under `id`. A caller that already
    /// stopped waiting is not an error; the outcome is discarded.
    pub(crate) fn complete(&self, id: u32, delivery: Delivery) -> bool {
        let slot = {
            let mut inner = self.lock();
            inner.registrations.remove(&id);
            inner.pending.remove(&id)
        };

        match slot {
            Some(tx) => {
                if tx.send(delivery).is_err() {
                    tracing::debug!(id, "Caller stopped waiting, discarding response");
                }
                true
            }
            None => false,
        }
    }

    /// Forget a call whose request never reached the engine.
    pub(crate) fn withdraw(&self, id: u32) {
        let mut inner = self.lock();
        inner.pending.remove(&id);
        inner.registrations.remove(&id);
    }

    /// Withdraw `id` when the returned guard drops, unless it is disarmed
    /// first. Covers a caller abandoned before its request was queued.
    pub(crate) fn withdraw_on_drop(&self, id: u32) -> WithdrawGuard<'_> {
        WithdrawGuard {
            registry: self,
            id,
            armed: true,
        }
    }

    pub(crate) fn registration(&self, id: u32) -> Option<Arc<Registration>> {
        self.lock().registrations.get(&id).cloned()
    }

    /// True if `id` names a call that is still outstanding.
    pub(crate) fn is_pending(&self, id: u32) -> bool {
        self.lock().pending.contains_key(&id)
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.lock().pending.len()
    }

    /// Fail every pending call with [`SasswireError::ConnectionClosed`] and
    /// refuse new ones. Returns how many calls were failed.
    pub(crate) fn close(&self) -> usize {
        let pending: Vec<_> = {
            let mut inner = self.lock();
            inner.closed = true;
            inner.registrations.clear();
            inner.pending.drain().collect()
        };

        let count = pending.len();
        for (_, tx) in pending {
            let _ = tx.send(Err(SasswireError::ConnectionClosed));
        }
        count
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

pub(crate) struct WithdrawGuard<'a> {
    registry: &'a Registry,
    id: u32,
    armed: bool,
}

impl WithdrawGuard<'_> {
    /// The request reached the writer queue; keep the call pending.
    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for WithdrawGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!(id = self.id, "Request never queued, withdrawing");
            self.registry.withdraw(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CompileSuccess;
    use crate::resolver::ResolveResult;

    struct Nothing;

    impl ImportResolver for Nothing {
        fn canonicalize_url(&self, _url: &str) -> ResolveResult<Option<String>> {
            Ok(None)
        }

        fn load(&self, _canonical_url: &str) -> ResolveResult<String> {
            Err("nothing to load".into())
        }
    }

    fn success(css: &str) -> Delivery {
        Ok(CompileResult::Success(CompileSuccess {
            css: css.to_string(),
            source_map: None,
        }))
    }

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let registry = Registry::new();
        let ids: Vec<u32> = (0..5).map(|_| registry.submit(None).unwrap().0).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(registry.outstanding(), 5);
    }

    #[test]
    fn test_ids_are_distinct_under_contention() {
        let registry = Arc::new(Registry::new());
        let mut threads = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            threads.push(std::thread::spawn(move || {
                (0..100)
                    .map(|_| registry.submit(None).unwrap().0)
                    .collect::<Vec<_>>()
            }));
        }

        let mut all: Vec<u32> = threads
            .into_iter()
            .flat_map(|t| t.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 800);
    }

    #[test]
    fn test_identifier_space_does_not_wrap() {
        let registry = Registry::starting_at(u32::MAX);
        let (last, _rx) = registry.submit(None).unwrap();
        assert_eq!(last, u32::MAX);
        assert!(matches!(
            registry.submit(None),
            Err(SasswireError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_complete_delivers_once_and_releases_registration() {
        let registry = Registry::new();
        let (id, rx) = registry.submit(Some(Arc::new(Nothing))).unwrap();
        assert!(registry.registration(id).is_some());

        assert!(registry.complete(id, success("a{}")));
        assert!(registry.registration(id).is_none());
        assert!(!registry.is_pending(id));
        assert!(!registry.complete(id, success("again")));

        match rx.await.unwrap().unwrap() {
            CompileResult::Success(s) => assert_eq!(s.css, "a{}"),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_complete_into_dropped_slot_is_silent() {
        let registry = Registry::new();
        let (id, rx) = registry.submit(None).unwrap();
        drop(rx);
        assert!(registry.complete(id, success("late")));
        assert_eq!(registry.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_close_fails_every_pending_call() {
        let registry = Registry::new();
        let receivers: Vec<_> = (0..3).map(|_| registry.submit(None).unwrap().1).collect();

        assert_eq!(registry.close(), 3);
        assert!(registry.is_closed());
        for rx in receivers {
            assert!(matches!(
                rx.await.unwrap(),
                Err(SasswireError::ConnectionClosed)
            ));
        }

        assert!(matches!(
            registry.submit(None),
            Err(SasswireError::ConnectionClosed)
        ));
        assert_eq!(registry.close(), 0);
    }

    #[test]
    fn test_withdraw_forgets_call() {
        let registry = Registry::new();
        let (id, _rx) = registry.submit(Some(Arc::new(Nothing))).unwrap();
        registry.withdraw(id);
        assert!(!registry.is_pending(id));
        assert!(registry.registration(id).is_none());
    }

    #[test]
    fn test_withdraw_guard_unless_disarmed() {
        let registry = Registry::new();
        let (dropped, _rx1) = registry.submit(Some(Arc::new(Nothing))).unwrap();
        let (queued, _rx2) = registry.submit(None).unwrap();

        drop(registry.withdraw_on_drop(dropped));
        registry.withdraw_on_drop(queued).disarm();

        assert!(!registry.is_pending(dropped));
        assert!(registry.registration(dropped).is_none());
        assert!(registry.is_pending(queued));
        assert_eq!(registry.outstanding(), 1);
    }

    #[test]
    fn test_registration_tracks_canonical_urls() {
        let registration = Registration::new(Arc::new(Nothing));
        assert!(!registration.knows("file:///a.scss"));
        registration.remember("file:///a.scss");
        assert!(registration.knows("file:///a.scss"));
    }
}
