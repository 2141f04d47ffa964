use crate::cache::ResultCache;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// State shared by the dispatch and display loops of one tracking session.
///
/// A new session is built on every start, so counters never carry over.
#[derive(Debug)]
pub struct Session {
    active: AtomicBool,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    bound: usize,
    next_sequence: AtomicU64,
    started_at: Instant,
    cache: ResultCache,
}

impl Session {
    pub fn new(bound: usize) -> Self {
        Self {
            active: AtomicBool::new(true),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            bound: bound.max(1),
            next_sequence: AtomicU64::new(0),
            started_at: Instant::now(),
            cache: ResultCache::new(),
        }
    }

    /// Claims one in-flight slot, or `None` when inactive or saturated.
    ///
    /// The slot is released when the returned permit drops.
    pub fn try_reserve(self: &Arc<Self>) -> Option<InFlightPermit> {
        if !self.is_active() {
            return None;
        }

        let mut current = self.in_flight.load(Ordering::Acquire);
        loop {
            if current >= self.bound {
                return None;
            }
            match self.in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        self.peak_in_flight.fetch_max(current + 1, Ordering::AcqRel);

        let sequence = self.next_sequence.fetch_add(1, Ordering::AcqRel) + 1;
        Some(InFlightPermit {
            session: Arc::clone(self),
            sequence,
        })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Marks the session stopped and closes its cache. Returns whether this
    /// call performed the transition.
    pub fn deactivate(&self) -> bool {
        let was_active = self.active.swap(false, Ordering::AcqRel);
        if was_active {
            self.cache.close();
        }
        was_active
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Highest in-flight count observed over the session.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Acquire)
    }

    pub fn bound(&self) -> usize {
        self.bound
    }

    /// Number of requests issued so far.
    pub fn issued(&self) -> u64 {
        self.next_sequence.load(Ordering::Acquire)
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// One outstanding analysis request.
#[derive(Debug)]
pub struct InFlightPermit {
    session: Arc<Session>,
    sequence: u64,
}

impl InFlightPermit {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        self.session.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bound_of_one_admits_a_single_request() {
        let session = Arc::new(Session::new(1));

        let permit = session.try_reserve().unwrap();
        assert_eq!(session.in_flight(), 1);
        assert!(session.try_reserve().is_none());

        drop(permit);
        assert_eq!(session.in_flight(), 0);
        assert!(session.try_reserve().is_some());
        assert_eq!(session.peak_in_flight(), 1);
    }

    #[test]
    fn sequences_are_monotonic() {
        let session = Arc::new(Session::new(3));
        let a = session.try_reserve().unwrap();
        let b = session.try_reserve().unwrap();
        let c = session.try_reserve().unwrap();
        assert!(session.try_reserve().is_none());
        assert_eq!((a.sequence(), b.sequence(), c.sequence()), (1, 2, 3));
        assert_eq!(session.issued(), 3);
    }

    #[test]
    fn zero_bound_is_raised_to_one() {
        assert_eq!(Session::new(0).bound(), 1);
    }

    #[test]
    fn inactive_session_refuses_reservations() {
        let session = Arc::new(Session::new(1));
        assert!(session.deactivate());
        assert!(!session.deactivate());
        assert!(session.try_reserve().is_none());
        assert!(session.cache().is_closed());
    }

    #[test]
    fn permits_outliving_stop_still_release() {
        let session = Arc::new(Session::new(1));
        let permit = session.try_reserve().unwrap();
        session.deactivate();
        drop(permit);
        assert_eq!(session.in_flight(), 0);
    }

    #[test]
    fn concurrent_reservations_never_exceed_bound() {
        let session = Arc::new(Session::new(2));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let session = Arc::clone(&session);
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        if let Some(permit) = session.try_reserve() {
                            assert!(session.in_flight() <= 2);
                            drop(permit);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(session.in_flight(), 0);
        assert!(session.peak_in_flight() <= 2);
    }
}
