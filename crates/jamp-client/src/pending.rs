//! The pending-request table: in-flight bookkeeping keyed by request id.
//!
//! Every outbound request gets exactly one entry, and the entry is removed
//! exactly once by whichever happens first:
//!
//! | Kind  | Removed by                                        |
//! |-------|---------------------------------------------------|
//! | Send  | transport acknowledgement, transport failure, expiry |
//! | Query | reply, error, transport failure, expiry           |
//!
//! Removal hands the entry back to the caller, which then completes it.
//! Because completion consumes the entry, a request cannot be completed
//! twice.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use jamp_protocol::QueryId;
use jamp_transport::RequestKind;
use serde_json::Value;
use tracing::debug;

use crate::RequestError;

/// Receives the terminal outcome of a query.
pub type Completion = Box<dyn FnOnce(Result<Value, RequestError>) + Send>;

/// One in-flight request.
pub struct PendingRequest {
    pub id: QueryId,
    pub kind: RequestKind,
    pub address: String,
    pub method: String,
    pub deadline: Instant,
    pub timeout: Duration,
    completion: Option<Completion>,
}

impl PendingRequest {
    /// A fire-and-forget entry: nobody is waiting on its outcome.
    pub fn send(
        id: QueryId,
        address: impl Into<String>,
        method: impl Into<String>,
        now: Instant,
        timeout: Duration,
    ) -> Self {
        Self {
            id,
            kind: RequestKind::Send,
            address: address.into(),
            method: method.into(),
            deadline: now + timeout,
            timeout,
            completion: None,
        }
    }

    /// A query entry whose outcome goes to `completion`.
    pub fn query(
        id: QueryId,
        address: impl Into<String>,
        method: impl Into<String>,
        now: Instant,
        timeout: Duration,
        completion: Completion,
    ) -> Self {
        Self {
            id,
            kind: RequestKind::Query,
            address: address.into(),
            method: method.into(),
            deadline: now + timeout,
            timeout,
            completion: Some(completion),
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Delivers the outcome. Returns `false` when there was no completion
    /// to deliver it to (send-kind entries).
    pub fn complete(self, result: Result<Value, RequestError>) -> bool {
        match self.completion {
            Some(completion) => {
                completion(result);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("address", &self.address)
            .field("method", &self.method)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

/// All in-flight requests of one client, at most one per id.
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: HashMap<QueryId, PendingRequest>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry.
    ///
    /// # Errors
    /// Hands `request` back if its id is already in flight.
    pub fn insert(&mut self, request: PendingRequest) -> Result<(), PendingRequest> {
        if self.entries.contains_key(&request.id) {
            return Err(request);
        }
        debug!(id = %request.id, kind = ?request.kind, "request pending");
        self.entries.insert(request.id, request);
        Ok(())
    }

    pub fn remove(&mut self, id: QueryId) -> Option<PendingRequest> {
        self.entries.remove(&id)
    }

    pub fn get(&self, id: QueryId) -> Option<&PendingRequest> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: QueryId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Snapshot of the ids whose deadline has passed at `now`.
    ///
    /// Collected up front so the caller can remove them without holding a
    /// borrow of the table.
    pub fn expired_ids(&self, now: Instant) -> Vec<QueryId> {
        self.entries
            .values()
            .filter(|entry| entry.is_expired(now))
            .map(|entry| entry.id)
            .collect()
    }

    /// Removes every entry, for shutdown.
    pub fn drain(&mut self) -> Vec<PendingRequest> {
        self.entries.drain().map(|(_, entry)| entry).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn recorded() -> (Completion, Arc<Mutex<Vec<Result<Value, String>>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let completion: Completion = Box::new(move |result| {
            sink.lock().unwrap().push(result.map_err(|e| e.to_string()));
        });
        (completion, log)
    }

    #[test]
    fn test_insert_rejects_duplicate_id() {
        let now = Instant::now();
        let mut table = PendingTable::new();
        table
            .insert(PendingRequest::send(QueryId(1), "/a", "m", now, TIMEOUT))
            .unwrap();

        let dup = PendingRequest::send(QueryId(1), "/b", "m", now, TIMEOUT);
        let rejected = table.insert(dup).unwrap_err();

        assert_eq!(rejected.address, "/b");
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(QueryId(1)).unwrap().address, "/a");
    }

    #[test]
    fn test_remove_happens_once() {
        let now = Instant::now();
        let mut table = PendingTable::new();
        let (completion, log) = recorded();
        table
            .insert(PendingRequest::query(QueryId(3), "/svc", "add", now, TIMEOUT, completion))
            .unwrap();

        let entry = table.remove(QueryId(3)).unwrap();
        assert!(entry.complete(Ok(json!(5))));
        assert!(table.remove(QueryId(3)).is_none());
        assert_eq!(*log.lock().unwrap(), vec![Ok(json!(5))]);
    }

    #[test]
    fn test_expired_ids_uses_deadline() {
        let start = Instant::now();
        let mut table = PendingTable::new();
        table
            .insert(PendingRequest::send(QueryId(1), "/a", "m", start, Duration::from_secs(1)))
            .unwrap();
        table
            .insert(PendingRequest::send(QueryId(2), "/a", "m", start, Duration::from_secs(5)))
            .unwrap();

        assert!(table.expired_ids(start).is_empty());
        assert_eq!(table.expired_ids(start + Duration::from_secs(2)), vec![QueryId(1)]);

        let mut both = table.expired_ids(start + Duration::from_secs(5));
        both.sort();
        assert_eq!(both, vec![QueryId(1), QueryId(2)]);
    }

    #[test]
    fn test_send_entry_has_no_completion() {
        let entry = PendingRequest::send(QueryId(9), "/a", "m", Instant::now(), TIMEOUT);
        assert_eq!(entry.kind, RequestKind::Send);
        assert!(!entry.complete(Ok(Value::Null)));
    }

    #[test]
    fn test_drain_empties_table() {
        let now = Instant::now();
        let mut table = PendingTable::new();
        for id in 0..3 {
            table
                .insert(PendingRequest::send(QueryId(id), "/a", "m", now, TIMEOUT))
                .unwrap();
        }
        assert_eq!(table.drain().len(), 3);
        assert!(table.is_empty());
    }
}
