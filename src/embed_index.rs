use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

use rayon::prelude::*;

use crate::{Embedder, IndexError, RequestContext, TaskApi, TaskFilter};

const EMBED_BATCH: usize = 16;
const STALE_BUILD_RETRIES: usize = 3;

#[derive(Debug, Clone)]
pub(crate) struct IndexEntry {
    pub(crate) task_id: String,
    pub(crate) title: String,
    pub(crate) vector: Vec<f32>,
    pub(crate) updated_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct IndexHit {
    pub(crate) task_id: String,
    pub(crate) title: String,
    pub(crate) score: f32,
}

enum UserIndexState {
    Empty,
    Building,
    Ready(Arc<Vec<IndexEntry>>),
}

struct SlotInner {
    state: UserIndexState,
    /// Bumped on invalidation; a build started under an older generation
    /// must not install its (stale) result.
    generation: u64,
}

struct UserSlot {
    inner: Mutex<SlotInner>,
    cond: Condvar,
}

/// Resets a slot to Empty if the build unwinds, so waiters wake up and
/// the user is not wedged in Building forever.
struct BuildGuard {
    slot: Option<Arc<UserSlot>>,
}

impl BuildGuard {
    fn disarm(&mut self) {
        self.slot = None;
    }
}

impl Drop for BuildGuard {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            let mut inner = slot.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.state = UserIndexState::Empty;
            slot.cond.notify_all();
        }
    }
}

impl UserSlot {
    fn new() -> Arc<UserSlot> {
        Arc::new(UserSlot {
            inner: Mutex::new(SlotInner {
                state: UserIndexState::Empty,
                generation: 0,
            }),
            cond: Condvar::new(),
        })
    }
}

/// Per-user vector index over the user's tasks. Builds are single-flight:
/// one thread lists and embeds while concurrent callers for the same user
/// block on the condvar; users never share entries. The slot lock is never
/// held across network I/O.
pub(crate) struct SimilarityIndex {
    embedder: Arc<dyn Embedder>,
    users: Mutex<HashMap<String, Arc<UserSlot>>>,
}

impl SimilarityIndex {
    pub(crate) fn new(embedder: Arc<dyn Embedder>) -> SimilarityIndex {
        SimilarityIndex {
            embedder,
            users: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, user_id: &str) -> Arc<UserSlot> {
        let mut users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(users.entry(user_id.to_string()).or_insert_with(UserSlot::new))
    }

    /// Current entries for the user, building them if absent. Blocks while
    /// another thread is building the same user.
    pub(crate) fn ensure_ready(
        &self,
        ctx: &RequestContext,
        tasks: &dyn TaskApi,
    ) -> Result<Arc<Vec<IndexEntry>>, IndexError> {
        let slot = self.slot(ctx.user_id());
        for _ in 0..STALE_BUILD_RETRIES {
            let generation = {
                let mut inner = slot.inner.lock().unwrap_or_else(|e| e.into_inner());
                loop {
                    match inner.state {
                        UserIndexState::Ready(ref entries) => return Ok(Arc::clone(entries)),
                        UserIndexState::Building => {}
                        UserIndexState::Empty => break,
                    }
                    inner = slot.cond.wait(inner).unwrap_or_else(|e| e.into_inner());
                }
                inner.state = UserIndexState::Building;
                inner.generation
            };

            let mut guard = BuildGuard {
                slot: Some(Arc::clone(&slot)),
            };
            let built = self.build(ctx, tasks);
            guard.disarm();

            let mut inner = slot.inner.lock().unwrap_or_else(|e| e.into_inner());
            match built {
                Ok(entries) => {
                    let entries = Arc::new(entries);
                    if inner.generation == generation {
                        inner.state = UserIndexState::Ready(Arc::clone(&entries));
                        slot.cond.notify_all();
                        return Ok(entries);
                    }
                    // Invalidated mid-build; throw the stale result away
                    // and try again.
                    inner.state = UserIndexState::Empty;
                    slot.cond.notify_all();
                }
                Err(e) => {
                    inner.state = UserIndexState::Empty;
                    slot.cond.notify_all();
                    return Err(e);
                }
            }
        }
        Err(IndexError::NotReady)
    }

    fn build(
        &self,
        ctx: &RequestContext,
        tasks: &dyn TaskApi,
    ) -> Result<Vec<IndexEntry>, IndexError> {
        let records = tasks
            .list(ctx, &TaskFilter::default())
            .map_err(|e| IndexError::Build(format!("list tasks: {e}")))?;
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let texts: Vec<String> = records.iter().map(|r| r.embed_text()).collect();
        let vectors: Vec<Vec<f32>> = texts
            .par_chunks(EMBED_BATCH)
            .map(|chunk| self.embedder.embed_batch(chunk))
            .collect::<Result<Vec<_>, _>>()
            .map_err(IndexError::Build)?
            .into_iter()
            .flatten()
            .collect();
        if vectors.len() != records.len() {
            return Err(IndexError::Build(format!(
                "embedded {} of {} tasks",
                vectors.len(),
                records.len()
            )));
        }
        Ok(records
            .into_iter()
            .zip(vectors)
            .map(|(record, vector)| IndexEntry {
                task_id: record.id,
                title: record.title,
                vector,
                updated_at: record.updated_at,
            })
            .collect())
    }

    /// Top-k entries most similar to `text`, for context enrichment.
    pub(crate) fn query_text(
        &self,
        ctx: &RequestContext,
        tasks: &dyn TaskApi,
        text: &str,
        k: usize,
    ) -> Result<Vec<IndexHit>, IndexError> {
        let entries = self.ensure_ready(ctx, tasks)?;
        if entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let query = self
            .embedder
            .embed_batch(&[text.to_string()])
            .map_err(IndexError::Build)?
            .into_iter()
            .next()
            .ok_or(IndexError::NotReady)?;
        Ok(top_k(&entries, &query, k))
    }

    /// Drop the user's entries after a mutation; the next query rebuilds.
    pub(crate) fn invalidate(&self, user_id: &str) {
        let slot = self.slot(user_id);
        let mut inner = slot.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.generation += 1;
        if !matches!(inner.state, UserIndexState::Building) {
            inner.state = UserIndexState::Empty;
        }
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

/// Score descending; equal scores break toward the more recently updated
/// task, then by id for determinism.
fn top_k(entries: &[IndexEntry], query: &[f32], k: usize) -> Vec<IndexHit> {
    let mut scored: Vec<(&IndexEntry, f32)> = entries
        .iter()
        .map(|e| (e, cosine(&e.vector, query)))
        .collect();
    scored.sort_by(|(ea, sa), (eb, sb)| {
        sb.partial_cmp(sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(eb.updated_at.cmp(&ea.updated_at))
            .then(ea.task_id.cmp(&eb.task_id))
    });
    scored
        .into_iter()
        .take(k)
        .map(|(e, score)| IndexHit {
            task_id: e.task_id.clone(),
            title: e.title.clone(),
            score,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClientError, CredentialRelay, TaskFields, TaskRecord, TaskStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Maps a handful of known texts to fixed 2-d vectors.
    struct StubEmbedder {
        delay: Duration,
    }

    impl Embedder for StubEmbedder {
        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, String> {
            std::thread::sleep(self.delay);
            Ok(texts
                .iter()
                .map(|t| {
                    if t.contains("report") {
                        vec![1.0, 0.0]
                    } else if t.contains("groceries") {
                        vec![0.0, 1.0]
                    } else {
                        vec![0.7, 0.7]
                    }
                })
                .collect())
        }
    }

    struct StubTasks {
        records: Vec<TaskRecord>,
        list_calls: AtomicUsize,
    }

    impl TaskApi for StubTasks {
        fn create(&self, _: &RequestContext, _: &TaskFields) -> Result<TaskRecord, ClientError> {
            Err(ClientError::Validation("not supported".into()))
        }
        fn get(&self, _: &RequestContext, _: &str) -> Result<TaskRecord, ClientError> {
            Err(ClientError::NotFound)
        }
        fn list(
            &self,
            ctx: &RequestContext,
            _: &TaskFilter,
        ) -> Result<Vec<TaskRecord>, ClientError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .records
                .iter()
                .filter(|r| r.owner == ctx.user_id())
                .cloned()
                .collect())
        }
        fn update(
            &self,
            _: &RequestContext,
            _: &str,
            _: &TaskFields,
        ) -> Result<TaskRecord, ClientError> {
            Err(ClientError::NotFound)
        }
        fn delete(&self, _: &RequestContext, _: &str) -> Result<(), ClientError> {
            Err(ClientError::NotFound)
        }
    }

    fn record(id: &str, owner: &str, title: &str, updated_at: i64) -> TaskRecord {
        TaskRecord {
            id: id.to_string(),
            owner: owner.to_string(),
            title: title.to_string(),
            status: TaskStatus::Open,
            due: None,
            body: String::new(),
            updated_at,
        }
    }

    fn stub_tasks() -> StubTasks {
        StubTasks {
            records: vec![
                record("t1", "u1", "finish the report", 100),
                record("t2", "u1", "buy groceries", 200),
                record("t3", "u2", "write report for u2", 300),
            ],
            list_calls: AtomicUsize::new(0),
        }
    }

    fn ctx(relay: &Arc<CredentialRelay>, user: &str) -> RequestContext {
        RequestContext::new(relay, user, "tok".to_string(), None)
    }

    fn index(delay_ms: u64) -> SimilarityIndex {
        SimilarityIndex::new(Arc::new(StubEmbedder {
            delay: Duration::from_millis(delay_ms),
        }))
    }

    #[test]
    fn test_query_ranks_by_similarity_and_bounds_k() {
        let tasks = stub_tasks();
        let relay = CredentialRelay::new();
        let idx = index(0);
        let ctx = ctx(&relay, "u1");

        let hits = idx.query_text(&ctx, &tasks, "quarterly report", 5).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].task_id, "t1");
        assert!(hits[0].score > hits[1].score);

        let hits = idx.query_text(&ctx, &tasks, "quarterly report", 1).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_users_never_share_entries() {
        let tasks = stub_tasks();
        let relay = CredentialRelay::new();
        let idx = index(0);

        let hits = idx
            .query_text(&ctx(&relay, "u2"), &tasks, "report", 10)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].task_id, "t3");

        let hits = idx
            .query_text(&ctx(&relay, "u1"), &tasks, "report", 10)
            .unwrap();
        assert!(hits.iter().all(|h| h.task_id != "t3"));
    }

    #[test]
    fn test_concurrent_queries_build_once() {
        let tasks = Arc::new(stub_tasks());
        let relay = CredentialRelay::new();
        let idx = Arc::new(index(30));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let tasks = Arc::clone(&tasks);
            let relay = Arc::clone(&relay);
            let idx = Arc::clone(&idx);
            handles.push(std::thread::spawn(move || {
                let ctx = ctx(&relay, "u1");
                idx.query_text(&ctx, tasks.as_ref(), "report", 3).unwrap()
            }));
        }
        for h in handles {
            assert!(!h.join().unwrap().is_empty());
        }
        assert_eq!(tasks.list_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invalidate_forces_rebuild() {
        let tasks = stub_tasks();
        let relay = CredentialRelay::new();
        let idx = index(0);
        let ctx = ctx(&relay, "u1");

        idx.query_text(&ctx, &tasks, "report", 3).unwrap();
        idx.query_text(&ctx, &tasks, "groceries", 3).unwrap();
        assert_eq!(tasks.list_calls.load(Ordering::SeqCst), 1);

        idx.invalidate("u1");
        idx.query_text(&ctx, &tasks, "report", 3).unwrap();
        assert_eq!(tasks.list_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_empty_task_list_yields_no_hits() {
        let tasks = StubTasks {
            records: Vec::new(),
            list_calls: AtomicUsize::new(0),
        };
        let relay = CredentialRelay::new();
        let idx = index(0);
        let hits = idx
            .query_text(&ctx(&relay, "u1"), &tasks, "anything", 5)
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_tie_breaks_toward_recent_update() {
        let entries = vec![
            IndexEntry {
                task_id: "old".to_string(),
                title: "a".to_string(),
                vector: vec![1.0, 0.0],
                updated_at: 10,
            },
            IndexEntry {
                task_id: "new".to_string(),
                title: "b".to_string(),
                vector: vec![1.0, 0.0],
                updated_at: 20,
            },
        ];
        let hits = top_k(&entries, &[1.0, 0.0], 2);
        assert_eq!(hits[0].task_id, "new");
        assert_eq!(hits[1].task_id, "old");
    }

    #[test]
    fn test_build_failure_leaves_slot_retryable() {
        struct FailingTasks {
            calls: AtomicUsize,
        }
        impl TaskApi for FailingTasks {
            fn create(&self, _: &RequestContext, _: &TaskFields) -> Result<TaskRecord, ClientError> {
                unreachable!()
            }
            fn get(&self, _: &RequestContext, _: &str) -> Result<TaskRecord, ClientError> {
                unreachable!()
            }
            fn list(
                &self,
                _: &RequestContext,
                _: &TaskFilter,
            ) -> Result<Vec<TaskRecord>, ClientError> {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ClientError::Unavailable("down".into()))
                } else {
                    Ok(Vec::new())
                }
            }
            fn update(
                &self,
                _: &RequestContext,
                _: &str,
                _: &TaskFields,
            ) -> Result<TaskRecord, ClientError> {
                unreachable!()
            }
            fn delete(&self, _: &RequestContext, _: &str) -> Result<(), ClientError> {
                unreachable!()
            }
        }

        let tasks = FailingTasks {
            calls: AtomicUsize::new(0),
        };
        let relay = CredentialRelay::new();
        let idx = index(0);
        let ctx = ctx(&relay, "u1");

        assert!(matches!(
            idx.query_text(&ctx, &tasks, "report", 3),
            Err(IndexError::Build(_))
        ));
        // Second attempt succeeds; the failed build did not wedge the slot
        assert!(idx.query_text(&ctx, &tasks, "report", 3).unwrap().is_empty());
    }
}
