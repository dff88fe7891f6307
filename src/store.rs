// Task list state machine with write-through persistence

use crate::filter::{self, FilterMode};
use crate::removal::{PendingRemovals, RemovalToken};
use crate::storage::Storage;
use crate::task::{self, Task, TaskId};
use eyre::{Context, Result, eyre};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Storage slot holding the serialized task collection
pub const TODOS_KEY: &str = "todos";

/// Storage slot holding the filter, only used when `persist_filter` is on
pub const FILTER_KEY: &str = "filter";

pub const DEFAULT_REMOVAL_DELAY: Duration = Duration::from_millis(300);

/// Tunables for a [`TaskListStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// Write the filter to storage and restore it on open
    pub persist_filter: bool,
    /// How long a task stays pending before `commit_due` removes it
    pub removal_delay: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            persist_filter: false,
            removal_delay: DEFAULT_REMOVAL_DELAY,
        }
    }
}

/// A state change, delivered to observers after it has been applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Added(TaskId),
    Removed(TaskId),
    Toggled(TaskId),
    ClearedCompleted(Vec<TaskId>),
    /// Indices are positions in the full collection
    Reordered { id: TaskId, from: usize, to: usize },
    FilterChanged(FilterMode),
    RemovalPending(TaskId),
    RemovalCancelled(TaskId),
}

/// Read-only view of the store handed to observers and renderers
#[derive(Clone, Copy)]
pub struct StateView<'a> {
    tasks: &'a [Task],
    filter: FilterMode,
    pending: &'a PendingRemovals,
}

impl<'a> StateView<'a> {
    pub fn tasks(&self) -> &'a [Task] {
        self.tasks
    }

    pub fn filter(&self) -> FilterMode {
        self.filter
    }

    pub fn filtered_tasks(&self) -> Vec<&'a Task> {
        filter::filtered(self.tasks, self.filter)
    }

    /// Collection as seen through `mode`, leaving the store's filter alone
    pub fn filtered_by(&self, mode: FilterMode) -> Vec<&'a Task> {
        filter::filtered(self.tasks, mode)
    }

    pub fn items_remaining_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_active()).count()
    }

    pub fn is_pending_removal(&self, id: TaskId) -> bool {
        self.pending.contains(id)
    }
}

/// Handle returned by [`TaskListStore::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Observer = Box<dyn FnMut(&Change, &StateView<'_>)>;

/// Owns the ordered task collection, the active filter and the persistence boundary
///
/// Every mutation is applied in memory, written through to storage as a full
/// overwrite of the `"todos"` slot, and then announced to observers. Calls that
/// would change nothing (blank titles, unknown ids, degenerate reorders) are
/// silent no-ops: nothing is written and nobody is notified.
pub struct TaskListStore<S: Storage> {
    storage: S,
    tasks: Vec<Task>,
    filter: FilterMode,
    next_id: u64,
    options: StoreOptions,
    pending: PendingRemovals,
    observers: Vec<(SubscriptionId, Observer)>,
    next_subscription: u64,
}

impl<S: Storage> TaskListStore<S> {
    /// Hydrate a store from `storage`
    ///
    /// A missing or malformed `"todos"` slot yields an empty collection.
    pub fn open(storage: S, options: StoreOptions) -> Result<Self> {
        let (tasks, next_id) = match storage.get(TODOS_KEY)? {
            None => {
                debug!("No persisted tasks, starting empty");
                (Vec::new(), 1)
            }
            Some(raw) => match Self::hydrate(&raw) {
                Ok(hydrated) => hydrated,
                Err(e) => {
                    warn!(key = TODOS_KEY, error = %e, "Discarding malformed persisted tasks");
                    (Vec::new(), 1)
                }
            },
        };

        let filter = if options.persist_filter {
            Self::load_filter(&storage)?
        } else {
            FilterMode::default()
        };

        info!(count = tasks.len(), %filter, next_id, "Opened task list");

        Ok(Self {
            storage,
            tasks,
            filter,
            next_id,
            options,
            pending: PendingRemovals::new(),
            observers: Vec::new(),
            next_subscription: 0,
        })
    }

    fn hydrate(raw: &str) -> std::result::Result<(Vec<Task>, u64), String> {
        let tasks = task::decode_collection(raw)?;
        let next_id = task::next_id_after(&tasks).ok_or_else(|| "task ids exhausted".to_string())?;
        Ok((tasks, next_id))
    }

    fn load_filter(storage: &S) -> Result<FilterMode> {
        let Some(raw) = storage.get(FILTER_KEY)? else {
            return Ok(FilterMode::default());
        };

        Ok(raw.parse::<FilterMode>().unwrap_or_else(|e| {
            warn!(key = FILTER_KEY, error = %e, "Ignoring malformed persisted filter");
            FilterMode::default()
        }))
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Full collection in display order
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Collection as seen through the active filter
    pub fn filtered_tasks(&self) -> Vec<&Task> {
        filter::filtered(&self.tasks, self.filter)
    }

    pub fn filter(&self) -> FilterMode {
        self.filter
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Number of incomplete tasks, independent of the filter
    pub fn items_remaining_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_active()).count()
    }

    pub fn completed_count(&self) -> usize {
        self.tasks.len() - self.items_remaining_count()
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    pub fn view(&self) -> StateView<'_> {
        StateView {
            tasks: &self.tasks,
            filter: self.filter,
            pending: &self.pending,
        }
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Append a task with the trimmed `title`
    ///
    /// Returns the new id, or `None` when the title is blank. Fails without
    /// touching the collection once the id space is used up.
    pub fn add(&mut self, title: &str) -> Result<Option<TaskId>> {
        let title = title.trim();
        if title.is_empty() {
            debug!("add: ignoring blank title");
            return Ok(None);
        }

        let id = TaskId(self.next_id);
        self.next_id = self
            .next_id
            .checked_add(1)
            .ok_or_else(|| eyre!("Task ids exhausted, cannot add {:?}", title))?;
        self.tasks.push(Task::new(id, title));
        debug!(%id, title, "add: appended task");

        self.commit(Change::Added(id))?;
        Ok(Some(id))
    }

    /// Remove the task with `id`; returns whether one was removed
    pub fn remove(&mut self, id: TaskId) -> Result<bool> {
        let Some(index) = self.tasks.iter().position(|t| t.id == id) else {
            debug!(%id, "remove: no such task");
            return Ok(false);
        };

        self.tasks.remove(index);
        self.pending.forget(id);

        self.commit(Change::Removed(id))?;
        Ok(true)
    }

    /// Flip the completion flag of the task with `id`
    pub fn toggle_completed(&mut self, id: TaskId) -> Result<bool> {
        let Some(task) = self.tasks.iter_mut().find(|t| t.id == id) else {
            debug!(%id, "toggle_completed: no such task");
            return Ok(false);
        };

        task.is_completed = !task.is_completed;
        debug!(%id, is_completed = task.is_completed, "toggle_completed: flipped");

        self.commit(Change::Toggled(id))?;
        Ok(true)
    }

    /// Drop every completed task; returns how many were dropped
    pub fn clear_completed(&mut self) -> Result<usize> {
        let cleared: Vec<TaskId> = self.tasks.iter().filter(|t| t.is_completed).map(|t| t.id).collect();
        if cleared.is_empty() {
            return Ok(0);
        }

        self.tasks.retain(|t| !t.is_completed);
        for id in &cleared {
            self.pending.forget(*id);
        }

        let count = cleared.len();
        self.commit(Change::ClearedCompleted(cleared))?;
        Ok(count)
    }

    /// Move the task at `from` to `to`, both indices into the filtered view
    ///
    /// The indices are translated to full-collection positions first, so under
    /// a filter the task lands at filtered position `to` and hidden tasks keep
    /// their relative order. Equal or out-of-range indices are a no-op.
    pub fn reorder(&mut self, from: usize, to: usize) -> Result<bool> {
        if from == to {
            return Ok(false);
        }

        let (Some(full_from), Some(full_to)) = (
            filter::full_index(&self.tasks, self.filter, from),
            filter::full_index(&self.tasks, self.filter, to),
        ) else {
            debug!(from, to, filter = %self.filter, "reorder: index out of range");
            return Ok(false);
        };

        let task = self.tasks.remove(full_from);
        let id = task.id;
        self.tasks.insert(full_to, task);
        debug!(%id, full_from, full_to, "reorder: moved task");

        self.commit(Change::Reordered {
            id,
            from: full_from,
            to: full_to,
        })?;
        Ok(true)
    }

    /// Switch the active filter
    pub fn set_filter(&mut self, mode: FilterMode) -> Result<bool> {
        if mode == self.filter {
            return Ok(false);
        }

        self.filter = mode;
        let result = if self.options.persist_filter {
            self.storage
                .set(FILTER_KEY, mode.as_str())
                .context("Failed to persist filter")
        } else {
            Ok(())
        };

        self.notify(Change::FilterChanged(mode));
        result.map(|_| true)
    }

    // ========================================================================
    // Deferred removal
    // ========================================================================

    /// Start the exit phase for `id`
    ///
    /// The task stays in the collection until its token is committed, either
    /// directly or by [`commit_due`](Self::commit_due) once the removal delay
    /// has passed. Marking an already pending task issues a fresh token and
    /// invalidates the old one.
    pub fn mark_pending_removal(&mut self, id: TaskId) -> Option<RemovalToken> {
        self.get(id)?;

        let deadline = Instant::now() + self.options.removal_delay;
        let token = self.pending.mark(id, deadline);
        debug!(%id, "mark_pending_removal: marked");

        self.notify(Change::RemovalPending(id));
        Some(token)
    }

    /// Finish a pending removal; stale tokens are ignored
    pub fn commit_removal(&mut self, token: RemovalToken) -> Result<bool> {
        if !self.pending.take(&token) {
            debug!(id = %token.task_id(), "commit_removal: stale token");
            return Ok(false);
        }

        self.remove(token.task_id())
    }

    /// Withdraw a pending removal; stale tokens are ignored
    pub fn cancel_removal(&mut self, token: RemovalToken) -> bool {
        if !self.pending.take(&token) {
            return false;
        }

        self.notify(Change::RemovalCancelled(token.task_id()));
        true
    }

    /// Commit every pending removal whose delay has elapsed by `now`
    ///
    /// All due entries are processed even if a write fails; the first write
    /// error is returned once the loop is done.
    pub fn commit_due(&mut self, now: Instant) -> Result<Vec<TaskId>> {
        let mut removed = Vec::new();
        let mut first_error = None;

        for token in self.pending.due(now) {
            let id = token.task_id();
            match self.commit_removal(token) {
                Ok(true) => removed.push(id),
                Ok(false) => {}
                Err(e) => {
                    warn!(%id, error = %e, "commit_due: failed to persist removal");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(removed),
        }
    }

    pub fn is_pending_removal(&self, id: TaskId) -> bool {
        self.pending.contains(id)
    }

    pub fn next_removal_deadline(&self) -> Option<Instant> {
        self.pending.next_deadline()
    }

    // ========================================================================
    // Observers
    // ========================================================================

    /// Register a callback invoked after every state change
    pub fn subscribe<F>(&mut self, observer: F) -> SubscriptionId
    where
        F: FnMut(&Change, &StateView<'_>) + 'static,
    {
        self.next_subscription += 1;
        let id = SubscriptionId(self.next_subscription);
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(sub, _)| *sub != id);
        self.observers.len() != before
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Persist the collection, then notify; a failed write is still announced
    fn commit(&mut self, change: Change) -> Result<()> {
        let result = self.persist();
        self.notify(change);
        result
    }

    fn persist(&mut self) -> Result<()> {
        let raw = task::encode_collection(&self.tasks).context("Failed to serialize tasks")?;
        self.storage
            .set(TODOS_KEY, &raw)
            .context("Failed to persist tasks")?;
        debug!(count = self.tasks.len(), bytes = raw.len(), "Persisted tasks");
        Ok(())
    }

    fn notify(&mut self, change: Change) {
        let view = StateView {
            tasks: &self.tasks,
            filter: self.filter,
            pending: &self.pending,
        };
        for (_, observer) in self.observers.iter_mut() {
            observer(&change, &view);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileStorage, MemoryStorage, SqliteStorage};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use tempfile::TempDir;

    /// Memory storage whose writes can be switched to fail
    struct FlakyStorage {
        inner: MemoryStorage,
        failing: Rc<Cell<bool>>,
    }

    impl Storage for FlakyStorage {
        fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key)
        }

        fn set(&mut self, key: &str, value: &str) -> Result<()> {
            if self.failing.get() {
                return Err(eyre!("disk full"));
            }
            self.inner.set(key, value)
        }
    }

    fn record_changes<S: Storage>(store: &mut TaskListStore<S>) -> Rc<RefCell<Vec<Change>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        store.subscribe(move |change, _| sink.borrow_mut().push(change.clone()));
        seen
    }

    fn new_store() -> TaskListStore<MemoryStorage> {
        TaskListStore::open(MemoryStorage::new(), StoreOptions::default()).unwrap()
    }

    fn titles<S: Storage>(store: &TaskListStore<S>) -> Vec<String> {
        store.tasks().iter().map(|t| t.title.clone()).collect()
    }

    fn filtered_titles<S: Storage>(store: &TaskListStore<S>) -> Vec<String> {
        store.filtered_tasks().iter().map(|t| t.title.clone()).collect()
    }

    fn store_with(items: &[&str]) -> TaskListStore<MemoryStorage> {
        let mut store = new_store();
        for item in items {
            store.add(item).unwrap();
        }
        store
    }

    #[test]
    fn test_add_assigns_distinct_ids() {
        let mut store = new_store();
        let inputs = ["Buy milk", "", "Walk dog", "   ", "Read book"];

        let mut ids = Vec::new();
        for input in inputs {
            if let Some(id) = store.add(input).unwrap() {
                ids.push(id);
            }
        }

        assert_eq!(store.len(), 3);
        assert_eq!(ids.len(), 3);
        let mut unique = ids.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 3);
        assert!(store.tasks().iter().all(|t| !t.is_completed));
    }

    #[test]
    fn test_add_blank_is_noop() {
        let mut store = store_with(&["A"]);
        let before = store.tasks().to_vec();

        assert_eq!(store.add("").unwrap(), None);
        assert_eq!(store.add("   ").unwrap(), None);
        assert_eq!(store.tasks(), before.as_slice());
    }

    #[test]
    fn test_add_trims_title() {
        let mut store = new_store();
        let id = store.add("  Buy milk \n").unwrap().unwrap();
        assert_eq!(store.get(id).unwrap().title, "Buy milk");
    }

    #[test]
    fn test_ids_not_reused_after_remove() {
        let mut store = store_with(&["A", "B"]);
        let last = store.tasks()[1].id;

        assert!(store.remove(last).unwrap());
        let next = store.add("C").unwrap().unwrap();
        assert!(next > last);
    }

    #[test]
    fn test_toggle_twice_restores() {
        let mut store = store_with(&["A", "B", "C"]);
        let before = store.tasks().to_vec();
        let id = before[1].id;

        assert!(store.toggle_completed(id).unwrap());
        assert!(store.get(id).unwrap().is_completed);
        assert_eq!(store.tasks()[0], before[0]);
        assert_eq!(store.tasks()[2], before[2]);

        assert!(store.toggle_completed(id).unwrap());
        assert_eq!(store.tasks(), before.as_slice());
    }

    #[test]
    fn test_toggle_missing_is_noop() {
        let mut store = store_with(&["A"]);
        assert!(!store.toggle_completed(TaskId(99)).unwrap());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut store = store_with(&["A", "B", "C"]);
        let id = store.tasks()[1].id;

        assert!(store.remove(id).unwrap());
        assert!(!store.remove(id).unwrap());
        assert_eq!(titles(&store), vec!["A", "C"]);
    }

    #[test]
    fn test_clear_completed_keeps_active_in_order() {
        let mut store = store_with(&["A", "B", "C", "D"]);
        let ids: Vec<TaskId> = store.tasks().iter().map(|t| t.id).collect();
        store.toggle_completed(ids[0]).unwrap();
        store.toggle_completed(ids[2]).unwrap();

        assert_eq!(store.clear_completed().unwrap(), 2);
        assert_eq!(titles(&store), vec!["B", "D"]);

        assert_eq!(store.clear_completed().unwrap(), 0);
        assert_eq!(titles(&store), vec!["B", "D"]);
    }

    #[test]
    fn test_items_remaining_ignores_filter() {
        let mut store = store_with(&["A", "B", "C"]);
        let id = store.tasks()[0].id;
        store.toggle_completed(id).unwrap();

        for mode in FilterMode::ALL {
            store.set_filter(mode).unwrap();
            assert_eq!(store.items_remaining_count(), 2);
            assert_eq!(store.completed_count(), 1);
        }
    }

    #[test]
    fn test_buy_milk_scenario() {
        let mut store = new_store();
        let milk = store.add("Buy milk").unwrap().unwrap();
        store.add("Walk dog").unwrap();
        store.toggle_completed(milk).unwrap();
        store.set_filter(FilterMode::Active).unwrap();

        let filtered = store.filtered_tasks();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].title, "Walk dog");
        assert!(!filtered[0].is_completed);
        assert_eq!(store.items_remaining_count(), 1);
    }

    #[test]
    fn test_reorder_all() {
        let mut store = store_with(&["A", "B", "C"]);
        assert!(store.reorder(0, 2).unwrap());
        assert_eq!(titles(&store), vec!["B", "C", "A"]);

        assert!(store.reorder(2, 0).unwrap());
        assert_eq!(titles(&store), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_reorder_noops() {
        let mut store = store_with(&["A", "B", "C"]);
        assert!(!store.reorder(1, 1).unwrap());
        assert!(!store.reorder(0, 3).unwrap());
        assert!(!store.reorder(5, 0).unwrap());
        assert_eq!(titles(&store), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_reorder_under_active_filter() {
        let mut store = store_with(&["A", "x", "B", "y", "C"]);
        let ids: Vec<TaskId> = store.tasks().iter().map(|t| t.id).collect();
        store.toggle_completed(ids[1]).unwrap();
        store.toggle_completed(ids[3]).unwrap();
        store.set_filter(FilterMode::Active).unwrap();
        assert_eq!(filtered_titles(&store), vec!["A", "B", "C"]);

        assert!(store.reorder(0, 2).unwrap());
        assert_eq!(filtered_titles(&store), vec!["B", "C", "A"]);
        assert_eq!(titles(&store), vec!["x", "B", "y", "C", "A"]);

        assert!(store.reorder(2, 0).unwrap());
        assert_eq!(filtered_titles(&store), vec!["A", "B", "C"]);

        // Index 3 exists in the full collection but not in the filtered view
        assert!(!store.reorder(0, 3).unwrap());
    }

    #[test]
    fn test_reorder_under_completed_filter_keeps_hidden_order() {
        let mut store = store_with(&["a", "X", "b", "Y"]);
        let ids: Vec<TaskId> = store.tasks().iter().map(|t| t.id).collect();
        store.toggle_completed(ids[1]).unwrap();
        store.toggle_completed(ids[3]).unwrap();
        store.set_filter(FilterMode::Completed).unwrap();

        assert!(store.reorder(1, 0).unwrap());
        assert_eq!(filtered_titles(&store), vec!["Y", "X"]);

        let active: Vec<&str> = store
            .tasks()
            .iter()
            .filter(|t| !t.is_completed)
            .map(|t| t.title.as_str())
            .collect();
        assert_eq!(active, vec!["a", "b"]);
    }

    #[test]
    fn test_mutations_write_through() {
        let mut store = store_with(&["A"]);
        let raw = store.storage().get(TODOS_KEY).unwrap().unwrap();
        assert_eq!(raw, r#"[{"id":1,"title":"A","isCompleted":false}]"#);

        store.toggle_completed(TaskId(1)).unwrap();
        let raw = store.storage().get(TODOS_KEY).unwrap().unwrap();
        assert!(raw.contains(r#""isCompleted":true"#));
    }

    #[test]
    fn test_filter_not_persisted_by_default() {
        let mut store = new_store();
        store.set_filter(FilterMode::Completed).unwrap();
        assert_eq!(store.storage().get(FILTER_KEY).unwrap(), None);

        let reopened = TaskListStore::open(store.into_storage(), StoreOptions::default()).unwrap();
        assert_eq!(reopened.filter(), FilterMode::All);
    }

    #[test]
    fn test_filter_persisted_when_enabled() {
        let options = StoreOptions {
            persist_filter: true,
            ..StoreOptions::default()
        };
        let mut store = TaskListStore::open(MemoryStorage::new(), options.clone()).unwrap();
        store.set_filter(FilterMode::Active).unwrap();

        let reopened = TaskListStore::open(store.into_storage(), options).unwrap();
        assert_eq!(reopened.filter(), FilterMode::Active);
    }

    #[test]
    fn test_malformed_filter_falls_back() {
        let mut storage = MemoryStorage::new();
        storage.set(FILTER_KEY, "sideways").unwrap();
        let options = StoreOptions {
            persist_filter: true,
            ..StoreOptions::default()
        };

        let store = TaskListStore::open(storage, options).unwrap();
        assert_eq!(store.filter(), FilterMode::All);
    }

    #[test]
    fn test_round_trip_memory() {
        let mut store = store_with(&["A", "B", "C"]);
        store.toggle_completed(TaskId(2)).unwrap();
        store.reorder(0, 2).unwrap();
        let before = store.tasks().to_vec();

        let mut reopened = TaskListStore::open(store.into_storage(), StoreOptions::default()).unwrap();
        assert_eq!(reopened.tasks(), before.as_slice());

        let next = reopened.add("D").unwrap().unwrap();
        assert_eq!(next, TaskId(4));
    }

    #[test]
    fn test_round_trip_file_storage() {
        let temp = TempDir::new().unwrap();
        let before = {
            let storage = FileStorage::open(temp.path()).unwrap();
            let mut store = TaskListStore::open(storage, StoreOptions::default()).unwrap();
            store.add("Buy milk").unwrap();
            store.add("Walk dog").unwrap();
            store.toggle_completed(TaskId(1)).unwrap();
            store.tasks().to_vec()
        };

        let storage = FileStorage::open(temp.path()).unwrap();
        let store = TaskListStore::open(storage, StoreOptions::default()).unwrap();
        assert_eq!(store.tasks(), before.as_slice());
    }

    #[test]
    fn test_round_trip_sqlite_storage() {
        let temp = TempDir::new().unwrap();
        {
            let storage = SqliteStorage::open(temp.path()).unwrap();
            let mut store = TaskListStore::open(storage, StoreOptions::default()).unwrap();
            store.add("A").unwrap();
            store.add("B").unwrap();
            store.reorder(1, 0).unwrap();
        }

        let storage = SqliteStorage::open(temp.path()).unwrap();
        let store = TaskListStore::open(storage, StoreOptions::default()).unwrap();
        assert_eq!(titles(&store), vec!["B", "A"]);
    }

    #[test]
    fn test_malformed_persisted_state_starts_empty() {
        let payloads = [
            "{not json",
            r#"{"todos":[]}"#,
            r#"[{"id":"one","title":"A","isCompleted":false}]"#,
            r#"[{"id":1,"title":"A","isCompleted":false},{"id":1,"title":"B","isCompleted":true}]"#,
        ];

        for payload in payloads {
            let mut storage = MemoryStorage::new();
            storage.set(TODOS_KEY, payload).unwrap();

            let mut store = TaskListStore::open(storage, StoreOptions::default()).unwrap();
            assert!(store.is_empty(), "payload should be discarded: {}", payload);
            assert_eq!(store.add("fresh").unwrap(), Some(TaskId(1)));
        }
    }

    #[test]
    fn test_persisted_max_id_starts_empty() {
        let mut storage = MemoryStorage::new();
        storage
            .set(TODOS_KEY, r#"[{"id":18446744073709551615,"title":"A","isCompleted":false}]"#)
            .unwrap();

        let mut store = TaskListStore::open(storage, StoreOptions::default()).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.add("fresh").unwrap(), Some(TaskId(1)));
    }

    #[test]
    fn test_add_fails_when_ids_run_out() {
        let raw = r#"[{"id":18446744073709551614,"title":"A","isCompleted":false}]"#;
        let mut storage = MemoryStorage::new();
        storage.set(TODOS_KEY, raw).unwrap();

        let mut store = TaskListStore::open(storage, StoreOptions::default()).unwrap();
        assert_eq!(store.len(), 1);
        let changes = record_changes(&mut store);

        assert!(store.add("B").is_err());
        assert_eq!(titles(&store), vec!["A"]);
        assert_eq!(store.storage().get(TODOS_KEY).unwrap().as_deref(), Some(raw));
        assert!(changes.borrow().is_empty());
    }

    #[test]
    fn test_pending_removal_commit() {
        let mut store = store_with(&["A", "B"]);
        let token = store.mark_pending_removal(TaskId(1)).unwrap();

        assert!(store.is_pending_removal(TaskId(1)));
        assert_eq!(store.len(), 2);

        assert!(store.commit_removal(token).unwrap());
        assert_eq!(titles(&store), vec!["B"]);
        assert!(!store.is_pending_removal(TaskId(1)));
    }

    #[test]
    fn test_pending_removal_missing_id() {
        let mut store = store_with(&["A"]);
        assert!(store.mark_pending_removal(TaskId(42)).is_none());
    }

    #[test]
    fn test_concurrent_pending_removals_are_independent() {
        let mut store = store_with(&["A", "B", "C"]);
        let a = store.mark_pending_removal(TaskId(1)).unwrap();
        let c = store.mark_pending_removal(TaskId(3)).unwrap();

        // Other mutations between marking and completion
        store.add("D").unwrap();
        store.reorder(0, 3).unwrap();

        assert!(store.commit_removal(c).unwrap());
        assert_eq!(titles(&store), vec!["B", "D", "A"]);
        assert!(store.is_pending_removal(TaskId(1)));

        assert!(store.commit_removal(a).unwrap());
        assert_eq!(titles(&store), vec!["B", "D"]);
    }

    #[test]
    fn test_stale_token_cannot_remove() {
        let mut store = store_with(&["A"]);
        let stale = store.mark_pending_removal(TaskId(1)).unwrap();
        let fresh = store.mark_pending_removal(TaskId(1)).unwrap();

        assert!(!store.commit_removal(stale).unwrap());
        assert_eq!(store.len(), 1);

        assert!(store.cancel_removal(fresh));
        assert!(!store.commit_removal(fresh).unwrap());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_toggle_during_pending_removal() {
        let mut store = store_with(&["A"]);
        let token = store.mark_pending_removal(TaskId(1)).unwrap();

        store.toggle_completed(TaskId(1)).unwrap();
        assert!(store.is_pending_removal(TaskId(1)));

        assert!(store.commit_removal(token).unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_direct_remove_invalidates_pending() {
        let mut store = store_with(&["A"]);
        let token = store.mark_pending_removal(TaskId(1)).unwrap();

        store.remove(TaskId(1)).unwrap();
        assert!(!store.is_pending_removal(TaskId(1)));
        assert!(!store.commit_removal(token).unwrap());
    }

    #[test]
    fn test_commit_due() {
        let options = StoreOptions {
            removal_delay: Duration::from_secs(60),
            ..StoreOptions::default()
        };
        let mut store = TaskListStore::open(MemoryStorage::new(), options).unwrap();
        store.add("A").unwrap();
        store.add("B").unwrap();

        store.mark_pending_removal(TaskId(2)).unwrap();
        assert!(store.commit_due(Instant::now()).unwrap().is_empty());
        assert_eq!(store.len(), 2);

        let later = Instant::now() + Duration::from_secs(61);
        assert_eq!(store.commit_due(later).unwrap(), vec![TaskId(2)]);
        assert_eq!(titles(&store), vec!["A"]);
        assert!(store.next_removal_deadline().is_none());
    }

    #[test]
    fn test_commit_due_continues_past_write_failure() {
        let failing = Rc::new(Cell::new(false));
        let storage = FlakyStorage {
            inner: MemoryStorage::new(),
            failing: Rc::clone(&failing),
        };
        let options = StoreOptions {
            removal_delay: Duration::ZERO,
            ..StoreOptions::default()
        };
        let mut store = TaskListStore::open(storage, options).unwrap();
        store.add("A").unwrap();
        store.add("B").unwrap();
        store.add("C").unwrap();

        store.mark_pending_removal(TaskId(1)).unwrap();
        store.mark_pending_removal(TaskId(3)).unwrap();

        failing.set(true);
        assert!(store.commit_due(Instant::now() + Duration::from_secs(1)).is_err());

        // Both due removals were applied in memory, none is left pending
        assert_eq!(titles(&store), vec!["B"]);
        assert!(!store.is_pending_removal(TaskId(1)));
        assert!(!store.is_pending_removal(TaskId(3)));
        assert!(store.next_removal_deadline().is_none());

        // The next successful write catches storage up
        failing.set(false);
        store.toggle_completed(TaskId(2)).unwrap();
        let reopened = TaskListStore::open(store.into_storage(), StoreOptions::default()).unwrap();
        assert_eq!(titles(&reopened), vec!["B"]);
    }

    #[test]
    fn test_clear_completed_drops_pending_removals() {
        let mut store = store_with(&["A", "B"]);
        let token = store.mark_pending_removal(TaskId(1)).unwrap();
        store.toggle_completed(TaskId(1)).unwrap();

        assert_eq!(store.clear_completed().unwrap(), 1);
        assert!(!store.is_pending_removal(TaskId(1)));
        assert!(store.next_removal_deadline().is_none());
        assert!(!store.commit_removal(token).unwrap());
        assert_eq!(titles(&store), vec!["B"]);
    }

    #[test]
    fn test_noop_mutations_are_silent() {
        let mut store = store_with(&["A", "B", "C"]);
        let before = store.storage().get(TODOS_KEY).unwrap();
        let changes = record_changes(&mut store);

        assert!(!store.reorder(1, 1).unwrap());
        assert!(!store.reorder(0, 3).unwrap());
        assert!(!store.reorder(7, 0).unwrap());
        assert_eq!(store.clear_completed().unwrap(), 0);
        assert!(!store.toggle_completed(TaskId(99)).unwrap());
        assert!(!store.remove(TaskId(99)).unwrap());
        assert_eq!(store.add("  ").unwrap(), None);
        assert!(!store.set_filter(FilterMode::All).unwrap());

        assert!(changes.borrow().is_empty());
        assert_eq!(store.storage().get(TODOS_KEY).unwrap(), before);
    }

    #[test]
    fn test_observers_receive_changes() {
        let mut store = new_store();
        let seen: Rc<RefCell<Vec<(Change, usize)>>> = Rc::new(RefCell::new(Vec::new()));

        let sink = Rc::clone(&seen);
        let sub = store.subscribe(move |change, view| {
            sink.borrow_mut().push((change.clone(), view.filtered_tasks().len()));
        });

        let id = store.add("A").unwrap().unwrap();
        store.add("").unwrap();
        store.toggle_completed(id).unwrap();
        store.set_filter(FilterMode::Active).unwrap();
        store.set_filter(FilterMode::Active).unwrap();
        store.remove(TaskId(99)).unwrap();

        assert_eq!(
            *seen.borrow(),
            vec![
                (Change::Added(id), 1),
                (Change::Toggled(id), 1),
                (Change::FilterChanged(FilterMode::Active), 0),
            ]
        );

        assert!(store.unsubscribe(sub));
        assert!(!store.unsubscribe(sub));
        store.add("B").unwrap();
        assert_eq!(seen.borrow().len(), 3);
    }

    #[test]
    fn test_observer_sees_pending_state() {
        let mut store = store_with(&["A"]);
        let pending: Rc<RefCell<Vec<bool>>> = Rc::new(RefCell::new(Vec::new()));

        let sink = Rc::clone(&pending);
        store.subscribe(move |_, view| {
            sink.borrow_mut().push(view.is_pending_removal(TaskId(1)));
        });

        let token = store.mark_pending_removal(TaskId(1)).unwrap();
        store.cancel_removal(token);

        assert_eq!(*pending.borrow(), vec![true, false]);
    }

    #[test]
    fn test_view_matches_store() {
        let mut store = store_with(&["A", "B"]);
        store.toggle_completed(TaskId(2)).unwrap();
        store.set_filter(FilterMode::Completed).unwrap();

        let view = store.view();
        assert_eq!(view.tasks().len(), 2);
        assert_eq!(view.filter(), FilterMode::Completed);
        assert_eq!(view.filtered_tasks().len(), 1);
        assert_eq!(view.items_remaining_count(), 1);
    }

    #[test]
    fn test_filtered_by_leaves_filter_untouched() {
        let options = StoreOptions {
            persist_filter: true,
            ..StoreOptions::default()
        };
        let mut store = TaskListStore::open(MemoryStorage::new(), options).unwrap();
        store.add("A").unwrap();
        store.add("B").unwrap();
        store.toggle_completed(TaskId(2)).unwrap();
        let changes = record_changes(&mut store);

        let view = store.view();
        let completed: Vec<&str> = view
            .filtered_by(FilterMode::Completed)
            .iter()
            .map(|t| t.title.as_str())
            .collect();
        assert_eq!(completed, vec!["B"]);
        assert_eq!(view.filtered_by(FilterMode::Active).len(), 1);

        assert_eq!(store.filter(), FilterMode::All);
        assert_eq!(store.storage().get(FILTER_KEY).unwrap(), None);
        assert!(changes.borrow().is_empty());
    }
}
