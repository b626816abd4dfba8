//! User tasks, regions and logs
//!
//! Diagnostic annotations that host code attaches to its work. Names, keys
//! and values are interned: the first time a string is seen the host emits a
//! `String` event for it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tether_common::{EventKind, RegionMode};

use super::Shared;
use crate::domain::UserTaskId;
use crate::events::Payload;

#[derive(Default)]
pub(crate) struct Annotations {
    next_task: AtomicU64,
    strings: Mutex<HashMap<Arc<str>, u64>>,
}

impl Annotations {
    pub(crate) fn next_task_id(&self) -> UserTaskId {
        UserTaskId(self.next_task.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Intern `text`, emitting a `String` event the first time it is seen
pub(crate) fn intern(shared: &Shared, text: &str) -> Arc<str> {
    let mut strings = shared.annotations.strings.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some((existing, _)) = strings.get_key_value(text) {
        return Arc::clone(existing);
    }
    let interned: Arc<str> = Arc::from(text);
    let id = strings.len() as u64 + 1;
    strings.insert(Arc::clone(&interned), id);
    // Emitted under the table lock so a string is announced before any use
    shared.bus.emit_with(EventKind::String, || Payload::Text(Arc::clone(&interned)));
    interned
}

/// A logical operation spanning units; ends when dropped
pub struct UserTask {
    id: UserTaskId,
    shared: Arc<Shared>,
}

impl UserTask {
    pub(crate) fn create(shared: &Arc<Shared>, name: &str, parent: Option<&UserTask>) -> Self {
        let id = shared.annotations.next_task_id();
        let name = intern(shared, name);
        let parent = parent.map_or(UserTaskId::NONE, UserTask::id);
        shared.bus.emit_with(EventKind::UserTaskCreate, || Payload::UserTaskCreate {
            task: id,
            parent,
            name,
        });
        Self { id, shared: Arc::clone(shared) }
    }

    #[must_use]
    pub fn id(&self) -> UserTaskId {
        self.id
    }

    /// Start a region of this task; it ends when the guard drops
    pub fn region(&self, name: &str) -> Region {
        Region::start(&self.shared, self.id, name)
    }

    /// Attach a key/value message to this task
    pub fn log(&self, key: &str, value: &str) {
        log_message(&self.shared, self.id, key, value);
    }
}

impl Drop for UserTask {
    fn drop(&mut self) {
        let id = self.id;
        self.shared.bus.emit_with(EventKind::UserTaskEnd, || Payload::UserTaskEnd(id));
    }
}

impl std::fmt::Debug for UserTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("UserTask").field(&self.id).finish()
    }
}

/// An open user region
#[must_use = "the region ends as soon as the guard is dropped"]
pub struct Region {
    task: UserTaskId,
    name: Arc<str>,
    shared: Arc<Shared>,
}

impl Region {
    pub(crate) fn start(shared: &Arc<Shared>, task: UserTaskId, name: &str) -> Self {
        let name = intern(shared, name);
        emit_region(shared, task, RegionMode::Start, &name);
        Self { task, name, shared: Arc::clone(shared) }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        emit_region(&self.shared, self.task, RegionMode::End, &self.name);
    }
}

fn emit_region(shared: &Shared, task: UserTaskId, mode: RegionMode, name: &Arc<str>) {
    shared.bus.emit_with(EventKind::UserRegion, || Payload::UserRegion {
        task,
        mode,
        name: Arc::clone(name),
    });
}

pub(crate) fn log_message(shared: &Shared, task: UserTaskId, key: &str, value: &str) {
    let key = intern(shared, key);
    shared
        .bus
        .emit_with(EventKind::UserLog, || Payload::UserLog { task, key, value: Arc::from(value) });
}
