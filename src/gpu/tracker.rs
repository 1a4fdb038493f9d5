//! Process-wide GPU resource registry.
//!
//! Every tracked allocation is registered with an id, a type tag, a label,
//! a byte-size estimate, and its creation instant. Engines scope their
//! resources by tag (not by private trackers), so counts stay accurate
//! when multiple engines are alive in one process. Groups support batched
//! release; `find_leaks` reports resources that outlived a threshold.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use web_time::{Duration, Instant};

/// Identifies one live engine's resources inside the global registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineTag(u64);

/// Identifies one registered resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(u64);

/// Identifies a release group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(u64);

/// Type tag of a registered resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    /// A texture allocation.
    Texture,
    /// A buffer allocation.
    Buffer,
    /// A compiled shader module.
    ShaderModule,
    /// A compute or render pipeline.
    Pipeline,
}

/// One still-live resource older than the requested threshold.
#[derive(Debug, Clone)]
pub struct LeakReport {
    /// Registry id of the resource.
    pub id: ResourceId,
    /// Type tag recorded at registration.
    pub ty: ResourceType,
    /// Label recorded at registration.
    pub label: String,
    /// Byte-size estimate recorded at registration.
    pub bytes: u64,
    /// Age at the time of the query.
    pub age: Duration,
    /// Owning engine.
    pub tag: EngineTag,
}

struct Entry {
    id: u64,
    ty: ResourceType,
    label: String,
    bytes: u64,
    created: Instant,
    tag: EngineTag,
    group: Option<GroupId>,
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_TAG: AtomicU64 = AtomicU64::new(1);
static NEXT_GROUP: AtomicU64 = AtomicU64::new(1);
static ENTRIES: Mutex<Vec<Entry>> = Mutex::new(Vec::new());

/// Facade over the process-wide registry.
pub struct ResourceTracker;

impl ResourceTracker {
    /// Allocate a fresh engine tag.
    #[must_use]
    pub fn engine_tag() -> EngineTag {
        EngineTag(NEXT_TAG.fetch_add(1, Ordering::Relaxed))
    }

    /// Allocate a release group under an engine tag.
    #[must_use]
    pub fn new_group() -> GroupId {
        GroupId(NEXT_GROUP.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a live resource.
    #[must_use]
    pub fn register(
        tag: EngineTag,
        ty: ResourceType,
        label: &str,
        bytes: u64,
    ) -> ResourceId {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        ENTRIES.lock().push(Entry {
            id,
            ty,
            label: label.to_owned(),
            bytes,
            created: Instant::now(),
            tag,
            group: None,
        });
        ResourceId(id)
    }

    /// Assign a resource to a release group.
    pub fn assign_group(id: ResourceId, group: GroupId) {
        let mut entries = ENTRIES.lock();
        if let Some(e) = entries.iter_mut().find(|e| e.id == id.0) {
            e.group = Some(group);
        }
    }

    /// Release a resource. Returns `false` when the id was not live.
    pub fn release(id: ResourceId) -> bool {
        let mut entries = ENTRIES.lock();
        let before = entries.len();
        entries.retain(|e| e.id != id.0);
        entries.len() != before
    }

    /// Release every resource in a group. Returns the number released.
    pub fn release_group(group: GroupId) -> usize {
        let mut entries = ENTRIES.lock();
        let before = entries.len();
        entries.retain(|e| e.group != Some(group));
        before - entries.len()
    }

    /// Number of live resources registered under a tag.
    #[must_use]
    pub fn active_count(tag: EngineTag) -> usize {
        ENTRIES.lock().iter().filter(|e| e.tag == tag).count()
    }

    /// Sum of byte estimates registered under a tag.
    #[must_use]
    pub fn total_bytes(tag: EngineTag) -> u64 {
        ENTRIES
            .lock()
            .iter()
            .filter(|e| e.tag == tag)
            .map(|e| e.bytes)
            .sum()
    }

    /// All still-live resources older than `max_age`, across every engine.
    #[must_use]
    pub fn find_leaks(max_age: Duration) -> Vec<LeakReport> {
        let now = Instant::now();
        ENTRIES
            .lock()
            .iter()
            .filter_map(|e| {
                let age = now.duration_since(e.created);
                (age >= max_age).then(|| LeakReport {
                    id: ResourceId(e.id),
                    ty: e.ty,
                    label: e.label.clone(),
                    bytes: e.bytes,
                    age,
                    tag: e.tag,
                })
            })
            .collect()
    }

    /// Leaks scoped to one engine tag.
    #[must_use]
    pub fn find_leaks_for(tag: EngineTag, max_age: Duration) -> Vec<LeakReport> {
        Self::find_leaks(max_age)
            .into_iter()
            .filter(|l| l.tag == tag)
            .collect()
    }
}
