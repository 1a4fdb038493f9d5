//! Typed event bus for the perception pipeline.
//!
//! Subscribers register callbacks per event kind (`on`/`once`/`off`);
//! blocking waits and queued streams ride on flume channels. Emission
//! order is strict: within a frame, `frame:before` precedes plugin events,
//! which precede `frame` and `frame:after`; across frames, order follows
//! frame timestamps. A `once` listener is removed before the next
//! emission of its event kind.

use std::fmt;

use parking_lot::Mutex;
use web_time::Duration;

use crate::error::ArError;
use crate::frame::{ArFrame, DetectedPlane, LightEstimate, TrackedMarker};

/// Rolling performance metrics attached to `performance:warning`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceSnapshot {
    /// Frames per second over the rolling one-second window.
    pub fps: u32,
    /// Mean frame interval over the window, in milliseconds.
    pub frame_interval_ms: f32,
    /// Number of detector plugins with a job still in flight.
    pub detectors_busy: u32,
}

/// Events emitted by the engine.
#[derive(Debug, Clone)]
pub enum ArEvent {
    /// The engine finished initialization and the first frame is imminent.
    Ready,
    /// A frame is about to be processed.
    FrameBefore {
        /// Monotonic frame timestamp in microseconds.
        timestamp_us: u64,
    },
    /// The assembled per-frame record.
    Frame(ArFrame),
    /// Frame processing finished.
    FrameAfter(ArFrame),
    /// A marker was confirmed for the first time or recovered.
    MarkerDetected(TrackedMarker),
    /// A tracked marker was updated.
    MarkerUpdated(TrackedMarker),
    /// A tracked marker crossed the loss timeout.
    MarkerLost {
        /// Id of the lost marker.
        id: u32,
    },
    /// A plane was confirmed.
    PlaneDetected(DetectedPlane),
    /// A tracked plane was updated.
    PlaneUpdated(DetectedPlane),
    /// A tracked plane aged out.
    PlaneRemoved {
        /// Id of the removed plane.
        id: u32,
    },
    /// A new light estimate is available.
    LightUpdated(LightEstimate),
    /// The rolling FPS changed to a new integer value.
    FpsChange(u32),
    /// Sustained low throughput.
    PerformanceWarning(PerformanceSnapshot),
    /// A recoverable error occurred; the pipeline continues.
    Error(ArError),
    /// A non-error notice.
    Warning(String),
}

/// Discriminant used for subscription filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `ready`
    Ready,
    /// `frame:before`
    FrameBefore,
    /// `frame`
    Frame,
    /// `frame:after`
    FrameAfter,
    /// `marker:detected`
    MarkerDetected,
    /// `marker:updated`
    MarkerUpdated,
    /// `marker:lost`
    MarkerLost,
    /// `plane:detected`
    PlaneDetected,
    /// `plane:updated`
    PlaneUpdated,
    /// `plane:removed`
    PlaneRemoved,
    /// `light:updated`
    LightUpdated,
    /// `fps:change`
    FpsChange,
    /// `performance:warning`
    PerformanceWarning,
    /// `error`
    Error,
    /// `warning`
    Warning,
}

impl EventKind {
    /// The wire name of the event.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::FrameBefore => "frame:before",
            Self::Frame => "frame",
            Self::FrameAfter => "frame:after",
            Self::MarkerDetected => "marker:detected",
            Self::MarkerUpdated => "marker:updated",
            Self::MarkerLost => "marker:lost",
            Self::PlaneDetected => "plane:detected",
            Self::PlaneUpdated => "plane:updated",
            Self::PlaneRemoved => "plane:removed",
            Self::LightUpdated => "light:updated",
            Self::FpsChange => "fps:change",
            Self::PerformanceWarning => "performance:warning",
            Self::Error => "error",
            Self::Warning => "warning",
        }
    }
}

impl ArEvent {
    /// The kind of this event.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Ready => EventKind::Ready,
            Self::FrameBefore { .. } => EventKind::FrameBefore,
            Self::Frame(_) => EventKind::Frame,
            Self::FrameAfter(_) => EventKind::FrameAfter,
            Self::MarkerDetected(_) => EventKind::MarkerDetected,
            Self::MarkerUpdated(_) => EventKind::MarkerUpdated,
            Self::MarkerLost { .. } => EventKind::MarkerLost,
            Self::PlaneDetected(_) => EventKind::PlaneDetected,
            Self::PlaneUpdated(_) => EventKind::PlaneUpdated,
            Self::PlaneRemoved { .. } => EventKind::PlaneRemoved,
            Self::LightUpdated(_) => EventKind::LightUpdated,
            Self::FpsChange(_) => EventKind::FpsChange,
            Self::PerformanceWarning(_) => EventKind::PerformanceWarning,
            Self::Error(_) => EventKind::Error,
            Self::Warning(_) => EventKind::Warning,
        }
    }
}

/// Handle identifying a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Error returned by [`EventEmitter::wait_for`] on deadline expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTimeout {
    /// The event kind that was awaited.
    pub kind: EventKind,
    /// The deadline that elapsed.
    pub timeout: Duration,
}

impl fmt::Display for WaitTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "timed out after {:?} waiting for '{}'",
            self.timeout,
            self.kind.name()
        )
    }
}

impl std::error::Error for WaitTimeout {}

type Callback = Box<dyn FnMut(&ArEvent) + Send>;

struct Listener {
    id: u64,
    /// `None` subscribes to every event kind.
    kind: Option<EventKind>,
    once: bool,
    callback: Callback,
}

#[derive(Default)]
struct Inner {
    listeners: Vec<Listener>,
    next_id: u64,
    emitting: bool,
    /// Removals requested while an emit pass holds the listener list.
    deferred_off: Vec<u64>,
    /// Events emitted from inside a callback, delivered after this pass.
    queued: Vec<ArEvent>,
}

/// Callback registry with filtered subscription and ordered emission.
#[derive(Default)]
pub struct EventEmitter {
    inner: Mutex<Inner>,
}

impl EventEmitter {
    /// New emitter with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to an event kind. The callback runs on the emitting
    /// thread (the frame driver).
    pub fn on(
        &self,
        kind: EventKind,
        callback: impl FnMut(&ArEvent) + Send + 'static,
    ) -> ListenerId {
        self.register(Some(kind), false, Box::new(callback))
    }

    /// Subscribe to every event kind.
    pub fn on_any(
        &self,
        callback: impl FnMut(&ArEvent) + Send + 'static,
    ) -> ListenerId {
        self.register(None, false, Box::new(callback))
    }

    /// Subscribe for exactly one delivery; the listener is removed before
    /// the next emission of the same kind.
    pub fn once(
        &self,
        kind: EventKind,
        callback: impl FnMut(&ArEvent) + Send + 'static,
    ) -> ListenerId {
        self.register(Some(kind), true, Box::new(callback))
    }

    /// Remove a listener. Returns `true` if it was still registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut inner = self.inner.lock();
        if let Some(pos) = inner.listeners.iter().position(|l| l.id == id.0) {
            let _ = inner.listeners.remove(pos);
            return true;
        }
        if inner.emitting {
            // The listener list is checked out by an emit pass; defer.
            inner.deferred_off.push(id.0);
            return true;
        }
        false
    }

    /// Number of currently registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    /// Deliver an event to every matching listener, in registration order.
    pub fn emit(&self, event: &ArEvent) {
        {
            let mut inner = self.inner.lock();
            if inner.emitting {
                // Re-entrant emit from a callback: queue for delivery
                // after the current pass so ordering stays frame-strict.
                inner.queued.push(event.clone());
                return;
            }
            inner.emitting = true;
        }
        self.emit_pass(event);

        // Drain nested emissions in order.
        loop {
            let next = {
                let mut inner = self.inner.lock();
                if inner.queued.is_empty() {
                    inner.emitting = false;
                    None
                } else {
                    Some(inner.queued.remove(0))
                }
            };
            match next {
                Some(ev) => self.emit_pass(&ev),
                None => break,
            }
        }
    }

    /// Block until an event of `kind` arrives or the timeout elapses.
    ///
    /// # Errors
    ///
    /// Returns [`WaitTimeout`] when the deadline passes; the internal
    /// listener is removed before the error is returned.
    pub fn wait_for(
        &self,
        kind: EventKind,
        timeout: Duration,
    ) -> Result<ArEvent, WaitTimeout> {
        let (tx, rx) = flume::bounded::<ArEvent>(1);
        let id = self.once(kind, move |ev| {
            let _ = tx.try_send(ev.clone());
        });
        match rx.recv_timeout(timeout) {
            Ok(ev) => Ok(ev),
            Err(_) => {
                let _ = self.off(id);
                Err(WaitTimeout { kind, timeout })
            }
        }
    }

    /// Queued stream of events, optionally filtered to one kind.
    ///
    /// Events are cloned into an unbounded channel as they are emitted;
    /// dropping the stream unsubscribes.
    pub fn stream(&self, kind: Option<EventKind>) -> EventStream {
        let (tx, rx) = flume::unbounded::<ArEvent>();
        let callback = move |ev: &ArEvent| {
            let _ = tx.send(ev.clone());
        };
        let id = self.register(kind, false, Box::new(callback));
        EventStream { rx, id }
    }

    /// Detach a stream created by [`stream`](Self::stream).
    pub fn close_stream(&self, stream: EventStream) {
        let _ = self.off(stream.id);
    }

    fn register(
        &self,
        kind: Option<EventKind>,
        once: bool,
        callback: Callback,
    ) -> ListenerId {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.listeners.push(Listener {
            id,
            kind,
            once,
            callback,
        });
        ListenerId(id)
    }

    fn emit_pass(&self, event: &ArEvent) {
        let kind = event.kind();

        // Check the listener list out of the lock so callbacks can
        // subscribe and unsubscribe freely.
        let mut list = {
            let mut inner = self.inner.lock();
            std::mem::take(&mut inner.listeners)
        };

        let mut fired_once: Vec<u64> = Vec::new();
        for listener in &mut list {
            if listener.kind.is_some_and(|k| k != kind) {
                continue;
            }
            (listener.callback)(event);
            if listener.once {
                fired_once.push(listener.id);
            }
        }

        let mut inner = self.inner.lock();
        let deferred = std::mem::take(&mut inner.deferred_off);
        list.retain(|l| {
            !fired_once.contains(&l.id) && !deferred.contains(&l.id)
        });
        // Listeners added during the pass landed in the (empty) inner
        // list; keep original registration order ahead of them.
        let added = std::mem::take(&mut inner.listeners);
        list.extend(added);
        inner.listeners = list;
    }
}

/// Receiver half of a queued event subscription.
pub struct EventStream {
    rx: flume::Receiver<ArEvent>,
    id: ListenerId,
}

impl EventStream {
    /// Non-blocking poll for the next queued event.
    #[must_use]
    pub fn try_next(&self) -> Option<ArEvent> {
        self.rx.try_recv().ok()
    }

    /// Block until the next event or the timeout elapses.
    #[must_use]
    pub fn next_timeout(&self, timeout: Duration) -> Option<ArEvent> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Await the next event (for async hosts).
    pub async fn next(&self) -> Option<ArEvent> {
        self.rx.recv_async().await.ok()
    }

    /// Number of events queued and not yet consumed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether the queue is currently empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn on_receives_matching_events_only() {
        let emitter = EventEmitter::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        let _id = emitter.on(EventKind::FpsChange, move |_| {
            let _ = c.fetch_add(1, Ordering::SeqCst);
        });
        emitter.emit(&ArEvent::FpsChange(30));
        emitter.emit(&ArEvent::Ready);
        emitter.emit(&ArEvent::FpsChange(29));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn once_fires_exactly_once() {
        let emitter = EventEmitter::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        let _id = emitter.once(EventKind::Ready, move |_| {
            let _ = c.fetch_add(1, Ordering::SeqCst);
        });
        emitter.emit(&ArEvent::Ready);
        emitter.emit(&ArEvent::Ready);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn off_removes_listener() {
        let emitter = EventEmitter::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        let id = emitter.on(EventKind::Warning, move |_| {
            let _ = c.fetch_add(1, Ordering::SeqCst);
        });
        assert!(emitter.off(id));
        emitter.emit(&ArEvent::Warning("x".into()));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!emitter.off(id));
    }

    #[test]
    fn wait_for_times_out_and_removes_listener() {
        let emitter = EventEmitter::new();
        let err = emitter
            .wait_for(EventKind::Ready, Duration::from_millis(20))
            .unwrap_err();
        assert_eq!(err.kind, EventKind::Ready);
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn wait_for_receives_event_from_another_thread() {
        let emitter = Arc::new(EventEmitter::new());
        let e2 = Arc::clone(&emitter);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            e2.emit(&ArEvent::FpsChange(42));
        });
        let ev = emitter
            .wait_for(EventKind::FpsChange, Duration::from_secs(1))
            .unwrap();
        handle.join().unwrap();
        match ev {
            ArEvent::FpsChange(fps) => assert_eq!(fps, 42),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn stream_queues_events_in_order() {
        let emitter = EventEmitter::new();
        let stream = emitter.stream(Some(EventKind::FpsChange));
        emitter.emit(&ArEvent::FpsChange(1));
        emitter.emit(&ArEvent::Ready);
        emitter.emit(&ArEvent::FpsChange(2));
        assert_eq!(stream.len(), 2);
        match (stream.try_next(), stream.try_next()) {
            (Some(ArEvent::FpsChange(1)), Some(ArEvent::FpsChange(2))) => {}
            other => panic!("unexpected order {other:?}"),
        }
        emitter.close_stream(stream);
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn subscribing_during_emit_takes_effect_next_emit() {
        let emitter = Arc::new(EventEmitter::new());
        let count = Arc::new(AtomicU32::new(0));
        let e2 = Arc::clone(&emitter);
        let c2 = Arc::clone(&count);
        let _id = emitter.once(EventKind::Ready, move |_| {
            let c3 = Arc::clone(&c2);
            let _ = e2.on(EventKind::Ready, move |_| {
                let _ = c3.fetch_add(1, Ordering::SeqCst);
            });
        });
        emitter.emit(&ArEvent::Ready);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        emitter.emit(&ArEvent::Ready);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn nested_emit_is_delivered_after_current_pass() {
        let emitter = Arc::new(EventEmitter::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let e2 = Arc::clone(&emitter);
        let o2 = Arc::clone(&order);
        let _a = emitter.once(EventKind::Ready, move |_| {
            o2.lock().push("ready");
            e2.emit(&ArEvent::Warning("nested".into()));
        });
        let o3 = Arc::clone(&order);
        let _b = emitter.on(EventKind::Warning, move |_| {
            o3.lock().push("warning");
        });
        emitter.emit(&ArEvent::Ready);
        assert_eq!(*order.lock(), vec!["ready", "warning"]);
    }
}
