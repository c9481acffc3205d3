//! The batch tick scheduler.
//!
//! The host drives the runtime through a single entry point: `run_tasks`
//! consumes a batch of inbound slots (new task invocations and subtask
//! resumptions), dispatches them in index order, drains the microtask queue,
//! and leaves the outbound batch in the host-owned outbox. The runtime is
//! strictly single-threaded; re-entering `run_tasks` while a tick is in
//! progress is an error.

use crate::clock::TickClock;
use crate::context::Context;
use crate::error::{Result, RuntimeError, TaskError};
use crate::outbox::Outbox;
use crate::prng::XorShift64Plus;
use crate::subtask::{SubtaskKind, SubtaskRegistry};
use serde_json::Value as JsonValue;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context as PollContext, Poll, RawWaker, RawWakerVTable, Waker};
use trellis_commons::protocol::{flags, msg};

/// Default ceiling on concurrently scheduled timers.
pub const DEFAULT_TIMER_CEILING: usize = 10;

/// Built-in task names, consulted after the user task table.
const BUILTIN_INIT: &str = "__init";
const BUILTIN_CANCEL: &str = "__cancel";

/// Outcome of a task function.
pub type TaskResult = std::result::Result<JsonValue, TaskError>;
/// Future produced by a task function.
pub type TaskFuture = Pin<Box<dyn Future<Output = TaskResult>>>;
/// A registered task function.
pub type TaskFn = Rc<dyn Fn(Context, JsonValue) -> TaskFuture>;

/// Target of an inbound slot: a named task invocation or a subtask resumption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboxTarget {
    Task(String),
    Subtask(u32),
}

/// One inbound host slot: `[requestIdWithFlags, nameOrSubtaskId, argument]`.
/// Fields are cleared after dispatch so held-over payloads become collectable.
#[derive(Debug, Default)]
pub struct InboxSlot {
    pub request_id: u32,
    pub target: Option<InboxTarget>,
    pub argument: Option<JsonValue>,
}

impl InboxSlot {
    pub fn task(request_id: u32, name: impl Into<String>, argument: JsonValue) -> Self {
        InboxSlot {
            request_id,
            target: Some(InboxTarget::Task(name.into())),
            argument: Some(argument),
        }
    }

    pub fn resume(request_id: u32, subtask: u32, data: JsonValue) -> Self {
        InboxSlot {
            request_id: request_id | flags::RESUME,
            target: Some(InboxTarget::Subtask(subtask)),
            argument: Some(data),
        }
    }

    pub fn reject(request_id: u32, subtask: u32, data: JsonValue) -> Self {
        InboxSlot {
            request_id: request_id | flags::REJECT,
            target: Some(InboxTarget::Subtask(subtask)),
            argument: Some(data),
        }
    }
}

struct Job {
    future: TaskFuture,
    context: Context,
}

/// Runtime state shared with contexts through weak handles.
pub(crate) struct RuntimeShared {
    tasks: RefCell<HashMap<String, TaskFn>>,
    pub(crate) subtasks: RefCell<SubtaskRegistry>,
    jobs: RefCell<HashMap<u32, Job>>,
    ready: RefCell<VecDeque<u32>>,
    outbox: RefCell<Outbox>,
    pub(crate) clock: TickClock,
    pub(crate) rng: RefCell<XorShift64Plus>,
    pub(crate) timer_count: Cell<usize>,
    pub(crate) timer_ceiling: usize,
    in_tick: Cell<bool>,
}

impl RuntimeShared {
    pub(crate) fn emit(
        &self,
        msg_type: u8,
        request_id: u32,
        subtask: u32,
        arg1: JsonValue,
        arg2: JsonValue,
    ) {
        self.outbox
            .borrow_mut()
            .emit(msg_type, request_id, subtask, arg1, arg2);
    }
}

/// The sandboxed tenant runtime.
pub struct Runtime {
    shared: Rc<RuntimeShared>,
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_timer_ceiling(DEFAULT_TIMER_CEILING)
    }

    pub fn with_timer_ceiling(timer_ceiling: usize) -> Self {
        let seed: u32 = rand::random();
        Runtime {
            shared: Rc::new(RuntimeShared {
                tasks: RefCell::new(HashMap::new()),
                subtasks: RefCell::new(SubtaskRegistry::new(seed)),
                jobs: RefCell::new(HashMap::new()),
                ready: RefCell::new(VecDeque::new()),
                outbox: RefCell::new(Outbox::new()),
                clock: TickClock::new(),
                rng: RefCell::new(XorShift64Plus::new(seed as u64)),
                timer_count: Cell::new(0),
                timer_ceiling,
                in_tick: Cell::new(false),
            }),
        }
    }

    /// Register a named task function. Duplicates are rejected.
    pub fn register<F, Fut>(&self, name: &str, func: F) -> Result<()>
    where
        F: Fn(Context, JsonValue) -> Fut + 'static,
        Fut: Future<Output = TaskResult> + 'static,
    {
        let mut tasks = self.shared.tasks.borrow_mut();
        if tasks.contains_key(name) {
            return Err(RuntimeError::DuplicateTask(name.to_string()));
        }
        let wrapped: TaskFn = Rc::new(move |ctx, arg| {
            let future: TaskFuture = Box::pin(func(ctx, arg));
            future
        });
        tasks.insert(name.to_string(), wrapped);
        Ok(())
    }

    /// The frozen clock handle, for hosts that need to display tick time.
    pub fn clock(&self) -> TickClock {
        self.shared.clock.clone()
    }

    /// Number of outstanding subtasks, promise and callback alike.
    pub fn outstanding_subtasks(&self) -> usize {
        self.shared.subtasks.borrow().len()
    }

    /// One batch tick.
    ///
    /// Installs `outbox` as the current outbound buffer with its tail set to
    /// `outbox_tail`, freezes the clock at `now_millis`, reseeds the PRNG from
    /// it, dispatches `inbox[..inbox_len]` in index order, drains microtasks,
    /// and returns the outbox tail. The host must not re-enter until it
    /// returns.
    pub fn run_tasks(
        &self,
        inbox: &mut [InboxSlot],
        inbox_len: usize,
        outbox: &mut Outbox,
        outbox_tail: usize,
        now_millis: u64,
    ) -> Result<usize> {
        if self.shared.in_tick.replace(true) {
            return Err(RuntimeError::Reentrant);
        }

        outbox.set_tail(outbox_tail);
        mem::swap(&mut *self.shared.outbox.borrow_mut(), outbox);
        self.shared.clock.set(now_millis);
        self.shared.rng.borrow_mut().reseed(now_millis);

        for slot in inbox.iter_mut().take(inbox_len) {
            let request_id = slot.request_id;
            let target = slot.target.take();
            let argument = slot.argument.take().unwrap_or(JsonValue::Null);
            // request_id stays in the slot; payload fields are cleared above
            // so held-over data does not outlive the tick.

            match target {
                Some(InboxTarget::Subtask(subtask_id))
                    if request_id & flags::REQUEST_IS_SUBTASK != 0 =>
                {
                    self.resume_task(request_id, subtask_id, argument);
                }
                Some(InboxTarget::Task(name)) => {
                    self.run_task(request_id & flags::REQUEST_ID_MASK, &name, argument);
                }
                Some(InboxTarget::Subtask(subtask_id)) => {
                    log::warn!(
                        "Inbox slot targets subtask {} without resume/reject flags; dropped",
                        subtask_id
                    );
                }
                None => {}
            }
        }

        self.drain_microtasks();

        mem::swap(&mut *self.shared.outbox.borrow_mut(), outbox);
        self.shared.in_tick.set(false);
        Ok(outbox.tail())
    }

    /// Dispatch one new task invocation.
    fn run_task(&self, request_id: u32, name: &str, argument: JsonValue) {
        let func = self.shared.tasks.borrow().get(name).cloned();
        let context = Context::new(request_id, Rc::downgrade(&self.shared));

        match func {
            Some(func) => {
                let future = func(context.clone(), argument);
                self.shared
                    .jobs
                    .borrow_mut()
                    .insert(request_id, Job { future, context });
                self.shared.ready.borrow_mut().push_back(request_id);
            }
            None => match name {
                BUILTIN_INIT => {
                    self.finish(request_id, context, Ok(JsonValue::Null));
                }
                BUILTIN_CANCEL => {
                    let target = argument.as_u64().unwrap_or(0) as u32;
                    self.cancel_request(target);
                    self.finish(request_id, context, Ok(JsonValue::Null));
                }
                _ => {
                    log::warn!("Task function {:?} not found", name);
                    self.finish(
                        request_id,
                        context,
                        Err(TaskError::NotFound(name.to_string())),
                    );
                }
            },
        }
    }

    /// Complete a subtask: resolve on the Resume flag, reject when a reject
    /// handle exists. Promise subtasks are single-shot; callback subtasks stay
    /// registered so interval timers can re-fire.
    fn resume_task(&self, flagged_id: u32, subtask_id: u32, data: JsonValue) {
        let request_id = flagged_id & flags::REQUEST_ID_MASK;
        let resume = flagged_id & flags::RESUME != 0;

        enum Disposition {
            Resolve(crate::subtask::SharedPromise),
            Fire(crate::subtask::SubtaskCallback),
        }

        let disposition = {
            let subtasks = self.shared.subtasks.borrow();
            let Some(entry) = subtasks.get(subtask_id) else {
                // Normal when a timer was cancelled after the host queued its tick.
                log::warn!("Resume for unknown subtask {}", subtask_id);
                return;
            };
            if entry.context.id() != request_id {
                log::warn!(
                    "Resume for subtask {} with stale request id {} (current {})",
                    subtask_id,
                    request_id,
                    entry.context.id()
                );
                return;
            }
            match &entry.kind {
                SubtaskKind::Promise(state) => Disposition::Resolve(state.clone()),
                SubtaskKind::Callback(callback) => Disposition::Fire(callback.clone()),
            }
        };

        match disposition {
            // Single-shot: the entry is deleted on its terminal transition.
            Disposition::Resolve(state) => {
                self.shared.subtasks.borrow_mut().remove(subtask_id);
                state.borrow_mut().outcome = Some(if resume {
                    Ok(data)
                } else {
                    Err(TaskError::Subtask {
                        subtask: subtask_id,
                        data,
                    })
                });
                self.shared.ready.borrow_mut().push_back(request_id);
            }
            // Callback subtasks stay registered so interval timers re-fire;
            // a reject with a null reject handle is a no-op.
            Disposition::Fire(callback) => {
                if resume {
                    (callback.borrow_mut())(data);
                }
            }
        }
    }

    /// Reject every promise subtask belonging to `request_id`; callback
    /// subtasks (timers) belong to the infrastructure and persist.
    pub fn cancel_request(&self, request_id: u32) {
        let doomed = self
            .shared
            .subtasks
            .borrow()
            .promise_ids_of_request(request_id);
        if doomed.is_empty() {
            return;
        }
        for id in doomed {
            let removed = self.shared.subtasks.borrow_mut().remove(id);
            if let Some(subtask) = removed {
                if let SubtaskKind::Promise(state) = subtask.kind {
                    state.borrow_mut().outcome = Some(Err(TaskError::Cancelled(request_id)));
                }
            }
        }
        self.shared.ready.borrow_mut().push_back(request_id);
    }

    /// Poll ready jobs until the queue is empty.
    fn drain_microtasks(&self) {
        let waker = noop_waker();
        let mut cx = PollContext::from_waker(&waker);

        loop {
            let Some(request_id) = self.shared.ready.borrow_mut().pop_front() else {
                break;
            };
            let Some(mut job) = self.shared.jobs.borrow_mut().remove(&request_id) else {
                continue;
            };
            match job.future.as_mut().poll(&mut cx) {
                Poll::Ready(result) => {
                    self.finish(request_id, job.context, result);
                }
                Poll::Pending => {
                    self.shared.jobs.borrow_mut().insert(request_id, job);
                }
            }
        }
    }

    /// Terminal disposition: detach the context and emit the outcome under the
    /// context's pre-detach id.
    fn finish(&self, request_id: u32, context: Context, result: TaskResult) {
        let original = context.detach();
        debug_assert!(original == 0 || original == request_id);
        match result {
            Ok(value) => {
                self.shared
                    .emit(msg::CALL_RESULT, original, 0, value, JsonValue::Null);
            }
            Err(error) => {
                self.shared
                    .emit(msg::CALL_ERROR, original, 0, error.to_wire(), JsonValue::Null);
            }
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

fn noop_waker() -> Waker {
    const VTABLE: RawWakerVTable = RawWakerVTable::new(
        |_| RawWaker::new(std::ptr::null(), &VTABLE),
        |_| {},
        |_| {},
        |_| {},
    );
    // Safety: the vtable functions are all no-ops over a null pointer.
    unsafe { Waker::from_raw(RawWaker::new(std::ptr::null(), &VTABLE)) }
}
