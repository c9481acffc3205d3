//! The per-request tenant context.
//!
//! A `Context` is handed to each task function and is the only door tenant
//! code has to the host: queries, transaction control, fetches, timers and
//! logging all go through it. The request identifier lives in a cell owned by
//! the runtime and is exposed only through the `id()` accessor; when the task
//! terminally resolves or rejects, the context is detached (the id zeroed)
//! and any further host call produces zero-id messages the host correlates to
//! nothing.

use crate::error::{RuntimeError, TaskError};
use crate::scheduler::RuntimeShared;
use crate::subtask::SubtaskFuture;
use serde_json::{json, Value as JsonValue};
use std::cell::Cell;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use trellis_commons::protocol::msg;
use trellis_commons::{validate, ParamMap, Query, Validator};

pub(crate) struct ContextInner {
    id: Cell<u32>,
    runtime: Weak<RuntimeShared>,
}

/// Tenant handle for one request.
#[derive(Clone)]
pub struct Context {
    inner: Rc<ContextInner>,
}

impl Context {
    pub(crate) fn new(id: u32, runtime: Weak<RuntimeShared>) -> Self {
        Context {
            inner: Rc::new(ContextInner {
                id: Cell::new(id),
                runtime,
            }),
        }
    }

    /// The request identifier. Zero once the request has terminally resolved.
    pub fn id(&self) -> u32 {
        self.inner.id.get()
    }

    pub fn is_detached(&self) -> bool {
        self.inner.id.get() == 0
    }

    /// Zero the id and return its pre-detach value, captured once for the
    /// terminal outbound message.
    pub(crate) fn detach(&self) -> u32 {
        self.inner.id.replace(0)
    }

    fn runtime(&self) -> Option<Rc<RuntimeShared>> {
        self.inner.runtime.upgrade()
    }

    /// Milliseconds since the epoch, frozen for the duration of the tick.
    pub fn now_millis(&self) -> u64 {
        self.runtime().map(|rt| rt.clock.now_millis()).unwrap_or(0)
    }

    /// Deterministic random value in `[0, 1)`; the generator is reseeded from
    /// each tick's `now`.
    pub fn random(&self) -> f64 {
        self.runtime()
            .map(|rt| rt.rng.borrow_mut().next_f64())
            .unwrap_or(0.0)
    }

    /// Emit a `Log` message to the host.
    pub fn log(&self, level: &str, message: &str) {
        if let Some(rt) = self.runtime() {
            rt.emit(
                msg::LOG,
                self.id(),
                0,
                json!(level),
                json!(message),
            );
        }
    }

    /// Allocate a promise subtask and emit one host message that will be
    /// resumed with the subtask's outcome.
    async fn host_call(
        &self,
        msg_type: u8,
        arg1: JsonValue,
        arg2: JsonValue,
    ) -> Result<JsonValue, TaskError> {
        let rt = self
            .runtime()
            .ok_or_else(|| TaskError::Other("runtime is gone".to_string()))?;
        let (subtask_id, state) = rt.subtasks.borrow_mut().insert_promise(self.clone());
        rt.emit(msg_type, self.id(), subtask_id, arg1, arg2);
        SubtaskFuture::new(state).await
    }

    /// Execute a whitelisted query.
    ///
    /// Refuses sentinel-fingerprint queries, validates the parameter map, and
    /// emits a `Query` message carrying the fingerprint (or the text for a
    /// dynamic query) and the prepared `{params, fragments}` bundle.
    pub async fn execute_query(
        &self,
        query: &Query,
        params: ParamMap,
        validators: &[Arc<dyn Validator>],
    ) -> Result<JsonValue, TaskError> {
        if query.fingerprint.is_invalid() {
            return Err(TaskError::UncompiledQuery);
        }
        if let Some(errors) = validate(&query.params, &params, validators).await {
            return Err(TaskError::Validation(errors));
        }

        let target = if query.fingerprint.is_dynamic() {
            json!(query.text)
        } else {
            json!(query.fingerprint.as_str())
        };
        let fragments: Vec<&str> = query.fragments.iter().map(|f| f.as_str()).collect();
        let bundle = json!({ "params": params, "fragments": fragments });
        self.host_call(msg::QUERY, target, bundle).await
    }

    /// Commit the request's transaction.
    pub async fn commit(&self) -> Result<JsonValue, TaskError> {
        self.host_call(msg::QUERY, json!("COMMIT"), JsonValue::Null)
            .await
    }

    /// Roll back the request's transaction.
    pub async fn rollback(&self) -> Result<JsonValue, TaskError> {
        self.host_call(msg::QUERY, json!("ROLLBACK"), JsonValue::Null)
            .await
    }

    /// Issue an outbound HTTP fetch through the host. A `RequestId` header is
    /// injected so the host can correlate sub-fetches to this request.
    pub async fn fetch(&self, mut request: JsonValue) -> Result<JsonValue, TaskError> {
        if let Some(obj) = request.as_object_mut() {
            let headers = obj
                .entry("headers".to_string())
                .or_insert_with(|| json!({}));
            if let Some(headers) = headers.as_object_mut() {
                headers.insert("RequestId".to_string(), json!(self.id()));
            }
        }
        self.host_call(msg::FETCH, request, JsonValue::Null).await
    }

    /// Schedule a one-shot timer. Emits `CreateTimer` with positive millis.
    pub fn set_timeout(
        &self,
        millis: u64,
        callback: impl FnMut(JsonValue) + 'static,
    ) -> Result<u32, RuntimeError> {
        self.new_timer(millis as i64, Box::new(callback))
    }

    /// Schedule a repeating timer. Emits `CreateTimer` with negated millis.
    pub fn set_interval(
        &self,
        millis: u64,
        callback: impl FnMut(JsonValue) + 'static,
    ) -> Result<u32, RuntimeError> {
        self.new_timer(-(millis as i64), Box::new(callback))
    }

    fn new_timer(
        &self,
        millis: i64,
        callback: Box<dyn FnMut(JsonValue)>,
    ) -> Result<u32, RuntimeError> {
        let rt = self.runtime().ok_or(RuntimeError::Gone)?;
        let active = rt.timer_count.get();
        if active >= rt.timer_ceiling {
            return Err(RuntimeError::TimerCeiling(active));
        }
        let id = rt
            .subtasks
            .borrow_mut()
            .insert_callback(self.clone(), callback);
        rt.timer_count.set(active + 1);
        rt.emit(
            msg::CREATE_TIMER,
            self.id(),
            id,
            json!({ "milliseconds": millis }),
            JsonValue::Null,
        );
        Ok(id)
    }

    /// Cancel a timer. Emits `DeleteTimer` and drops the callback subtask.
    pub fn clear_timer(&self, timer_id: u32) {
        let Some(rt) = self.runtime() else {
            return;
        };
        let removed = rt.subtasks.borrow_mut().remove(timer_id);
        match removed {
            Some(subtask) if !subtask.is_promise() => {
                rt.timer_count.set(rt.timer_count.get().saturating_sub(1));
                rt.emit(
                    msg::DELETE_TIMER,
                    self.id(),
                    timer_id,
                    JsonValue::Null,
                    JsonValue::Null,
                );
            }
            Some(subtask) => {
                // Not a timer; put the promise subtask back untouched.
                log::warn!("clearTimer called with a promise subtask id {}", timer_id);
                rt.subtasks.borrow_mut().entries_reinsert(timer_id, subtask);
            }
            None => {
                log::warn!("clearTimer for unknown timer {}", timer_id);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn detached_for_tests(id: u32) -> Self {
        Context {
            inner: Rc::new(ContextInner {
                id: Cell::new(id),
                runtime: Weak::new(),
            }),
        }
    }
}
