//! Tick-level tests driving the tenant runtime the way a host does.

use serde_json::{json, Value as JsonValue};
use std::cell::RefCell;
use std::rc::Rc;
use trellis_commons::protocol::{msg, msg_type, request_id};
use trellis_runtime::{Context, InboxSlot, OutMessage, Outbox, Runtime, TaskError};

fn messages_of_type(outbox: &Outbox, ty: u8) -> Vec<OutMessage> {
    outbox
        .messages()
        .iter()
        .filter(|m| msg_type(m.id) == ty)
        .cloned()
        .collect()
}

fn tick(rt: &Runtime, outbox: &mut Outbox, slots: Vec<InboxSlot>, now: u64) -> usize {
    let mut inbox = slots;
    let len = inbox.len();
    rt.run_tasks(&mut inbox, len, outbox, 0, now).unwrap()
}

#[test]
fn test_immediate_task_emits_call_result() {
    let rt = Runtime::new();
    rt.register("echo", |_ctx: Context, arg: JsonValue| async move { Ok(arg) })
        .unwrap();

    let mut outbox = Outbox::new();
    let tail = tick(&rt, &mut outbox, vec![InboxSlot::task(7, "echo", json!("hi"))], 1_000);

    assert_eq!(tail, 1);
    let results = messages_of_type(&outbox, msg::CALL_RESULT);
    assert_eq!(results.len(), 1);
    assert_eq!(request_id(results[0].id), 7);
    assert_eq!(results[0].arg1, json!("hi"));
}

#[test]
fn test_unknown_task_emits_call_error_and_tick_continues() {
    let rt = Runtime::new();
    rt.register("ok", |_ctx: Context, _arg: JsonValue| async move {
        Ok(json!(1))
    })
    .unwrap();

    let mut outbox = Outbox::new();
    tick(
        &rt,
        &mut outbox,
        vec![
            InboxSlot::task(1, "missing", JsonValue::Null),
            InboxSlot::task(2, "ok", JsonValue::Null),
        ],
        0,
    );

    let errors = messages_of_type(&outbox, msg::CALL_ERROR);
    assert_eq!(errors.len(), 1);
    assert_eq!(request_id(errors[0].id), 1);
    // The failure of slot 0 did not abort dispatch of slot 1.
    let results = messages_of_type(&outbox, msg::CALL_RESULT);
    assert_eq!(results.len(), 1);
    assert_eq!(request_id(results[0].id), 2);
}

#[test]
fn test_duplicate_registration_rejected() {
    let rt = Runtime::new();
    rt.register("t", |_ctx: Context, _arg: JsonValue| async move {
        Ok(JsonValue::Null)
    })
    .unwrap();
    let second = rt.register("t", |_ctx: Context, _arg: JsonValue| async move {
        Ok(JsonValue::Null)
    });
    assert!(second.is_err());
}

#[test]
fn test_subtask_resume_across_ticks() {
    let rt = Runtime::new();
    rt.register("tx", |ctx: Context, _arg: JsonValue| async move {
        let row = ctx.commit().await?;
        Ok(json!({ "committed": row }))
    })
    .unwrap();

    let mut outbox = Outbox::new();
    tick(&rt, &mut outbox, vec![InboxSlot::task(9, "tx", JsonValue::Null)], 10);

    // Tick 1: the Query message is out, nothing terminal yet.
    let queries = messages_of_type(&outbox, msg::QUERY);
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].arg1, json!("COMMIT"));
    assert!(messages_of_type(&outbox, msg::CALL_RESULT).is_empty());
    let subtask = queries[0].subtask;
    assert!(subtask < 1 << 31);

    // Tick 2: host resumes the subtask; the task completes.
    tick(
        &rt,
        &mut outbox,
        vec![InboxSlot::resume(9, subtask, json!("done"))],
        20,
    );
    let results = messages_of_type(&outbox, msg::CALL_RESULT);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].arg1, json!({ "committed": "done" }));
    assert_eq!(rt.outstanding_subtasks(), 0);
}

#[test]
fn test_subtask_reject_becomes_call_error() {
    let rt = Runtime::new();
    rt.register("tx", |ctx: Context, _arg: JsonValue| async move {
        ctx.rollback().await?;
        Ok(JsonValue::Null)
    })
    .unwrap();

    let mut outbox = Outbox::new();
    tick(&rt, &mut outbox, vec![InboxSlot::task(3, "tx", JsonValue::Null)], 0);
    let subtask = messages_of_type(&outbox, msg::QUERY)[0].subtask;

    tick(
        &rt,
        &mut outbox,
        vec![InboxSlot::reject(3, subtask, json!({"message": "deadlock"}))],
        5,
    );
    let errors = messages_of_type(&outbox, msg::CALL_ERROR);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].arg1, json!({"message": "deadlock"}));
}

#[test]
fn test_stale_and_unknown_resumes_are_ignored() {
    let rt = Runtime::new();
    rt.register("tx", |ctx: Context, _arg: JsonValue| async move {
        ctx.commit().await
    })
    .unwrap();

    let mut outbox = Outbox::new();
    tick(&rt, &mut outbox, vec![InboxSlot::task(4, "tx", JsonValue::Null)], 0);
    let subtask = messages_of_type(&outbox, msg::QUERY)[0].subtask;

    // Unknown subtask id: warn and drop.
    tick(&rt, &mut outbox, vec![InboxSlot::resume(4, subtask + 999, json!(1))], 1);
    assert!(messages_of_type(&outbox, msg::CALL_RESULT).is_empty());

    // Right subtask, wrong request id: warn and drop.
    tick(&rt, &mut outbox, vec![InboxSlot::resume(5, subtask, json!(1))], 2);
    assert!(messages_of_type(&outbox, msg::CALL_RESULT).is_empty());
    assert_eq!(rt.outstanding_subtasks(), 1);

    // The correct resume still lands.
    tick(&rt, &mut outbox, vec![InboxSlot::resume(4, subtask, json!(1))], 3);
    assert_eq!(messages_of_type(&outbox, msg::CALL_RESULT).len(), 1);
}

/// S4: cancelling a request rejects exactly its promise subtasks; the
/// interval timer's callback subtask survives and keeps firing for as long as
/// the owning request is live.
#[test]
fn test_cancel_rejects_promise_subtasks_only() {
    let rt = Runtime::new();
    let fired = Rc::new(RefCell::new(0u32));
    let fired_in_task = fired.clone();

    rt.register("spawner", move |ctx: Context, _arg: JsonValue| {
        let fired = fired_in_task.clone();
        async move {
            let timer_fired = fired.clone();
            ctx.set_interval(50, move |_| {
                *timer_fired.borrow_mut() += 1;
            })
            .map_err(|e| TaskError::Other(e.to_string()))?;

            let (a, b, c) =
                futures_util::future::join3(ctx.commit(), ctx.commit(), ctx.commit()).await;
            let cancelled = [a, b, c]
                .iter()
                .filter(|r| matches!(r, Err(TaskError::Cancelled(_))))
                .count();
            ctx.log("info", &format!("cancelled={}", cancelled));

            // Keep the request alive so the timer stays correlated to it.
            ctx.commit().await
        }
    })
    .unwrap();

    let mut outbox = Outbox::new();
    tick(&rt, &mut outbox, vec![InboxSlot::task(11, "spawner", JsonValue::Null)], 0);

    let timer = messages_of_type(&outbox, msg::CREATE_TIMER);
    assert_eq!(timer.len(), 1);
    assert_eq!(timer[0].arg1, json!({ "milliseconds": -50 }));
    let timer_id = timer[0].subtask;
    assert_eq!(messages_of_type(&outbox, msg::QUERY).len(), 3);
    // 3 promise subtasks + 1 callback subtask outstanding.
    assert_eq!(rt.outstanding_subtasks(), 4);

    // Cancel through the __cancel built-in.
    tick(
        &rt,
        &mut outbox,
        vec![InboxSlot::task(12, "__cancel", json!(11))],
        10,
    );
    // Request 12 acked; request 11 observed three rejections and logged them.
    let results = messages_of_type(&outbox, msg::CALL_RESULT);
    assert!(results.iter().any(|m| request_id(m.id) == 12));
    let logs = messages_of_type(&outbox, msg::LOG);
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].arg2, json!("cancelled=3"));
    // The timer plus the task's fresh keep-alive subtask remain.
    assert_eq!(rt.outstanding_subtasks(), 2);

    // The interval timer still fires on subsequent ticks.
    tick(&rt, &mut outbox, vec![InboxSlot::resume(11, timer_id, JsonValue::Null)], 20);
    assert_eq!(*fired.borrow(), 1);
    // Retained for re-fire.
    tick(&rt, &mut outbox, vec![InboxSlot::resume(11, timer_id, JsonValue::Null)], 30);
    assert_eq!(*fired.borrow(), 2);
}

/// S6 and the determinism invariants: a frozen clock inside the tick, and a
/// PRNG whose sequence replays for equal `now` values.
#[test]
fn test_frozen_clock_and_deterministic_prng() {
    let rt = Runtime::new();
    rt.register("probe", |ctx: Context, _arg: JsonValue| async move {
        let t1 = ctx.now_millis();
        let mut acc = 0f64;
        for i in 0..50_000 {
            acc += (i as f64).sqrt();
        }
        let t2 = ctx.now_millis();
        Ok(json!({
            "t1": t1,
            "t2": t2,
            "r": [ctx.random(), ctx.random()],
            "acc_positive": acc > 0.0,
        }))
    })
    .unwrap();

    let mut outbox = Outbox::new();
    tick(&rt, &mut outbox, vec![InboxSlot::task(1, "probe", JsonValue::Null)], 777);
    let first = messages_of_type(&outbox, msg::CALL_RESULT)[0].arg1.clone();
    assert_eq!(first["t1"], json!(777));
    assert_eq!(first["t2"], json!(777));

    // Replay with the same now: identical random sequence.
    tick(&rt, &mut outbox, vec![InboxSlot::task(2, "probe", JsonValue::Null)], 777);
    let second = messages_of_type(&outbox, msg::CALL_RESULT)[0].arg1.clone();
    assert_eq!(first["r"], second["r"]);

    // A different now yields a different sequence.
    tick(&rt, &mut outbox, vec![InboxSlot::task(3, "probe", JsonValue::Null)], 778);
    let third = messages_of_type(&outbox, msg::CALL_RESULT)[0].arg1.clone();
    assert_ne!(first["r"], third["r"]);
}

#[test]
fn test_detached_context_emits_zero_id() {
    let rt = Runtime::new();
    let stashed: Rc<RefCell<Option<Context>>> = Rc::new(RefCell::new(None));
    let stash = stashed.clone();

    rt.register("leak", move |ctx: Context, _arg: JsonValue| {
        let stash = stash.clone();
        async move {
            *stash.borrow_mut() = Some(ctx.clone());
            Ok(JsonValue::Null)
        }
    })
    .unwrap();

    let relog_stash = stashed.clone();
    rt.register("relog", move |_ctx: Context, _arg: JsonValue| {
        let stash = relog_stash.clone();
        async move {
            if let Some(old) = stash.borrow().as_ref() {
                old.log("warn", "spoken from beyond");
            }
            Ok(JsonValue::Null)
        }
    })
    .unwrap();

    let mut outbox = Outbox::new();
    tick(&rt, &mut outbox, vec![InboxSlot::task(21, "leak", JsonValue::Null)], 0);

    let ctx = stashed.borrow().clone().unwrap();
    assert!(ctx.is_detached());
    assert_eq!(ctx.id(), 0);

    // A host call from the detached context carries request id zero, which the
    // host correlates to nothing.
    tick(&rt, &mut outbox, vec![InboxSlot::task(22, "relog", JsonValue::Null)], 1);
    let logs = messages_of_type(&outbox, msg::LOG);
    assert_eq!(logs.len(), 1);
    assert_eq!(request_id(logs[0].id), 0);
}

#[test]
fn test_timer_ceiling_enforced() {
    let rt = Runtime::with_timer_ceiling(2);
    rt.register("timers", |ctx: Context, _arg: JsonValue| async move {
        ctx.set_timeout(10, |_| {})
            .map_err(|e| TaskError::Other(e.to_string()))?;
        ctx.set_timeout(10, |_| {})
            .map_err(|e| TaskError::Other(e.to_string()))?;
        let third = ctx.set_timeout(10, |_| {});
        Ok(json!({ "third_refused": third.is_err() }))
    })
    .unwrap();

    let mut outbox = Outbox::new();
    tick(&rt, &mut outbox, vec![InboxSlot::task(1, "timers", JsonValue::Null)], 0);
    let result = messages_of_type(&outbox, msg::CALL_RESULT)[0].arg1.clone();
    assert_eq!(result, json!({ "third_refused": true }));
    assert_eq!(messages_of_type(&outbox, msg::CREATE_TIMER).len(), 2);
}

#[test]
fn test_outbox_tail_reuse_between_ticks() {
    let rt = Runtime::new();
    rt.register("noop", |_ctx: Context, _arg: JsonValue| async move {
        Ok(JsonValue::Null)
    })
    .unwrap();

    let mut outbox = Outbox::new();
    let tail1 = tick(&rt, &mut outbox, vec![InboxSlot::task(1, "noop", JsonValue::Null)], 0);
    assert_eq!(tail1, 1);
    let allocated = outbox.slots().len();

    // Host consumed the batch; the next tick rewrites slot 0 in place.
    let tail2 = tick(&rt, &mut outbox, vec![InboxSlot::task(2, "noop", JsonValue::Null)], 1);
    assert_eq!(tail2, 1);
    assert_eq!(outbox.slots().len(), allocated);
    assert_eq!(request_id(outbox.messages()[0].id), 2);
}
