//! Trace persistence tests
//!
//! Traces are stored as JSON by the CLI; a stored trace must come back
//! identical and still validate.

use hotpath_trace::*;

fn counting_loop() -> Trace {
    let anchor = MethodRef::new("Counter", "count", vec![Kind::Int], Kind::Int);
    let mut b = TraceBuilder::new(anchor, 2);
    let i = b.local(Kind::Int);
    let total = b.local(Kind::Long);
    let one = b.constant(Value::Int(1));
    let next = b.builtin(Builtin::IntAdd, &[i, one]);
    let widened = b.builtin(Builtin::IntToLong, &[next]);
    let sum = b.builtin(Builtin::LongAdd, &[total, widened]);
    let limit = b.constant(Value::Int(1_000));
    let state = b.frame_state(11, &[]);
    b.guard(Kind::Int, Comparator::LessThan, next, limit, Some(state));
    b.store(i, next);
    b.store(total, sum);
    b.build().expect("counting loop is well formed")
}

#[test]
fn test_trace_survives_json() {
    let trace = counting_loop();
    let json = serde_json::to_string_pretty(&trace).unwrap();
    let back: Trace = serde_json::from_str(&json).unwrap();

    assert_eq!(back, trace);
    assert!(back.validate().is_ok());
    assert_eq!(back.entry_state().len(), 2);
}

#[test]
fn test_deserialized_trace_is_revalidated() {
    let trace = counting_loop();
    let mut json: serde_json::Value = serde_json::to_value(&trace).unwrap();
    // Drop the tail state so the snapshots no longer line up.
    json["tail_state"] = serde_json::Value::Array(vec![]);
    let broken: Trace = serde_json::from_value(json).unwrap();

    assert_eq!(
        broken.validate(),
        Err(TraceError::StateLengthMismatch { entry: 2, tail: 0 })
    );
}

#[test]
fn test_frame_state_snapshots_current_locals() {
    let anchor = MethodRef::new("Swap", "run", vec![], Kind::Void);
    let mut b = TraceBuilder::new(anchor, 0);
    let x = b.local(Kind::Int);
    let y = b.local(Kind::Int);
    b.store(x, y);
    let state = b.frame_state(3, &[x]);
    b.store(y, x);

    assert_eq!(state.locals, vec![y, y]);
    assert_eq!(state.stack, vec![x]);
    assert_eq!(b.current(y), Some(x));
}
