//! Shared functionality which is used in unit tests.

use std::{cell::RefCell, rc::Rc};

use crate::{
    runtime::{method::MethodId, value::Value},
    threading::frame::{MethodCallback, MethodResult},
    Jvm,
};

/// Creates a callback that records the invocation outcome for inspection.
pub(crate) fn collect_result() -> (Rc<RefCell<Option<MethodResult>>>, MethodCallback) {
    let slot: Rc<RefCell<Option<MethodResult>>> = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&slot);
    let cb: MethodCallback = Box::new(move |_jvm: &mut Jvm, outcome| {
        *sink.borrow_mut() = Some(outcome);
    });
    (slot, cb)
}

/// Runs `method` on a fresh thread with `args`, pumps to quiescence, and
/// returns the VM plus the recorded outcome.
pub(crate) fn pumped(
    mut jvm: Jvm,
    method: MethodId,
    args: Vec<Value>,
) -> (Jvm, Rc<RefCell<Option<MethodResult>>>) {
    let tid = jvm.new_thread(jvm.bootstrap().thread);
    let (result, cb) = collect_result();
    jvm.run_method(tid, method, args, Some(cb));
    jvm.run_until_idle();
    (jvm, result)
}
