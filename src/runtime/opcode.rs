//! The interpreter instruction set.
//!
//! [`Opcode`] is a compact, pre-decoded instruction enum. The dispatch site
//! branches once on the variant — there is no virtual dispatch in the hot
//! loop. Every opcode owns its `pc` bookkeeping:
//!
//! - plain opcodes advance `pc` past themselves,
//! - branch opcodes set `pc` to their target,
//! - yield opcodes (invoke, return, throw, blocking monitor entry) leave
//!   `pc` for the resume path and set `return_to_thread_loop` so the frame
//!   hands control back to the thread's dispatch loop.
//!
//! `pc` is an index into the method's code array; one opcode per index.

use crate::{
    runtime::{method::MethodId, value::Value},
    threading::ThreadId,
    Jvm,
};

/// A single pre-decoded interpreter instruction.
#[derive(Debug, Clone)]
pub enum Opcode {
    /// Does nothing.
    Nop,
    /// Pushes a constant. Category-2 constants also push their filler slot.
    Const(Value),
    /// Pushes the category-1 local at the given index.
    Load(u16),
    /// Pushes the category-2 local at the given index plus its filler.
    LoadWide(u16),
    /// Pops a category-1 value into the local at the given index.
    Store(u16),
    /// Pops a category-2 value (and filler) into the locals at the given
    /// index and index + 1.
    StoreWide(u16),
    /// Discards the top operand slot.
    Pop,
    /// Duplicates the top operand slot.
    Dup,
    /// Pops two ints, pushes their wrapping sum.
    IAdd,
    /// Pops two ints, pushes their wrapping difference.
    ISub,
    /// Pops two ints, pushes their wrapping product.
    IMul,
    /// Unconditional branch to the target code index.
    Goto(u32),
    /// Pops an int; branches to the target when it is zero.
    IfEq(u32),
    /// Pops an int; branches to the target when it is non-zero.
    IfNe(u32),
    /// Invokes a pre-resolved method, popping its argument slots
    /// (receiver included for instance methods). Yields.
    Invoke(MethodId),
    /// Returns `void` from the current method. Yields.
    Return,
    /// Returns the popped category-1 value. Yields.
    ReturnValue,
    /// Returns the popped category-2 value (filler popped first). Yields.
    ReturnWide,
    /// Pops a throwable reference and raises it; a null reference raises
    /// `java/lang/NullPointerException`. Yields.
    AThrow,
    /// Pops an object reference and enters its monitor; yields when the
    /// monitor is contended.
    MonitorEnter,
    /// Pops an object reference and exits its monitor.
    MonitorExit,
}

impl Opcode {
    /// Instruction mnemonic for tracing and diagnostics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Opcode::Nop => "nop",
            Opcode::Const(_) => "const",
            Opcode::Load(_) => "load",
            Opcode::LoadWide(_) => "load_w",
            Opcode::Store(_) => "store",
            Opcode::StoreWide(_) => "store_w",
            Opcode::Pop => "pop",
            Opcode::Dup => "dup",
            Opcode::IAdd => "iadd",
            Opcode::ISub => "isub",
            Opcode::IMul => "imul",
            Opcode::Goto(_) => "goto",
            Opcode::IfEq(_) => "ifeq",
            Opcode::IfNe(_) => "ifne",
            Opcode::Invoke(_) => "invoke",
            Opcode::Return => "return",
            Opcode::ReturnValue => "vreturn",
            Opcode::ReturnWide => "wreturn",
            Opcode::AThrow => "athrow",
            Opcode::MonitorEnter => "monitorenter",
            Opcode::MonitorExit => "monitorexit",
        }
    }

    /// Advances a frame's `pc` past this instruction.
    ///
    /// Used by the resume path after a nested invocation returns; every
    /// instruction occupies one code index.
    pub fn inc_pc(&self, frame: &mut crate::threading::BytecodeFrame) {
        frame.pc += 1;
    }

    /// Executes this instruction on the top bytecode frame of `tid`.
    ///
    /// # Panics
    ///
    /// Panics on operand-stack or local-slot type violations — bytecode
    /// verification is out of scope, so malformed code is a host bug.
    pub fn execute(&self, jvm: &mut Jvm, tid: ThreadId) {
        match self {
            Opcode::Nop => {
                let frame = jvm.top_bytecode_frame_mut(tid);
                frame.pc += 1;
            }
            Opcode::Const(v) => {
                let filler = v.is_category_2();
                let frame = jvm.top_bytecode_frame_mut(tid);
                frame.operand_stack.push(v.clone());
                if filler {
                    frame.operand_stack.push(Value::Null);
                }
                frame.pc += 1;
            }
            Opcode::Load(index) => {
                let frame = jvm.top_bytecode_frame_mut(tid);
                let v = frame.local(*index).clone();
                if v.is_category_2() {
                    vm_bug!("load of category-2 local {index}");
                }
                frame.operand_stack.push(v);
                frame.pc += 1;
            }
            Opcode::LoadWide(index) => {
                let frame = jvm.top_bytecode_frame_mut(tid);
                let v = frame.local(*index).clone();
                if !v.is_category_2() {
                    vm_bug!("wide load of category-1 local {index}");
                }
                frame.operand_stack.push(v);
                frame.operand_stack.push(Value::Null);
                frame.pc += 1;
            }
            Opcode::Store(index) => {
                let frame = jvm.top_bytecode_frame_mut(tid);
                let v = frame.pop_operand();
                if v.is_category_2() {
                    vm_bug!("store of category-2 value into single local {index}");
                }
                frame.set_local(*index, v);
                frame.pc += 1;
            }
            Opcode::StoreWide(index) => {
                let frame = jvm.top_bytecode_frame_mut(tid);
                let filler = frame.pop_operand();
                if filler != Value::Null {
                    vm_bug!("wide store without null filler on top of stack");
                }
                let v = frame.pop_operand();
                if !v.is_category_2() {
                    vm_bug!("wide store of category-1 value into local {index}");
                }
                frame.set_local(*index, v);
                frame.set_local(*index + 1, Value::Null);
                frame.pc += 1;
            }
            Opcode::Pop => {
                let frame = jvm.top_bytecode_frame_mut(tid);
                frame.pop_operand();
                frame.pc += 1;
            }
            Opcode::Dup => {
                let frame = jvm.top_bytecode_frame_mut(tid);
                let top = frame
                    .operand_stack
                    .last()
                    .cloned()
                    .unwrap_or_else(|| vm_bug!("dup on empty operand stack"));
                frame.operand_stack.push(top);
                frame.pc += 1;
            }
            Opcode::IAdd => Self::int_binop(jvm, tid, i32::wrapping_add),
            Opcode::ISub => Self::int_binop(jvm, tid, i32::wrapping_sub),
            Opcode::IMul => Self::int_binop(jvm, tid, i32::wrapping_mul),
            Opcode::Goto(target) => {
                let frame = jvm.top_bytecode_frame_mut(tid);
                frame.pc = *target;
            }
            Opcode::IfEq(target) => Self::int_branch(jvm, tid, *target, |v| v == 0),
            Opcode::IfNe(target) => Self::int_branch(jvm, tid, *target, |v| v != 0),
            Opcode::Invoke(method) => {
                let slots = jvm.loader.method(*method).invoke_slots();
                let args = {
                    let frame = jvm.top_bytecode_frame_mut(tid);
                    let len = frame.operand_stack.len();
                    if len < slots {
                        vm_bug!("invoke needs {slots} argument slots, stack has {len}");
                    }
                    frame.return_to_thread_loop = true;
                    frame.operand_stack.split_off(len - slots)
                };
                jvm.run_method(tid, *method, args, None);
            }
            Opcode::Return => {
                jvm.top_bytecode_frame_mut(tid).return_to_thread_loop = true;
                jvm.release_method_lock(tid);
                jvm.async_return(tid, None, None);
            }
            Opcode::ReturnValue => {
                let rv = {
                    let frame = jvm.top_bytecode_frame_mut(tid);
                    frame.return_to_thread_loop = true;
                    frame.pop_operand()
                };
                jvm.release_method_lock(tid);
                jvm.async_return(tid, Some(rv), None);
            }
            Opcode::ReturnWide => {
                let rv = {
                    let frame = jvm.top_bytecode_frame_mut(tid);
                    frame.return_to_thread_loop = true;
                    let filler = frame.pop_operand();
                    if filler != Value::Null {
                        vm_bug!("wide return without null filler on top of stack");
                    }
                    frame.pop_operand()
                };
                jvm.release_method_lock(tid);
                jvm.async_return(tid, Some(rv), Some(Value::Null));
            }
            Opcode::AThrow => {
                let exception = {
                    let frame = jvm.top_bytecode_frame_mut(tid);
                    frame.return_to_thread_loop = true;
                    frame.pop_operand()
                };
                match exception {
                    Value::Null => jvm.throw_new_exception(
                        tid,
                        "java/lang/NullPointerException",
                        "athrow on null reference",
                    ),
                    Value::Ref(_) => jvm.throw_exception(tid, exception),
                    other => vm_bug!("athrow of non-reference value {other}"),
                }
            }
            Opcode::MonitorEnter => {
                let obj = {
                    let frame = jvm.top_bytecode_frame_mut(tid);
                    frame.pop_operand()
                };
                let obj = match obj {
                    Value::Ref(r) => r,
                    Value::Null => {
                        jvm.top_bytecode_frame_mut(tid).return_to_thread_loop = true;
                        jvm.throw_new_exception(
                            tid,
                            "java/lang/NullPointerException",
                            "monitorenter on null reference",
                        );
                        return;
                    }
                    other => vm_bug!("monitorenter on non-reference value {other}"),
                };
                let mon = jvm.monitor_for_object(obj);
                let acquired = jvm.monitor_enter(
                    mon,
                    tid,
                    Some(Box::new(move |jvm: &mut Jvm| {
                        // Acquired after blocking: step past the instruction
                        // so re-entry resumes behind it.
                        jvm.top_bytecode_frame_mut(tid).pc += 1;
                    })),
                );
                let frame = jvm.top_bytecode_frame_mut(tid);
                if acquired {
                    frame.pc += 1;
                } else {
                    frame.return_to_thread_loop = true;
                }
            }
            Opcode::MonitorExit => {
                let obj = {
                    let frame = jvm.top_bytecode_frame_mut(tid);
                    frame.pop_operand()
                };
                let obj = match obj {
                    Value::Ref(r) => r,
                    Value::Null => {
                        jvm.top_bytecode_frame_mut(tid).return_to_thread_loop = true;
                        jvm.throw_new_exception(
                            tid,
                            "java/lang/NullPointerException",
                            "monitorexit on null reference",
                        );
                        return;
                    }
                    other => vm_bug!("monitorexit on non-reference value {other}"),
                };
                let mon = jvm.monitor_for_object(obj);
                jvm.monitor_exit(mon, tid);
                jvm.top_bytecode_frame_mut(tid).pc += 1;
            }
        }
    }

    fn int_binop(jvm: &mut Jvm, tid: ThreadId, op: fn(i32, i32) -> i32) {
        let frame = jvm.top_bytecode_frame_mut(tid);
        let b = frame
            .pop_operand()
            .as_int()
            .unwrap_or_else(|| vm_bug!("int arithmetic on non-int operand"));
        let a = frame
            .pop_operand()
            .as_int()
            .unwrap_or_else(|| vm_bug!("int arithmetic on non-int operand"));
        frame.operand_stack.push(Value::Int(op(a, b)));
        frame.pc += 1;
    }

    fn int_branch(jvm: &mut Jvm, tid: ThreadId, target: u32, taken: fn(i32) -> bool) {
        let frame = jvm.top_bytecode_frame_mut(tid);
        let v = frame
            .pop_operand()
            .as_int()
            .unwrap_or_else(|| vm_bug!("int branch on non-int operand"));
        if taken(v) {
            frame.pc = target;
        } else {
            frame.pc += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_names() {
        assert_eq!(Opcode::Nop.name(), "nop");
        assert_eq!(Opcode::Const(Value::Int(1)).name(), "const");
        assert_eq!(Opcode::Invoke(MethodId::new(0)).name(), "invoke");
        assert_eq!(Opcode::AThrow.name(), "athrow");
    }
}
