//! Assignment, arithmetic and comparison opcodes.
//!
//! The original instruction set spends one opcode per operand-type
//! combination (global vs local, literal vs variable). Operands are resolved
//! before dispatch here, so each family shares a single handler.

use crate::error::ScriptError;
use crate::globals::Slot;

use super::OperandKind::{Float, Int, Var};
use super::{Flow, OpContext, OpcodeSpec, OpcodeTable, Operands};

pub(super) fn register(table: &mut OpcodeTable) {
    table.register(
        &[0x0004, 0x0006, 0x0084, 0x0085, 0x008A, 0x008B],
        OpcodeSpec::new("set_int", &[Var, Int], set_int),
    );
    table.register(
        &[0x0005, 0x0007, 0x0086, 0x0087, 0x0088, 0x0089],
        OpcodeSpec::new("set_float", &[Var, Float], set_float),
    );
    table.register(&[0x0008, 0x000A], OpcodeSpec::new("add_int", &[Var, Int], add_int));
    table.register(
        &[0x0009, 0x000B],
        OpcodeSpec::new("add_float", &[Var, Float], add_float),
    );
    table.register(&[0x000C, 0x000E], OpcodeSpec::new("sub_int", &[Var, Int], sub_int));
    table.register(
        &[0x000D, 0x000F],
        OpcodeSpec::new("sub_float", &[Var, Float], sub_float),
    );
    table.register(&[0x0010, 0x0012], OpcodeSpec::new("mul_int", &[Var, Int], mul_int));
    table.register(
        &[0x0011, 0x0013],
        OpcodeSpec::new("mul_float", &[Var, Float], mul_float),
    );
    table.register(&[0x0014, 0x0016], OpcodeSpec::new("div_int", &[Var, Int], div_int));
    table.register(
        &[0x0015, 0x0017],
        OpcodeSpec::new("div_float", &[Var, Float], div_float),
    );
    table.register(
        &[0x008C, 0x008E, 0x0090, 0x0092],
        OpcodeSpec::new("float_to_int", &[Var, Float], float_to_int),
    );
    table.register(
        &[0x008D, 0x008F, 0x0091, 0x0093],
        OpcodeSpec::new("int_to_float", &[Var, Int], int_to_float),
    );

    table.register(
        &(0x0018..=0x001F).collect::<Vec<u16>>(),
        OpcodeSpec::new("is_int_greater", &[Int, Int], int_greater),
    );
    table.register(
        &(0x0020..=0x0027).collect::<Vec<u16>>(),
        OpcodeSpec::new("is_float_greater", &[Float, Float], float_greater),
    );
    table.register(
        &(0x0028..=0x002F).collect::<Vec<u16>>(),
        OpcodeSpec::new("is_int_greater_or_equal", &[Int, Int], int_greater_or_equal),
    );
    table.register(
        &(0x0030..=0x0037).collect::<Vec<u16>>(),
        OpcodeSpec::new(
            "is_float_greater_or_equal",
            &[Float, Float],
            float_greater_or_equal,
        ),
    );
    table.register(
        &(0x0038..=0x003B).collect::<Vec<u16>>(),
        OpcodeSpec::new("is_int_equal", &[Int, Int], int_equal),
    );
    table.register(
        &(0x0042..=0x0045).collect::<Vec<u16>>(),
        OpcodeSpec::new("is_float_equal", &[Float, Float], float_equal),
    );
}

fn update_int(
    context: &mut OpContext<'_>,
    operands: Operands<'_>,
    op: impl FnOnce(i32, i32) -> i32,
) -> Result<Flow, ScriptError> {
    let slot = operands.slot(0)?;
    let current = context.read(slot)?.as_int();
    context.write(slot, Slot::from_int(op(current, operands.int(1)?)))?;
    Ok(Flow::Continue)
}

fn update_float(
    context: &mut OpContext<'_>,
    operands: Operands<'_>,
    op: impl FnOnce(f32, f32) -> f32,
) -> Result<Flow, ScriptError> {
    let slot = operands.slot(0)?;
    let current = context.read(slot)?.as_float();
    context.write(slot, Slot::from_float(op(current, operands.float(1)?)))?;
    Ok(Flow::Continue)
}

fn set_int(context: &mut OpContext<'_>, operands: Operands<'_>) -> Result<Flow, ScriptError> {
    update_int(context, operands, |_, value| value)
}

fn set_float(context: &mut OpContext<'_>, operands: Operands<'_>) -> Result<Flow, ScriptError> {
    update_float(context, operands, |_, value| value)
}

fn add_int(context: &mut OpContext<'_>, operands: Operands<'_>) -> Result<Flow, ScriptError> {
    update_int(context, operands, i32::wrapping_add)
}

fn add_float(context: &mut OpContext<'_>, operands: Operands<'_>) -> Result<Flow, ScriptError> {
    update_float(context, operands, |a, b| a + b)
}

fn sub_int(context: &mut OpContext<'_>, operands: Operands<'_>) -> Result<Flow, ScriptError> {
    update_int(context, operands, i32::wrapping_sub)
}

fn sub_float(context: &mut OpContext<'_>, operands: Operands<'_>) -> Result<Flow, ScriptError> {
    update_float(context, operands, |a, b| a - b)
}

fn mul_int(context: &mut OpContext<'_>, operands: Operands<'_>) -> Result<Flow, ScriptError> {
    update_int(context, operands, i32::wrapping_mul)
}

fn mul_float(context: &mut OpContext<'_>, operands: Operands<'_>) -> Result<Flow, ScriptError> {
    update_float(context, operands, |a, b| a * b)
}

fn div_int(context: &mut OpContext<'_>, operands: Operands<'_>) -> Result<Flow, ScriptError> {
    if operands.int(1)? == 0 {
        log::warn!(
            "script thread {} ({}) at {:#06x}: integer division by zero",
            context.thread.id,
            context.thread.name(),
            context.instruction_pc
        );
        return update_int(context, operands, |_, _| 0);
    }
    update_int(context, operands, i32::wrapping_div)
}

fn div_float(context: &mut OpContext<'_>, operands: Operands<'_>) -> Result<Flow, ScriptError> {
    update_float(context, operands, |a, b| a / b)
}

fn float_to_int(context: &mut OpContext<'_>, operands: Operands<'_>) -> Result<Flow, ScriptError> {
    let slot = operands.slot(0)?;
    // Truncates toward zero; `as` saturates out-of-range values.
    context.write(slot, Slot::from_int(operands.float(1)? as i32))?;
    Ok(Flow::Continue)
}

fn int_to_float(context: &mut OpContext<'_>, operands: Operands<'_>) -> Result<Flow, ScriptError> {
    let slot = operands.slot(0)?;
    context.write(slot, Slot::from_float(operands.int(1)? as f32))?;
    Ok(Flow::Continue)
}

fn compare_int(
    context: &mut OpContext<'_>,
    operands: Operands<'_>,
    test: impl FnOnce(i32, i32) -> bool,
) -> Result<Flow, ScriptError> {
    let result = test(operands.int(0)?, operands.int(1)?);
    context.set_condition(result);
    Ok(Flow::Continue)
}

fn compare_float(
    context: &mut OpContext<'_>,
    operands: Operands<'_>,
    test: impl FnOnce(f32, f32) -> bool,
) -> Result<Flow, ScriptError> {
    let result = test(operands.float(0)?, operands.float(1)?);
    context.set_condition(result);
    Ok(Flow::Continue)
}

fn int_greater(context: &mut OpContext<'_>, operands: Operands<'_>) -> Result<Flow, ScriptError> {
    compare_int(context, operands, |a, b| a > b)
}

fn float_greater(context: &mut OpContext<'_>, operands: Operands<'_>) -> Result<Flow, ScriptError> {
    compare_float(context, operands, |a, b| a > b)
}

fn int_greater_or_equal(
    context: &mut OpContext<'_>,
    operands: Operands<'_>,
) -> Result<Flow, ScriptError> {
    compare_int(context, operands, |a, b| a >= b)
}

fn float_greater_or_equal(
    context: &mut OpContext<'_>,
    operands: Operands<'_>,
) -> Result<Flow, ScriptError> {
    compare_float(context, operands, |a, b| a >= b)
}

fn int_equal(context: &mut OpContext<'_>, operands: Operands<'_>) -> Result<Flow, ScriptError> {
    compare_int(context, operands, |a, b| a == b)
}

fn float_equal(context: &mut OpContext<'_>, operands: Operands<'_>) -> Result<Flow, ScriptError> {
    compare_float(context, operands, |a, b| a == b)
}
