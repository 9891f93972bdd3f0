use crate::error::{ScriptError, Space};
use crate::globals::Slot;

use super::OperandKind::{Int, Label, Text};
use super::{Flow, OpContext, OpcodeSpec, OpcodeTable, Operand, Operands, UNNAMED_THREAD};

pub(super) fn register(table: &mut OpcodeTable) {
    table.register(&[0x0000], OpcodeSpec::new("nop", &[], nop));
    table.register(&[0x0001], OpcodeSpec::new("wait", &[Int], wait));
    table.register(&[0x0002], OpcodeSpec::new("goto", &[Label], goto));
    table.register(&[0x004C], OpcodeSpec::new("goto_if_true", &[Label], goto_if_true));
    table.register(&[0x004D], OpcodeSpec::new("goto_if_false", &[Label], goto_if_false));
    table.register(
        &[0x004E],
        OpcodeSpec::new("terminate_this_script", &[], terminate),
    );
    table.register(
        &[0x004F],
        OpcodeSpec::variadic("start_new_script", &[Label], start_new_script),
    );
    table.register(&[0x0050], OpcodeSpec::new("gosub", &[Label], gosub));
    table.register(&[0x0051], OpcodeSpec::new("return", &[], ret));
    table.register(&[0x00D6], OpcodeSpec::new("andor", &[Int], andor));
    table.register(&[0x03A4], OpcodeSpec::new("script_name", &[Text], script_name));
    table.register(
        &[0x0417],
        OpcodeSpec::new("launch_mission", &[Int], launch_mission),
    );
    table.register(
        &[0x0459],
        OpcodeSpec::new(
            "terminate_all_scripts_with_this_name",
            &[Text],
            terminate_named,
        ),
    );
}

fn nop(_: &mut OpContext<'_>, _: Operands<'_>) -> Result<Flow, ScriptError> {
    Ok(Flow::Continue)
}

fn wait(_: &mut OpContext<'_>, operands: Operands<'_>) -> Result<Flow, ScriptError> {
    match operands.int(0)? {
        ms if ms <= 0 => Ok(Flow::Yield),
        ms => Ok(Flow::Wait(ms as u32)),
    }
}

fn goto(context: &mut OpContext<'_>, operands: Operands<'_>) -> Result<Flow, ScriptError> {
    context.jump(operands.int(0)?)?;
    Ok(Flow::Continue)
}

fn goto_if_true(context: &mut OpContext<'_>, operands: Operands<'_>) -> Result<Flow, ScriptError> {
    if context.condition_result() {
        context.jump(operands.int(0)?)?;
    }
    Ok(Flow::Continue)
}

fn goto_if_false(context: &mut OpContext<'_>, operands: Operands<'_>) -> Result<Flow, ScriptError> {
    if !context.condition_result() {
        context.jump(operands.int(0)?)?;
    }
    Ok(Flow::Continue)
}

fn terminate(context: &mut OpContext<'_>, _: Operands<'_>) -> Result<Flow, ScriptError> {
    log::debug!(
        "script thread {} ({}) terminated itself",
        context.thread.id,
        context.thread.name()
    );
    Ok(Flow::Terminate)
}

fn start_new_script(
    context: &mut OpContext<'_>,
    operands: Operands<'_>,
) -> Result<Flow, ScriptError> {
    let target = context.resolve_label(operands.int(0)?)?;
    let mut args = Vec::with_capacity(operands.len().saturating_sub(1));
    for (index, value) in operands.values().iter().enumerate().skip(1) {
        let slot = match value {
            Operand::Int(v) => Slot::from_int(*v),
            Operand::Float(v) => Slot::from_float(*v),
            Operand::Slot(slot) => context.read(*slot)?,
            Operand::Text(_) => {
                return Err(ScriptError::OperandMismatch {
                    opcode: operands.opcode(),
                    index,
                    expected: "a numeric argument",
                })
            }
        };
        args.push(slot);
    }
    let base = context.thread.base_address;
    let is_mission = context.thread.is_mission;
    context.spawn(target, base, UNNAMED_THREAD, is_mission, &args)?;
    Ok(Flow::Continue)
}

fn gosub(context: &mut OpContext<'_>, operands: Operands<'_>) -> Result<Flow, ScriptError> {
    context.call(operands.int(0)?)?;
    Ok(Flow::Continue)
}

fn ret(context: &mut OpContext<'_>, _: Operands<'_>) -> Result<Flow, ScriptError> {
    context.ret()?;
    Ok(Flow::Continue)
}

fn andor(context: &mut OpContext<'_>, operands: Operands<'_>) -> Result<Flow, ScriptError> {
    let max = context.config.max_condition_chain;
    context.thread.open_chain(operands.int(0)?, max)?;
    Ok(Flow::Continue)
}

fn script_name(context: &mut OpContext<'_>, operands: Operands<'_>) -> Result<Flow, ScriptError> {
    context.thread.set_name(operands.text(0)?);
    Ok(Flow::Continue)
}

fn launch_mission(
    context: &mut OpContext<'_>,
    operands: Operands<'_>,
) -> Result<Flow, ScriptError> {
    let index = operands.int(0)?;
    let module = context.module;
    let entry = usize::try_from(index)
        .ok()
        .and_then(|index| module.mission(index))
        .ok_or_else(|| {
            ScriptError::out_of_range(Space::Mission, index, module.missions().count())
        })?;
    context.spawn(entry.offset, entry.offset, &entry.name, true, &[])?;
    Ok(Flow::Continue)
}

fn terminate_named(
    context: &mut OpContext<'_>,
    operands: Operands<'_>,
) -> Result<Flow, ScriptError> {
    context.kill_named(operands.text(0)?);
    Ok(Flow::Continue)
}
