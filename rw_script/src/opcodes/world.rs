//! Opcodes that reach into the engine through [`ScriptHost`].
//!
//! A failed host call is logged and the script carries on: output variables
//! keep their previous value and queries report false.

use crate::error::ScriptError;
use crate::globals::Slot;
use crate::host::MessageKind;

use super::OperandKind::{Float, Int, Text, Var};
use super::{Flow, OpContext, OpcodeSpec, OpcodeTable, Operands};

pub(super) fn register(table: &mut OpcodeTable) {
    table.register(
        &[0x00A5],
        OpcodeSpec::new("create_car", &[Int, Float, Float, Float, Var], create_car),
    );
    table.register(&[0x00A6], OpcodeSpec::new("delete_car", &[Int], delete_car));
    table.register(&[0x0119], OpcodeSpec::new("is_car_dead", &[Int], is_car_dead));
    table.register(
        &[0x009A],
        OpcodeSpec::new(
            "create_char",
            &[Int, Int, Float, Float, Float, Var],
            create_char,
        ),
    );
    table.register(&[0x009B], OpcodeSpec::new("delete_char", &[Int], delete_char));
    table.register(&[0x0118], OpcodeSpec::new("is_char_dead", &[Int], is_char_dead));
    table.register(
        &[0x01B4],
        OpcodeSpec::new("set_player_control", &[Int, Int], set_player_control),
    );
    table.register(
        &[0x00BF],
        OpcodeSpec::new("get_time_of_day", &[Var, Var], get_time_of_day),
    );
    table.register(
        &[0x00C0],
        OpcodeSpec::new("set_time_of_day", &[Int, Int], set_time_of_day),
    );
    table.register(
        &[0x00BA],
        OpcodeSpec::new("print_big", &[Text, Int, Int], print_big),
    );
    table.register(
        &[0x00BC],
        OpcodeSpec::new("print_now", &[Text, Int, Int], print_now),
    );
    table.register(&[0x016A], OpcodeSpec::new("do_fade", &[Int, Int], do_fade));
    table.register(
        &[0x015F],
        OpcodeSpec::new(
            "set_fixed_camera_position",
            &[Float, Float, Float, Float, Float, Float],
            set_fixed_camera,
        ),
    );
    table.register(
        &[0x0373],
        OpcodeSpec::new("set_camera_behind_player", &[], camera_behind_player),
    );
}

fn create_car(context: &mut OpContext<'_>, operands: Operands<'_>) -> Result<Flow, ScriptError> {
    let model = context.model(operands.int(0)?)?;
    let position = operands.position(1)?;
    let out = operands.slot(4)?;
    let result = context.host.spawn_vehicle(model, position);
    if let Some(handle) = context.host_result(result) {
        context.write(out, Slot::from_int(handle))?;
    }
    Ok(Flow::Continue)
}

fn delete_car(context: &mut OpContext<'_>, operands: Operands<'_>) -> Result<Flow, ScriptError> {
    let result = context.host.remove_vehicle(operands.int(0)?);
    context.host_result(result);
    Ok(Flow::Continue)
}

fn is_car_dead(context: &mut OpContext<'_>, operands: Operands<'_>) -> Result<Flow, ScriptError> {
    let result = context.host.is_vehicle_wrecked(operands.int(0)?);
    let wrecked = context.host_result(result).unwrap_or(false);
    context.set_condition(wrecked);
    Ok(Flow::Continue)
}

fn create_char(context: &mut OpContext<'_>, operands: Operands<'_>) -> Result<Flow, ScriptError> {
    let ped_type = operands.int(0)?;
    let model = context.model(operands.int(1)?)?;
    let position = operands.position(2)?;
    let out = operands.slot(5)?;
    let result = context.host.spawn_character(ped_type, model, position);
    if let Some(handle) = context.host_result(result) {
        context.write(out, Slot::from_int(handle))?;
    }
    Ok(Flow::Continue)
}

fn delete_char(context: &mut OpContext<'_>, operands: Operands<'_>) -> Result<Flow, ScriptError> {
    let result = context.host.remove_character(operands.int(0)?);
    context.host_result(result);
    Ok(Flow::Continue)
}

fn is_char_dead(context: &mut OpContext<'_>, operands: Operands<'_>) -> Result<Flow, ScriptError> {
    let result = context.host.is_character_dead(operands.int(0)?);
    let dead = context.host_result(result).unwrap_or(false);
    context.set_condition(dead);
    Ok(Flow::Continue)
}

fn set_player_control(
    context: &mut OpContext<'_>,
    operands: Operands<'_>,
) -> Result<Flow, ScriptError> {
    let result = context
        .host
        .set_player_control(operands.int(0)?, operands.int(1)? != 0);
    context.host_result(result);
    Ok(Flow::Continue)
}

fn get_time_of_day(
    context: &mut OpContext<'_>,
    operands: Operands<'_>,
) -> Result<Flow, ScriptError> {
    let (hour_slot, minute_slot) = (operands.slot(0)?, operands.slot(1)?);
    let result = context.host.time_of_day();
    if let Some((hour, minute)) = context.host_result(result) {
        context.write(hour_slot, Slot::from_int(hour))?;
        context.write(minute_slot, Slot::from_int(minute))?;
    }
    Ok(Flow::Continue)
}

fn set_time_of_day(
    context: &mut OpContext<'_>,
    operands: Operands<'_>,
) -> Result<Flow, ScriptError> {
    let result = context
        .host
        .set_time_of_day(operands.int(0)?, operands.int(1)?);
    context.host_result(result);
    Ok(Flow::Continue)
}

fn print(
    context: &mut OpContext<'_>,
    operands: Operands<'_>,
    kind: MessageKind,
) -> Result<Flow, ScriptError> {
    let result = context.host.display_message(
        kind,
        operands.text(0)?,
        operands.int(1)?,
        operands.int(2)?,
    );
    context.host_result(result);
    Ok(Flow::Continue)
}

fn print_big(context: &mut OpContext<'_>, operands: Operands<'_>) -> Result<Flow, ScriptError> {
    print(context, operands, MessageKind::Big)
}

fn print_now(context: &mut OpContext<'_>, operands: Operands<'_>) -> Result<Flow, ScriptError> {
    print(context, operands, MessageKind::Now)
}

fn do_fade(context: &mut OpContext<'_>, operands: Operands<'_>) -> Result<Flow, ScriptError> {
    // Second operand: 1 fades in, 0 fades out.
    let result = context
        .host
        .fade_screen(operands.int(0)?, operands.int(1)? != 0);
    context.host_result(result);
    Ok(Flow::Continue)
}

fn set_fixed_camera(
    context: &mut OpContext<'_>,
    operands: Operands<'_>,
) -> Result<Flow, ScriptError> {
    let result = context
        .host
        .set_fixed_camera(operands.position(0)?, operands.position(3)?);
    context.host_result(result);
    Ok(Flow::Continue)
}

fn camera_behind_player(
    context: &mut OpContext<'_>,
    _: Operands<'_>,
) -> Result<Flow, ScriptError> {
    let result = context.host.restore_camera_behind_player();
    context.host_result(result);
    Ok(Flow::Continue)
}
