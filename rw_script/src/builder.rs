//! A small assembler for the module and instruction encodings.
//!
//! Tooling and tests use it to produce bytecode without a compiler. Labels
//! are patched when a script is placed into a module, since absolute targets
//! depend on where the script ends up.

use byteorder::{LittleEndian, WriteBytesExt};

use crate::error::ScriptError;
use crate::module::{BytecodeModule, EntryKind, MODULE_MAGIC, MODULE_VERSION, NAME_LEN};
use crate::opcodes::{
    NEGATE_FLAG, TAG_END, TAG_FLOAT, TAG_GLOBAL, TAG_INT16, TAG_INT32, TAG_INT8, TAG_LOCAL,
    TEXT_LEN, TEXT_THRESHOLD,
};

/// Forward-declarable jump target inside one [`ScriptBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// One encoded operand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Arg<'a> {
    Int(i32),
    Int8(i8),
    Int16(i16),
    Float(f32),
    Global(u16),
    Local(u16),
    Text(&'a str),
    Label(Label),
    /// Terminates a variadic argument list.
    End,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptBuilder {
    code: Vec<u8>,
    labels: Vec<Option<usize>>,
    fixups: Vec<(usize, Label)>,
    relative: bool,
    error: Option<String>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder for mission code: labels are emitted as negative offsets
    /// from the script's own start.
    pub fn relative() -> Self {
        ScriptBuilder {
            relative: true,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Points `label` at the next instruction.
    pub fn bind(&mut self, label: Label) -> &mut Self {
        let position = self.code.len();
        let problem = match self.labels.get_mut(label.0) {
            Some(slot) if slot.is_none() => {
                *slot = Some(position);
                None
            }
            Some(_) => Some(format!("label {} bound twice", label.0)),
            None => Some(format!("label {} belongs to another builder", label.0)),
        };
        if let Some(message) = problem {
            self.fail(message);
        }
        self
    }

    pub fn op(&mut self, opcode: u16, args: &[Arg<'_>]) -> &mut Self {
        self.emit(opcode, args)
    }

    /// Emits `opcode` with the negate bit set.
    pub fn op_not(&mut self, opcode: u16, args: &[Arg<'_>]) -> &mut Self {
        self.emit(opcode | NEGATE_FLAG, args)
    }

    pub fn wait(&mut self, ms: i32) -> &mut Self {
        self.op(0x0001, &[Arg::Int(ms)])
    }

    pub fn goto(&mut self, label: Label) -> &mut Self {
        self.op(0x0002, &[Arg::Label(label)])
    }

    pub fn goto_if_true(&mut self, label: Label) -> &mut Self {
        self.op(0x004C, &[Arg::Label(label)])
    }

    pub fn goto_if_false(&mut self, label: Label) -> &mut Self {
        self.op(0x004D, &[Arg::Label(label)])
    }

    pub fn terminate(&mut self) -> &mut Self {
        self.op(0x004E, &[])
    }

    /// `start_new_script` with numeric arguments copied into the new
    /// thread's locals.
    pub fn start_new_script(&mut self, label: Label, args: &[Arg<'_>]) -> &mut Self {
        let mut all = Vec::with_capacity(args.len() + 2);
        all.push(Arg::Label(label));
        all.extend_from_slice(args);
        all.push(Arg::End);
        self.op(0x004F, &all)
    }

    pub fn gosub(&mut self, label: Label) -> &mut Self {
        self.op(0x0050, &[Arg::Label(label)])
    }

    pub fn ret(&mut self) -> &mut Self {
        self.op(0x0051, &[])
    }

    pub fn andor(&mut self, operand: i32) -> &mut Self {
        self.op(0x00D6, &[Arg::Int(operand)])
    }

    pub fn script_name(&mut self, name: &str) -> &mut Self {
        self.op(0x03A4, &[Arg::Text(name)])
    }

    pub fn launch_mission(&mut self, index: i32) -> &mut Self {
        self.op(0x0417, &[Arg::Int(index)])
    }

    pub fn set_global_int(&mut self, slot: u16, value: i32) -> &mut Self {
        self.op(0x0004, &[Arg::Global(slot), Arg::Int(value)])
    }

    pub fn set_global_float(&mut self, slot: u16, value: f32) -> &mut Self {
        self.op(0x0005, &[Arg::Global(slot), Arg::Float(value)])
    }

    pub fn add_global_int(&mut self, slot: u16, value: i32) -> &mut Self {
        self.op(0x0008, &[Arg::Global(slot), Arg::Int(value)])
    }

    pub fn set_local_int(&mut self, slot: u16, value: i32) -> &mut Self {
        self.op(0x0006, &[Arg::Local(slot), Arg::Int(value)])
    }

    /// Resolves labels for a script placed at `base` and returns its bytes.
    pub fn finish(&self, base: u32) -> Result<Vec<u8>, ScriptError> {
        if let Some(message) = &self.error {
            return Err(ScriptError::InvalidModule(message.clone()));
        }
        let mut code = self.code.clone();
        for &(position, label) in &self.fixups {
            let target = self
                .labels
                .get(label.0)
                .copied()
                .flatten()
                .ok_or_else(|| ScriptError::InvalidModule(format!("label {} never bound", label.0)))?;
            let encoded = self.encode_label(base, target)?;
            code[position..position + 4].copy_from_slice(&encoded.to_le_bytes());
        }
        Ok(code)
    }

    fn encode_label(&self, base: u32, target: usize) -> Result<i32, ScriptError> {
        let target = u32::try_from(target)
            .ok()
            .and_then(|target| i32::try_from(target).ok())
            .ok_or_else(|| ScriptError::InvalidModule("label offset overflows".into()))?;
        // Offset zero has no negative form; address it absolutely.
        if self.relative && target > 0 {
            return Ok(-target);
        }
        base.checked_add(target as u32)
            .and_then(|absolute| i32::try_from(absolute).ok())
            .ok_or_else(|| ScriptError::InvalidModule("label offset overflows".into()))
    }

    fn fail(&mut self, message: String) {
        self.error.get_or_insert(message);
    }

    fn emit(&mut self, opcode: u16, args: &[Arg<'_>]) -> &mut Self {
        self.code.extend_from_slice(&opcode.to_le_bytes());
        for arg in args {
            match *arg {
                Arg::Int(value) => {
                    self.code.push(TAG_INT32);
                    self.code.extend_from_slice(&value.to_le_bytes());
                }
                Arg::Int8(value) => {
                    self.code.push(TAG_INT8);
                    self.code.push(value as u8);
                }
                Arg::Int16(value) => {
                    self.code.push(TAG_INT16);
                    self.code.extend_from_slice(&value.to_le_bytes());
                }
                Arg::Float(value) => {
                    self.code.push(TAG_FLOAT);
                    self.code.extend_from_slice(&value.to_le_bytes());
                }
                Arg::Global(index) => {
                    self.code.push(TAG_GLOBAL);
                    self.code.extend_from_slice(&index.to_le_bytes());
                }
                Arg::Local(index) => {
                    self.code.push(TAG_LOCAL);
                    self.code.extend_from_slice(&index.to_le_bytes());
                }
                Arg::Text(text) => self.emit_text(text),
                Arg::Label(label) => {
                    self.code.push(TAG_INT32);
                    self.fixups.push((self.code.len(), label));
                    self.code.extend_from_slice(&[0; 4]);
                }
                Arg::End => self.code.push(TAG_END),
            }
        }
        self
    }

    fn emit_text(&mut self, text: &str) {
        let bytes = text.as_bytes();
        match bytes.first() {
            Some(&first) if first >= TEXT_THRESHOLD && bytes.len() <= TEXT_LEN => {
                let mut field = [0u8; TEXT_LEN];
                field[..bytes.len()].copy_from_slice(bytes);
                self.code.extend_from_slice(&field);
            }
            _ => {
                self.fail(format!("text operand {text:?} cannot be encoded inline"));
                self.code.extend_from_slice(&[0; TEXT_LEN]);
            }
        }
    }
}

struct PendingEntry {
    name: String,
    kind: EntryKind,
    script: ScriptBuilder,
}

/// Lays scripts out back to back and writes the module header.
#[derive(Default)]
pub struct ModuleBuilder {
    global_slot_count: u32,
    models: Vec<String>,
    entries: Vec<PendingEntry>,
}

impl ModuleBuilder {
    pub fn new(global_slot_count: u32) -> Self {
        ModuleBuilder {
            global_slot_count,
            ..Self::default()
        }
    }

    /// Adds a model name and returns the negative id scripts use for it.
    /// Index zero of the table is reserved, as in compiled images.
    pub fn model(&mut self, name: &str) -> i32 {
        if self.models.is_empty() {
            self.models.push(String::new());
        }
        self.models.push(name.to_string());
        -((self.models.len() - 1) as i32)
    }

    pub fn script(&mut self, name: &str, script: ScriptBuilder) -> &mut Self {
        self.entry(name, EntryKind::Script, script)
    }

    pub fn mission(&mut self, name: &str, script: ScriptBuilder) -> &mut Self {
        self.entry(name, EntryKind::Mission, script)
    }

    fn entry(&mut self, name: &str, kind: EntryKind, script: ScriptBuilder) -> &mut Self {
        self.entries.push(PendingEntry {
            name: name.to_string(),
            kind,
            script,
        });
        self
    }

    pub fn build(&self) -> Result<Vec<u8>, ScriptError> {
        let mut code = Vec::new();
        let mut offsets = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let base = u32::try_from(code.len())
                .map_err(|_| ScriptError::InvalidModule("code section too large".into()))?;
            offsets.push(base);
            code.extend(entry.script.finish(base)?);
        }

        let mut out = Vec::new();
        self.write_tables(&mut out, code.len() as u32, &offsets)
            .map_err(|err| ScriptError::InvalidModule(err.to_string()))?;
        out.extend_from_slice(&code);
        Ok(out)
    }

    fn write_tables(&self, out: &mut Vec<u8>, code_len: u32, offsets: &[u32]) -> std::io::Result<()> {
        out.extend_from_slice(&MODULE_MAGIC);
        out.write_u16::<LittleEndian>(MODULE_VERSION)?;
        out.write_u16::<LittleEndian>(0)?;
        out.write_u32::<LittleEndian>(self.global_slot_count)?;
        out.write_u32::<LittleEndian>(self.models.len() as u32)?;
        out.write_u32::<LittleEndian>(self.entries.len() as u32)?;
        out.write_u32::<LittleEndian>(code_len)?;
        for model in &self.models {
            write_name(out, model)?;
        }
        for (entry, offset) in self.entries.iter().zip(offsets) {
            write_name(out, &entry.name)?;
            out.write_u8(entry.kind.as_byte())?;
            out.write_u32::<LittleEndian>(*offset)?;
        }
        Ok(())
    }

    pub fn build_module(&self) -> Result<BytecodeModule, ScriptError> {
        BytecodeModule::from_bytes(&self.build()?)
    }
}

fn write_name(out: &mut Vec<u8>, name: &str) -> std::io::Result<()> {
    if name.len() > NAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("name {name:?} longer than {NAME_LEN} bytes"),
        ));
    }
    let mut field = [0u8; NAME_LEN];
    field[..name.len()].copy_from_slice(name.as_bytes());
    out.extend_from_slice(&field);
    Ok(())
}
