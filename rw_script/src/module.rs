use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use serde::Serialize;

use crate::error::ScriptError;

/// Bytes that open every compiled script image ("RWSC").
pub const MODULE_MAGIC: [u8; 4] = *b"RWSC";

/// Instruction-set revision understood by this crate.
pub const MODULE_VERSION: u16 = 1;

/// Width of the NUL padded name fields in the header tables.
pub const NAME_LEN: usize = 24;

/// Entrypoint the root thread starts at.
pub const DEFAULT_ENTRYPOINT: &str = "main";

const HEADER_LEN: usize = 4 + 2 + 2 + 4 + 4 + 4 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Script,
    Mission,
}

impl EntryKind {
    pub fn as_byte(self) -> u8 {
        match self {
            EntryKind::Script => 0,
            EntryKind::Mission => 1,
        }
    }

    fn from_byte(value: u8) -> Option<Self> {
        match value {
            0 => Some(EntryKind::Script),
            1 => Some(EntryKind::Mission),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entrypoint {
    pub name: String,
    pub kind: EntryKind,
    pub offset: u32,
}

/// A loaded compiled script. Never mutated once constructed.
#[derive(Debug, Clone)]
pub struct BytecodeModule {
    code: Vec<u8>,
    entrypoints: Vec<Entrypoint>,
    by_name: BTreeMap<String, usize>,
    models: Vec<String>,
    global_slot_count: usize,
}

impl BytecodeModule {
    /// Parses a compiled script image, validating the header and tables.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ScriptError> {
        if bytes.len() < HEADER_LEN {
            return Err(invalid("image is too small to contain a header"));
        }
        let mut cursor = Cursor::new(bytes);

        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic).map_err(truncated("magic"))?;
        if magic != MODULE_MAGIC {
            return Err(invalid("missing RWSC signature"));
        }
        let version = cursor
            .read_u16::<LittleEndian>()
            .map_err(truncated("version"))?;
        if version != MODULE_VERSION {
            return Err(invalid(format!("unsupported version {version}")));
        }
        // Reserved flags.
        cursor
            .read_u16::<LittleEndian>()
            .map_err(truncated("flags"))?;

        let global_slot_count = read_count(&mut cursor, "global slot count")?;
        if global_slot_count > u16::MAX as usize + 1 {
            return Err(invalid(format!(
                "{global_slot_count} global slots cannot be addressed by 16-bit operands"
            )));
        }
        let model_count = read_count(&mut cursor, "model count")?;
        let entry_count = read_count(&mut cursor, "entrypoint count")?;
        let code_len = read_count(&mut cursor, "code length")?;

        let tables_len = model_count
            .checked_mul(NAME_LEN)
            .and_then(|models| {
                entry_count
                    .checked_mul(NAME_LEN + 1 + 4)
                    .and_then(|entries| models.checked_add(entries))
            })
            .and_then(|tables| tables.checked_add(code_len))
            .ok_or_else(|| invalid("table sizes overflow"))?;
        let remaining = bytes.len() - HEADER_LEN;
        if remaining < tables_len {
            return Err(invalid("image truncated before end of code"));
        }
        if remaining > tables_len {
            return Err(invalid(format!(
                "{} trailing bytes after code",
                remaining - tables_len
            )));
        }

        let mut models = Vec::with_capacity(model_count);
        for index in 0..model_count {
            let name = read_name(&mut cursor)
                .map_err(|_| invalid(format!("reading model name {index}")))?;
            models.push(name);
        }

        let mut entrypoints = Vec::with_capacity(entry_count);
        let mut by_name = BTreeMap::new();
        for index in 0..entry_count {
            let name = read_name(&mut cursor)
                .map_err(|_| invalid(format!("reading entrypoint name {index}")))?;
            if name.is_empty() {
                return Err(invalid(format!("entrypoint {index} has an empty name")));
            }
            let kind_raw = cursor.read_u8().map_err(truncated("entrypoint kind"))?;
            let kind = EntryKind::from_byte(kind_raw).ok_or_else(|| {
                invalid(format!("entrypoint {name} has unknown kind {kind_raw}"))
            })?;
            let offset = cursor
                .read_u32::<LittleEndian>()
                .map_err(truncated("entrypoint offset"))?;
            if offset as usize >= code_len {
                return Err(invalid(format!(
                    "entrypoint {name} offset {offset} lies outside {code_len} bytes of code"
                )));
            }
            if by_name.insert(name.clone(), entrypoints.len()).is_some() {
                return Err(invalid(format!("duplicate entrypoint {name}")));
            }
            entrypoints.push(Entrypoint { name, kind, offset });
        }

        let start = cursor.position() as usize;
        let code = bytes[start..start + code_len].to_vec();

        Ok(BytecodeModule {
            code,
            entrypoints,
            by_name,
            models,
            global_slot_count,
        })
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn code_len(&self) -> usize {
        self.code.len()
    }

    pub fn contains(&self, offset: u32) -> bool {
        (offset as usize) < self.code.len()
    }

    pub fn global_slot_count(&self) -> usize {
        self.global_slot_count
    }

    pub fn entrypoints(&self) -> &[Entrypoint] {
        &self.entrypoints
    }

    pub fn entrypoint(&self, name: &str) -> Option<&Entrypoint> {
        self.by_name.get(name).map(|&index| &self.entrypoints[index])
    }

    pub fn default_entrypoint(&self) -> Option<&Entrypoint> {
        self.entrypoint(DEFAULT_ENTRYPOINT)
    }

    /// Mission entrypoints in declaration order; `launch_mission` indexes
    /// into this list.
    pub fn missions(&self) -> impl Iterator<Item = &Entrypoint> {
        self.entrypoints
            .iter()
            .filter(|entry| entry.kind == EntryKind::Mission)
    }

    pub fn mission(&self, index: usize) -> Option<&Entrypoint> {
        self.missions().nth(index)
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn model_name(&self, index: usize) -> Option<&str> {
        self.models.get(index).map(String::as_str)
    }
}

fn invalid(message: impl Into<String>) -> ScriptError {
    ScriptError::InvalidModule(message.into())
}

fn truncated(what: &'static str) -> impl Fn(std::io::Error) -> ScriptError {
    move |_| invalid(format!("truncated while reading {what}"))
}

fn read_count(cursor: &mut Cursor<&[u8]>, what: &'static str) -> Result<usize, ScriptError> {
    let value = cursor
        .read_u32::<LittleEndian>()
        .map_err(truncated(what))?;
    usize::try_from(value).map_err(|_| invalid(format!("{what} does not fit usize")))
}

fn read_name(cursor: &mut Cursor<&[u8]>) -> std::io::Result<String> {
    let mut raw = [0u8; NAME_LEN];
    cursor.read_exact(&mut raw)?;
    let end = raw.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
    Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{ModuleBuilder, ScriptBuilder};

    fn sample() -> Vec<u8> {
        let mut main = ScriptBuilder::new();
        main.terminate();
        let mut mission = ScriptBuilder::new();
        mission.terminate();
        let mut builder = ModuleBuilder::new(8);
        builder.model("cheetah");
        builder.script("main", main);
        builder.mission("intro", mission);
        builder.build().expect("sample module assembles")
    }

    #[test]
    fn parses_header_and_tables() {
        let module = BytecodeModule::from_bytes(&sample()).expect("module parses");
        assert_eq!(module.global_slot_count(), 8);
        assert_eq!(module.models(), &[String::new(), "cheetah".to_string()]);
        assert_eq!(module.entrypoints().len(), 2);
        let main = module.default_entrypoint().expect("main entry");
        assert_eq!(main.offset, 0);
        let intro = module.mission(0).expect("first mission");
        assert_eq!(intro.name, "intro");
        assert_eq!(intro.kind, EntryKind::Mission);
        assert!(module.contains(intro.offset));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = sample();
        bytes[0] = b'X';
        let err = BytecodeModule::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, ScriptError::InvalidModule(_)));
    }

    #[test]
    fn rejects_truncated_and_padded_images() {
        let bytes = sample();
        let err = BytecodeModule::from_bytes(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, ScriptError::InvalidModule(ref m) if m.contains("truncated")));

        let mut padded = bytes.clone();
        padded.push(0);
        let err = BytecodeModule::from_bytes(&padded).unwrap_err();
        assert!(matches!(err, ScriptError::InvalidModule(ref m) if m.contains("trailing")));

        let err = BytecodeModule::from_bytes(&bytes[..10]).unwrap_err();
        assert!(matches!(err, ScriptError::InvalidModule(_)));
    }

    #[test]
    fn rejects_entrypoint_outside_code() {
        let mut bytes = sample();
        // Two model names, then the first entry's name and kind byte.
        let offset_pos = HEADER_LEN + 2 * NAME_LEN + NAME_LEN + 1;
        bytes[offset_pos..offset_pos + 4].copy_from_slice(&4096u32.to_le_bytes());
        let err = BytecodeModule::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, ScriptError::InvalidModule(ref m) if m.contains("outside")));
    }
}
