use serde::Serialize;

use crate::error::{ScriptError, Space};

/// One untyped 32-bit storage word. The opcode touching it decides whether it
/// reads as an integer, a float, or a 16-bit short.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Slot(pub u32);

impl Slot {
    pub const ZERO: Slot = Slot(0);

    pub fn from_int(value: i32) -> Self {
        Slot(value as u32)
    }

    pub fn from_float(value: f32) -> Self {
        Slot(value.to_bits())
    }

    pub fn from_short(value: i16) -> Self {
        Slot(value as i32 as u32)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn as_int(self) -> i32 {
        self.0 as i32
    }

    pub fn as_float(self) -> f32 {
        f32::from_bits(self.0)
    }

    pub fn as_short(self) -> i16 {
        self.0 as u16 as i16
    }
}

/// Typed value written through the public accessors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScriptValue {
    Int(i32),
    Float(f32),
    Short(i16),
}

impl From<ScriptValue> for Slot {
    fn from(value: ScriptValue) -> Self {
        match value {
            ScriptValue::Int(v) => Slot::from_int(v),
            ScriptValue::Float(v) => Slot::from_float(v),
            ScriptValue::Short(v) => Slot::from_short(v),
        }
    }
}

impl From<i32> for Slot {
    fn from(value: i32) -> Self {
        Slot::from_int(value)
    }
}

impl From<f32> for Slot {
    fn from(value: f32) -> Self {
        Slot::from_float(value)
    }
}

impl From<i16> for Slot {
    fn from(value: i16) -> Self {
        Slot::from_short(value)
    }
}

impl From<i32> for ScriptValue {
    fn from(value: i32) -> Self {
        ScriptValue::Int(value)
    }
}

impl From<f32> for ScriptValue {
    fn from(value: f32) -> Self {
        ScriptValue::Float(value)
    }
}

impl From<i16> for ScriptValue {
    fn from(value: i16) -> Self {
        ScriptValue::Short(value)
    }
}

/// Flat, fixed-size variable space shared by every script thread.
///
/// Mission logic and saves address globals by absolute slot index, so the
/// store is a single array that never grows or shrinks after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalStore {
    slots: Box<[Slot]>,
}

impl GlobalStore {
    pub fn new(slot_count: usize) -> Self {
        GlobalStore {
            slots: vec![Slot::ZERO; slot_count].into_boxed_slice(),
        }
    }

    pub(crate) fn from_slots(slots: Vec<Slot>) -> Self {
        GlobalStore {
            slots: slots.into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, offset: usize) -> Result<Slot, ScriptError> {
        self.slots
            .get(offset)
            .copied()
            .ok_or_else(|| self.out_of_range(offset))
    }

    pub fn set(&mut self, offset: usize, value: impl Into<Slot>) -> Result<(), ScriptError> {
        let limit = self.slots.len();
        match self.slots.get_mut(offset) {
            Some(slot) => {
                *slot = value.into();
                Ok(())
            }
            None => Err(out_of_range(offset, limit)),
        }
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub(crate) fn reset(&mut self) {
        self.slots.fill(Slot::ZERO);
    }

    fn out_of_range(&self, offset: usize) -> ScriptError {
        out_of_range(offset, self.slots.len())
    }
}

fn out_of_range(offset: usize, limit: usize) -> ScriptError {
    ScriptError::OutOfRange {
        space: Space::Global,
        index: i64::try_from(offset).unwrap_or(i64::MAX),
        limit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_views_share_bits() {
        let slot = Slot::from_float(2.5);
        assert_eq!(slot.as_float(), 2.5);
        assert_eq!(slot.raw(), 2.5f32.to_bits());

        let short = Slot::from_short(-2);
        assert_eq!(short.as_short(), -2);
        assert_eq!(short.as_int(), -2);

        assert_eq!(Slot::from_int(70_000).as_short(), 70_000i32 as i16);
    }

    #[test]
    fn store_is_bounds_checked() {
        let mut store = GlobalStore::new(4);
        store.set(3, ScriptValue::Int(7)).expect("last slot writable");
        assert_eq!(store.get(3).expect("last slot readable").as_int(), 7);

        let err = store.get(4).unwrap_err();
        assert_eq!(
            err,
            ScriptError::OutOfRange {
                space: Space::Global,
                index: 4,
                limit: 4
            }
        );
        assert!(store.set(4, ScriptValue::Float(1.0)).is_err());
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn plain_numbers_store_directly() {
        let mut store = GlobalStore::new(3);
        store.set(0, 12).expect("int store");
        store.set(1, 0.75f32).expect("float store");
        store.set(2, -3i16).expect("short store");
        assert_eq!(store.get(0).expect("slot 0").as_int(), 12);
        assert_eq!(store.get(1).expect("slot 1").as_float(), 0.75);
        assert_eq!(store.get(2).expect("slot 2").as_short(), -3);
        assert_eq!(Slot::from(-3i16), Slot::from(ScriptValue::Short(-3)));
    }

    #[test]
    fn reset_zeroes_without_resizing() {
        let mut store = GlobalStore::new(2);
        store.set(0, Slot(9)).expect("slot 0 writable");
        store.reset();
        assert_eq!(store.slots(), &[Slot::ZERO, Slot::ZERO]);
    }
}
