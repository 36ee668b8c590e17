//! The raw calling convention seen by host functions.

use sprig_memory::{Offset, SegmentedMemory};
use sprig_types::{FuncType, Value, ValueType};

use crate::error::Trap;

/// A host function's view of its frame and of guest memory.
///
/// Result `i` lives at slot `2 * i` and argument `j` at slot
/// `2 * (num_results + j)`, each slot pair holding one value whatever its
/// width.
pub struct HostContext<'a> {
    heap: &'a mut SegmentedMemory,
    frame: u32,
    frame_slots: u32,
    memory: Option<&'a mut SegmentedMemory>,
    ty: &'a FuncType,
}

impl<'a> HostContext<'a> {
    pub(crate) fn new(
        heap: &'a mut SegmentedMemory,
        frame: u32,
        frame_slots: u32,
        memory: Option<&'a mut SegmentedMemory>,
        ty: &'a FuncType,
    ) -> Self {
        Self {
            heap,
            frame,
            frame_slots,
            memory,
            ty,
        }
    }

    /// The signature the function was linked with.
    pub fn signature(&self) -> &FuncType {
        self.ty
    }

    pub fn num_args(&self) -> usize {
        self.ty.num_params()
    }

    pub fn arg(&mut self, index: usize) -> Result<Value, Trap> {
        let ty = *self
            .ty
            .params()
            .get(index)
            .ok_or_else(|| Trap::Host(format!("argument {index} out of range")))?;
        let slot = 2 * (self.ty.num_results() + index);
        self.read_slot(slot, ty)
    }

    pub fn arg_i32(&mut self, index: usize) -> Result<i32, Trap> {
        self.arg(index)?
            .as_i32()
            .ok_or_else(|| Trap::Host(format!("argument {index} is not an i32")))
    }

    pub fn arg_i64(&mut self, index: usize) -> Result<i64, Trap> {
        self.arg(index)?
            .as_i64()
            .ok_or_else(|| Trap::Host(format!("argument {index} is not an i64")))
    }

    pub fn arg_f64(&mut self, index: usize) -> Result<f64, Trap> {
        self.arg(index)?
            .as_f64()
            .ok_or_else(|| Trap::Host(format!("argument {index} is not an f64")))
    }

    /// Store result `index`. The value must have the declared result type.
    pub fn set_result(&mut self, index: usize, value: Value) -> Result<(), Trap> {
        let ty = *self
            .ty
            .results()
            .get(index)
            .ok_or_else(|| Trap::Host(format!("result {index} out of range")))?;
        if value.ty() != ty {
            return Err(Trap::Host(format!(
                "result {index} must be {ty}, got {}",
                value.ty()
            )));
        }
        self.write_slot(2 * index, value)
    }

    /// Guest linear memory, if the calling module has one.
    pub fn memory(&mut self) -> Option<&mut SegmentedMemory> {
        self.memory.as_deref_mut()
    }

    /// Copy `buf.len()` bytes out of linear memory.
    pub fn read_memory(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), Trap> {
        let memory = self.memory.as_deref_mut().ok_or(Trap::OutOfBoundsMemoryAccess)?;
        memory.read(Offset::new(offset), buf)?;
        Ok(())
    }

    pub fn write_memory(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Trap> {
        let memory = self.memory.as_deref_mut().ok_or(Trap::OutOfBoundsMemoryAccess)?;
        memory.write(Offset::new(offset), bytes)?;
        Ok(())
    }

    fn slot_offset(&self, slot: usize, ty: ValueType) -> Result<Offset, Trap> {
        let end = slot as u64 + u64::from(ty.slots());
        if end > u64::from(self.frame_slots) {
            return Err(Trap::StackOverflow);
        }
        Ok(Offset::new(self.frame + slot as u32 * 4))
    }

    fn read_slot(&mut self, slot: usize, ty: ValueType) -> Result<Value, Trap> {
        let at = self.slot_offset(slot, ty)?;
        let bits = if ty.is_64bit() {
            u64::from_le_bytes(self.heap.read_array::<8>(at)?)
        } else {
            u64::from(u32::from_le_bytes(self.heap.read_array::<4>(at)?))
        };
        Ok(Value::from_bits(ty, bits))
    }

    fn write_slot(&mut self, slot: usize, value: Value) -> Result<(), Trap> {
        let at = self.slot_offset(slot, value.ty())?;
        let bits = value.to_bits();
        if value.ty().is_64bit() {
            self.heap.write_array(at, bits.to_le_bytes())?;
        } else {
            self.heap.write_array(at, (bits as u32).to_le_bytes())?;
        }
        Ok(())
    }
}
