//! In-memory two-slot [`PartitionDevice`] adapter.

use crate::ports::{PartitionDevice, Slot};

const SLOT_CAPACITY: usize = 2 * 1024 * 1024;

/// Two fixed-size byte buffers standing in for the dual-slot flash
/// layout (§1 "Out of scope" — the real flash driver is external).
pub struct InMemoryPartition {
    slot_a: Vec<u8>,
    slot_b: Vec<u8>,
    boot: Slot,
}

impl InMemoryPartition {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot_a: vec![0; SLOT_CAPACITY],
            slot_b: vec![0; SLOT_CAPACITY],
            boot: Slot::A,
        }
    }

    fn slot_buf(&mut self, slot: Slot) -> &mut Vec<u8> {
        match slot {
            Slot::A => &mut self.slot_a,
            Slot::B => &mut self.slot_b,
        }
    }
}

impl Default for InMemoryPartition {
    fn default() -> Self {
        Self::new()
    }
}

impl PartitionDevice for InMemoryPartition {
    fn erase(&mut self, slot: Slot) -> Result<(), &'static str> {
        self.slot_buf(slot).iter_mut().for_each(|b| *b = 0);
        Ok(())
    }

    fn write(&mut self, slot: Slot, offset: u32, data: &[u8]) -> Result<(), &'static str> {
        let offset = offset as usize;
        let buf = self.slot_buf(slot);
        if offset + data.len() > buf.len() {
            return Err("write past end of partition");
        }
        buf[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn boot_slot(&self) -> Slot {
        self.boot
    }

    fn set_boot(&mut self, slot: Slot) -> Result<(), &'static str> {
        self.boot = slot;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_back() {
        let mut part = InMemoryPartition::new();
        let inactive = part.inactive_slot();
        part.write(inactive, 0, &[1, 2, 3]).unwrap();
        assert_eq!(&part.slot_buf(inactive)[0..3], &[1, 2, 3]);
    }

    #[test]
    fn set_boot_flips_inactive() {
        let mut part = InMemoryPartition::new();
        assert_eq!(part.boot_slot(), Slot::A);
        part.set_boot(Slot::B).unwrap();
        assert_eq!(part.boot_slot(), Slot::B);
        assert_eq!(part.inactive_slot(), Slot::A);
    }
}
