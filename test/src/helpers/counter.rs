use coterie_node::{ChangeType, DirtyBits, Distributable};
use coterie_shared::{ByteReader, ByteWrite, Serde, SerdeErr};

pub const DIRTY_VALUE: DirtyBits = DirtyBits::bit(0);
pub const DIRTY_LABEL: DirtyBits = DirtyBits::bit(1);

/// Distributed test object with a number and a label
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Counter {
    value: i64,
    label: String,
    dirty: DirtyBits,
    change_type: Option<ChangeType>,
}

impl Counter {
    pub fn new(value: i64) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }

    pub fn with_change_type(mut self, change_type: ChangeType) -> Self {
        self.change_type = Some(change_type);
        self
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_value(&mut self, value: i64) {
        self.value = value;
        self.dirty |= DIRTY_VALUE;
    }

    pub fn set_label(&mut self, label: &str) {
        self.label = label.to_string();
        self.dirty |= DIRTY_LABEL;
    }
}

impl Distributable for Counter {
    fn change_type(&self) -> ChangeType {
        self.change_type.unwrap_or(ChangeType::Delta)
    }

    fn serialize(&self, writer: &mut dyn ByteWrite, dirty: DirtyBits) {
        if dirty.intersects(DIRTY_VALUE) {
            self.value.ser(writer);
        }
        if dirty.intersects(DIRTY_LABEL) {
            self.label.ser(writer);
        }
    }

    fn deserialize(&mut self, reader: &mut ByteReader, dirty: DirtyBits) -> Result<(), SerdeErr> {
        if dirty.intersects(DIRTY_VALUE) {
            self.value = i64::de(reader)?;
        }
        if dirty.intersects(DIRTY_LABEL) {
            self.label = String::de(reader)?;
        }
        Ok(())
    }

    fn dirty_bits(&self) -> DirtyBits {
        self.dirty
    }

    fn reset_dirty(&mut self) {
        self.dirty = DirtyBits::NONE;
    }
}
