use std::collections::BTreeSet;

use flowpol_core::r#match::family::Field;

/// What a device can hold in its flow table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceCapability {
    /// Fields the device can match on.
    pub fields: BTreeSet<Field>,
    /// Table size, the catch-all default included.
    pub max_rules: usize,
    /// Number of distinct priorities, `0..max_priority_levels`.
    pub max_priority_levels: u32,
}

impl DeviceCapability {
    pub const DEFAULT_MAX_RULES: usize = 2048;
    pub const DEFAULT_PRIORITY_LEVELS: u32 = 4096;

    pub fn new(
        fields: impl IntoIterator<Item = Field>,
        max_rules: usize,
        max_priority_levels: u32,
    ) -> Self {
        DeviceCapability {
            fields: fields.into_iter().collect(),
            max_rules,
            max_priority_levels,
        }
    }

    pub fn supports(&self, field: Field) -> bool {
        self.fields.contains(&field)
    }

    pub fn with_max_rules(mut self, max_rules: usize) -> Self {
        self.max_rules = max_rules;
        self
    }

    pub fn with_priority_levels(mut self, levels: u32) -> Self {
        self.max_priority_levels = levels;
        self
    }
}

/// Every supported field, default table limits.
impl Default for DeviceCapability {
    fn default() -> Self {
        DeviceCapability::new(
            Field::supported(),
            Self::DEFAULT_MAX_RULES,
            Self::DEFAULT_PRIORITY_LEVELS,
        )
    }
}
