use std::{
    cmp::Ordering,
    collections::BTreeSet,
    fmt::{Display, Formatter},
};

use flowpol_core::{
    action::{ActionSet, Delivery},
    r#match::{HeaderSpace, MaskedValue, Packet},
};
use itertools::Itertools;

use crate::error::TableError;

/// CompiledRule is equivalent to an OpenFlow flow entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CompiledRule {
    pub priority: u32,
    pub matches: MaskedValue,
    pub actions: ActionSet,
}

impl CompiledRule {
    pub fn new(priority: u32, matches: MaskedValue, actions: ActionSet) -> Self {
        CompiledRule {
            priority,
            matches,
            actions,
        }
    }
}

impl PartialOrd for CompiledRule {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CompiledRule {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.matches.cmp(&other.matches))
            .then_with(|| self.actions.cmp(&other.actions))
    }
}

impl Display for CompiledRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Rule {{ priority: {}, match: {}, actions: {} }}",
            self.priority, self.matches, self.actions
        )
    }
}

/// A complete flow table, highest priority first. The last rule is the catch-all default.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct RuleTable {
    rules: Vec<CompiledRule>,
}

impl RuleTable {
    /// Build a table from rules in any order. Rules of equal priority keep their relative order.
    pub fn new(mut rules: Vec<CompiledRule>) -> Self {
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        RuleTable { rules }
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompiledRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn default_rule(&self) -> Option<&CompiledRule> {
        self.rules.last()
    }

    pub fn max_priority(&self) -> u32 {
        self.rules.first().map_or(0, |r| r.priority)
    }

    /// The rule a packet hits: the first matching one in priority order.
    pub fn lookup(&self, packet: &Packet) -> Option<&CompiledRule> {
        self.rules.iter().find(|r| r.matches.matches(packet))
    }

    /// What the device does with `packet`. A packet missing every rule is dropped.
    pub fn apply(&self, packet: &Packet) -> BTreeSet<Delivery> {
        self.lookup(packet)
            .map(|r| r.actions.apply(packet))
            .unwrap_or_default()
    }

    /// The headers each rule actually catches: its match minus every higher rule.
    pub fn effective_regions(&self) -> Vec<HeaderSpace> {
        let mut seen = HeaderSpace::empty();
        let mut regions = Vec::with_capacity(self.rules.len());
        for rule in self.rules.iter() {
            let own = HeaderSpace::from(rule.matches);
            regions.push(own.subtract(&seen));
            seen = seen.union(&own);
        }
        regions
    }

    /// Check that no two overlapping rules share a priority and that every header is matched.
    pub fn verify(&self) -> Result<(), TableError> {
        for (i, j) in (0..self.rules.len()).tuple_combinations() {
            let (a, b) = (&self.rules[i], &self.rules[j]);
            if a.priority == b.priority && a.matches.overlaps(&b.matches) {
                return Err(TableError::SharedPriority(i, j, a.priority));
            }
        }
        let covered: HeaderSpace = self.rules.iter().map(|r| r.matches).collect();
        let missing = covered.complement();
        if !missing.is_empty() {
            return Err(TableError::Uncovered(missing.to_string()));
        }
        Ok(())
    }

    /// The same table with every priority raised by `offset`, `None` if a priority overflows.
    pub fn rebased(&self, offset: u32) -> Option<RuleTable> {
        let rules = self
            .rules
            .iter()
            .map(|r| {
                Some(CompiledRule {
                    priority: r.priority.checked_add(offset)?,
                    ..r.clone()
                })
            })
            .collect::<Option<Vec<_>>>()?;
        Some(RuleTable { rules })
    }

    /// Serialize the table. Identical tables give identical bytes. Returns the number of bytes
    /// written.
    pub fn write_buffer(&self, buffer: &mut Vec<u8>) -> usize {
        let start = buffer.len();
        buffer.extend_from_slice(&(self.rules.len() as u32).to_le_bytes());
        for rule in self.rules.iter() {
            buffer.extend_from_slice(&rule.priority.to_le_bytes());
            buffer.extend_from_slice(rule.matches.value.as_raw_slice());
            buffer.extend_from_slice(rule.matches.mask.as_raw_slice());
            buffer.extend_from_slice(&(rule.actions.len() as u16).to_le_bytes());
            for emit in rule.actions.iter() {
                buffer.push(emit.mods().len() as u8);
                for (field, value) in emit.mods() {
                    buffer.push(*field as u8);
                    buffer.extend_from_slice(&(value.ternary(*field).0 as u64).to_le_bytes());
                }
                match emit.port() {
                    Some(port) => {
                        buffer.push(1);
                        buffer.extend_from_slice(&port.to_le_bytes());
                    }
                    None => buffer.push(0),
                }
            }
        }
        buffer.len() - start
    }
}

impl Display for RuleTable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.rules.iter().join("\n"))
    }
}

impl<'a> IntoIterator for &'a RuleTable {
    type Item = &'a CompiledRule;
    type IntoIter = std::slice::Iter<'a, CompiledRule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}
