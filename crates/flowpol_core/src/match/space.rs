//! Exact sets of packet headers, kept as unions of ternary cubes.
use std::fmt::{Display, Formatter};

use super::{MaskedValue, Packet};

/// A set of headers. The cubes of a normalized space never contain one another, but may
/// overlap.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct HeaderSpace {
    cubes: Vec<MaskedValue>,
}

impl From<MaskedValue> for HeaderSpace {
    fn from(cube: MaskedValue) -> Self {
        HeaderSpace { cubes: vec![cube] }
    }
}

impl FromIterator<MaskedValue> for HeaderSpace {
    fn from_iter<T: IntoIterator<Item = MaskedValue>>(iter: T) -> Self {
        HeaderSpace {
            cubes: iter.into_iter().collect(),
        }
        .normalize()
    }
}

impl HeaderSpace {
    pub fn empty() -> Self {
        HeaderSpace { cubes: vec![] }
    }

    pub fn all() -> Self {
        MaskedValue::ANY.into()
    }

    pub fn cubes(&self) -> &[MaskedValue] {
        &self.cubes
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cubes.is_empty()
    }

    #[inline]
    pub fn is_all(&self) -> bool {
        self.cubes.iter().any(MaskedValue::is_any)
    }

    /// Number of cubes.
    #[inline]
    pub fn len(&self) -> usize {
        self.cubes.len()
    }

    pub fn union(&self, rhs: &Self) -> Self {
        self.cubes
            .iter()
            .chain(rhs.cubes.iter())
            .copied()
            .collect()
    }

    pub fn intersect(&self, rhs: &Self) -> Self {
        self.cubes
            .iter()
            .flat_map(|a| rhs.cubes.iter().filter_map(move |b| a.intersect(b)))
            .collect()
    }

    pub fn subtract(&self, rhs: &Self) -> Self {
        let mut rest = self.cubes.clone();
        for b in rhs.cubes.iter() {
            if rest.is_empty() {
                break;
            }
            rest = rest.iter().flat_map(|a| a.subtract(b)).collect();
        }
        rest.into_iter().collect()
    }

    pub fn complement(&self) -> Self {
        HeaderSpace::all().subtract(self)
    }

    pub fn is_subset_of(&self, rhs: &Self) -> bool {
        self.cubes
            .iter()
            .all(|a| HeaderSpace::from(*a).subtract(rhs).is_empty())
    }

    pub fn overlaps(&self, rhs: &Self) -> bool {
        self.cubes
            .iter()
            .any(|a| rhs.cubes.iter().any(|b| a.overlaps(b)))
    }

    pub fn contains_packet(&self, packet: &Packet) -> bool {
        self.cubes.iter().any(|c| c.matches(packet))
    }

    /// Drop cubes contained in another cube and sort the rest, widest first.
    fn normalize(mut self) -> Self {
        self.cubes
            .sort_by(|a, b| a.specificity().cmp(&b.specificity()).then_with(|| a.cmp(b)));
        self.cubes.dedup();
        let mut kept: Vec<MaskedValue> = Vec::with_capacity(self.cubes.len());
        for cube in self.cubes {
            if !kept.iter().any(|k| k.contains(&cube)) {
                kept.push(cube);
            }
        }
        HeaderSpace { cubes: kept }
    }
}

impl Display for HeaderSpace {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.cubes.is_empty() {
            return f.write_str("{}");
        }
        for (i, cube) in self.cubes.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            write!(f, "[{}]", cube)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::r#match::{family::Field, value::Value};

    fn cube(field: Field, literal: &str) -> MaskedValue {
        MaskedValue::of(field, &Value::parse(field, literal).unwrap()).unwrap()
    }

    #[test]
    fn test_union_absorbs() {
        let net: HeaderSpace = cube(Field::DstIp, "10.0.0.0/8").into();
        let host: HeaderSpace = cube(Field::DstIp, "10.1.2.3").into();
        let u = host.union(&net);
        assert_eq!(u.len(), 1);
        assert_eq!(u, net);
        assert!(host.is_subset_of(&net));
        assert!(!net.is_subset_of(&host));
    }

    #[test]
    fn test_complement() {
        let host: HeaderSpace = cube(Field::DstPort, "80").into();
        let rest = host.complement();
        assert!(!rest.overlaps(&host));
        assert!(rest.union(&host).is_subset_of(&HeaderSpace::all()));
        assert!(HeaderSpace::all().is_subset_of(&rest.union(&host)));
        assert!(rest.complement().is_subset_of(&host));
        assert!(HeaderSpace::all().complement().is_empty());
    }

    #[test]
    fn test_subset_of_split_cover() {
        // 10.0.0.0/24 is covered by its two halves together, but by neither alone
        let whole: HeaderSpace = cube(Field::SrcIp, "10.0.0.0/24").into();
        let lo: HeaderSpace = cube(Field::SrcIp, "10.0.0.0/25").into();
        let hi: HeaderSpace = cube(Field::SrcIp, "10.0.0.128/25").into();
        assert!(!whole.is_subset_of(&lo));
        assert!(!whole.is_subset_of(&hi));
        assert!(whole.is_subset_of(&lo.union(&hi)));
        assert!(whole.subtract(&lo).subtract(&hi).is_empty());
    }

    #[test]
    fn test_intersect_fields() {
        let ip: HeaderSpace = cube(Field::DstIp, "10.0.0.1").into();
        let port: HeaderSpace = cube(Field::DstPort, "22").into();
        let both = ip.intersect(&port);
        assert_eq!(both.len(), 1);
        assert_eq!(both.to_string(), "[dstport=22, dstip=10.0.0.1]");
        let other: HeaderSpace = cube(Field::DstIp, "10.0.0.2").into();
        assert!(both.intersect(&other).is_empty());
    }
}
