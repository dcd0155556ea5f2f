use bitvec::vec::BitVec;
use log::trace;

use crate::{
    error::ConfigError,
    r#match::{
        engine::{Atom, MatchEncoder, PredicateEngine},
        family::Field,
        space::HeaderSpace,
        value::Value,
        MaskedValue, Predicate,
    },
};

/// The HeaderSpaceEngine evaluates predicates over unions of ternary cubes. Unlike a BDD it has
/// no shared state, so it is cheap to create and safe to share across threads.
#[derive(Copy, Clone, Debug, Default)]
pub struct HeaderSpaceEngine;

impl MatchEncoder for HeaderSpaceEngine {
    type Space = HeaderSpace;

    fn one(&self) -> HeaderSpace {
        HeaderSpace::all()
    }

    fn zero(&self) -> HeaderSpace {
        HeaderSpace::empty()
    }

    fn encode_match(&self, field: Field, value: &Value) -> Result<HeaderSpace, ConfigError> {
        Ok(MaskedValue::of(field, value)?.into())
    }
}

impl PredicateEngine for HeaderSpaceEngine {
    fn encode(&self, pred: &Predicate) -> Result<HeaderSpace, ConfigError> {
        Ok(match pred {
            Predicate::True => self.one(),
            Predicate::False => self.zero(),
            Predicate::FieldEquals(field, value) => self.encode_match(*field, value)?,
            Predicate::And(a, b) => {
                let a = self.encode(a)?;
                if a.is_empty() {
                    return Ok(a);
                }
                a.intersect(&self.encode(b)?)
            }
            Predicate::Or(a, b) => self.encode(a)?.union(&self.encode(b)?),
            Predicate::Not(a) => self.encode(a)?.complement(),
        })
    }

    fn is_empty(&self, pred: &Predicate) -> Result<bool, ConfigError> {
        Ok(self.encode(pred)?.is_empty())
    }

    fn is_subset_of(&self, a: &Predicate, b: &Predicate) -> Result<bool, ConfigError> {
        Ok(self.encode(a)?.is_subset_of(&self.encode(b)?))
    }

    fn disjoint_partition(
        &self,
        preds: &[Predicate],
    ) -> Result<Vec<Atom<HeaderSpace>>, ConfigError> {
        let spaces = preds
            .iter()
            .map(|p| self.encode(p))
            .collect::<Result<Vec<_>, _>>()?;
        let n = spaces.len();

        let mut atoms: Vec<Atom<HeaderSpace>> = Vec::new();
        for (i, space) in spaces.iter().enumerate() {
            let mut rest = space.clone();
            let mut next = Vec::with_capacity(atoms.len() * 2 + 1);
            for atom in atoms {
                let inside = atom.region.intersect(space);
                if inside.is_empty() {
                    next.push(atom);
                    continue;
                }
                rest = rest.subtract(&inside);
                let outside = atom.region.subtract(space);
                if !outside.is_empty() {
                    next.push(Atom {
                        region: outside,
                        cover: atom.cover.clone(),
                        members: atom.members.clone(),
                    });
                }
                let mut members = atom.members;
                members.set(i, true);
                next.push(Atom {
                    region: inside,
                    cover: atom.cover.intersect(space),
                    members,
                });
            }
            if !rest.is_empty() {
                let mut members = BitVec::repeat(false, n);
                members.set(i, true);
                next.push(Atom {
                    region: rest,
                    cover: space.clone(),
                    members,
                });
            }
            atoms = next;
        }
        trace!("partitioned {} predicates into {} atoms", n, atoms.len());
        Ok(atoms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(field: &str, literal: &str) -> Predicate {
        Predicate::matches(field, literal).unwrap()
    }

    #[test]
    fn test_subset_and_equivalence() {
        let engine = HeaderSpaceEngine;
        let a = p("dstip", "10.0.0.0/24");
        let b = p("dstip", "10.0.0.0/25") | p("dstip", "10.0.0.128/25");
        assert!(engine.equivalent(&a, &b).unwrap());
        assert!(engine.is_subset_of(&p("dstip", "10.0.0.3"), &a).unwrap());
        assert!(!engine.is_subset_of(&a, &p("dstip", "10.0.0.3")).unwrap());
        // x & ~x is empty, x | ~x is everything
        assert!(engine.is_empty(&(a.clone() & !a.clone())).unwrap());
        assert!(engine
            .equivalent(&(a.clone() | !a.clone()), &Predicate::True)
            .unwrap());
        assert!(engine
            .equivalent(
                &engine.and(&a, &p("dstport", "80")),
                &(p("dstport", "80") & b)
            )
            .unwrap());
    }

    #[test]
    fn test_partition_of_overlapping() {
        let engine = HeaderSpaceEngine;
        let preds = [
            p("dstip", "10.0.0.0/24"),
            p("dstport", "80"),
            p("dstip", "10.0.0.1"),
        ];
        let atoms = engine.disjoint_partition(&preds).unwrap();

        for (i, a) in atoms.iter().enumerate() {
            assert!(!a.region.is_empty());
            assert!(a.region.is_subset_of(&a.cover));
            for b in atoms.iter().skip(i + 1) {
                assert!(!a.region.overlaps(&b.region));
                assert_ne!(a.members, b.members);
            }
        }
        for (i, pred) in preds.iter().enumerate() {
            let union = atoms
                .iter()
                .filter(|a| a.members[i])
                .fold(HeaderSpace::empty(), |acc, a| acc.union(&a.region));
            let space = engine.encode(pred).unwrap();
            assert!(union.is_subset_of(&space) && space.is_subset_of(&union));
        }
        // {net}, {port}, {net, port}, {net, host}, {net, port, host}
        assert_eq!(atoms.len(), 5);
    }

    #[test]
    fn test_partition_skips_empty() {
        let engine = HeaderSpaceEngine;
        let atoms = engine
            .disjoint_partition(&[Predicate::False, p("vlan", "7")])
            .unwrap();
        assert_eq!(atoms.len(), 1);
        assert_eq!(atoms[0].member_indices().collect::<Vec<_>>(), vec![1]);
        assert!(engine.disjoint_partition(&[]).unwrap().is_empty());
    }
}
