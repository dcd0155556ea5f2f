use std::collections::BTreeSet;

use flowpol_compile::{compile, CompileError, DeviceCapability, RuleTable};
use flowpol_core::prelude::*;
use flowpol_policy::*;
use proptest::prelude::*;
use test_log::test;

fn dstip(s: &str) -> Predicate {
    Predicate::matches("dstip", s).unwrap()
}

fn to(ip: &str) -> Packet {
    Packet::new()
        .with(Field::DstIp, Value::parse(Field::DstIp, ip).unwrap())
        .unwrap()
}

fn forward_each(targets: &[(&str, PortId)]) -> Policy {
    parallel_all(
        targets
            .iter()
            .map(|(ip, port)| leaf(dstip(ip), [Action::Forward(*port)]).unwrap()),
    )
    .unwrap()
}

fn assert_agrees(policy: &Policy, table: &RuleTable, packets: &[Packet]) {
    for pkt in packets {
        assert_eq!(table.apply(pkt), policy.eval(pkt), "packet {}", pkt);
    }
}

#[test]
fn test_two_destinations() {
    let policy = forward_each(&[("10.0.0.1", 1), ("10.0.0.2", 2)]);
    let table = compile(&policy, &DeviceCapability::default()).unwrap();
    assert_eq!(table.len(), 3);
    let rules = table.rules();
    assert_eq!(
        rules.iter().map(|r| r.priority).collect::<Vec<_>>(),
        vec![2, 1, 0]
    );
    assert_eq!(rules[0].matches.to_string(), "dstip=10.0.0.1");
    assert_eq!(rules[0].actions, ActionSet::forward(1));
    assert_eq!(rules[1].matches.to_string(), "dstip=10.0.0.2");
    assert!(rules[2].matches.is_any());
    assert!(rules[2].actions.is_drop());
    assert!(table.verify().is_ok());
    assert_agrees(&policy, &table, &[to("10.0.0.1"), to("10.0.0.2"), to("10.0.0.3")]);
}

#[test]
fn test_server_fold_order() {
    let servers = [("10.0.0.11", 1), ("10.0.0.12", 2), ("10.0.0.13", 3)];
    let mut rotated = servers;
    rotated.rotate_left(1);
    for order in [servers, rotated] {
        let table = compile(&forward_each(&order), &DeviceCapability::default()).unwrap();
        assert_eq!(table.iter().filter(|r| !r.matches.is_any()).count(), 3);
        let hit = table.lookup(&to("10.0.0.12")).unwrap();
        assert_eq!(hit.actions, ActionSet::forward(2));
    }
}

#[test]
fn test_rewrite_then_forward() {
    let mac = Value::parse(Field::DstMac, "00:00:00:00:00:0a").unwrap();
    let policy = sequential(
        sequential(filter(dstip("10.0.0.1")), modify(Field::DstMac, mac).unwrap()),
        fwd(4),
    );
    let table = compile(&policy, &DeviceCapability::default()).unwrap();
    let rule = &table.rules()[0];
    assert_eq!(rule.matches.to_string(), "dstip=10.0.0.1");
    assert_eq!(
        rule.actions.to_string(),
        "[modify(dstmac=00:00:00:00:00:0a), forward(4)]"
    );
    assert_eq!(table.len(), 2);
    assert_agrees(&policy, &table, &[to("10.0.0.1"), to("10.0.0.2")]);
}

#[test]
fn test_nested_subnets() {
    let policy = forward_each(&[("10.0.0.0/24", 1), ("10.0.0.1", 2)]);
    let table = compile(&policy, &DeviceCapability::default()).unwrap();
    assert_eq!(table.len(), 3);
    // the more specific match wins and gets both actions
    assert_eq!(table.rules()[0].matches.to_string(), "dstip=10.0.0.1");
    assert_eq!(table.rules()[0].actions.len(), 2);
    assert!(table.verify().is_ok());
    assert_agrees(
        &policy,
        &table,
        &[to("10.0.0.1"), to("10.0.0.200"), to("10.0.1.1")],
    );
}

#[test]
fn test_branch_uses_default() {
    let policy = if_then_else(dstip("10.0.0.0/8"), fwd(1), fwd(2));
    let table = compile(&policy, &DeviceCapability::default()).unwrap();
    assert_eq!(table.len(), 2);
    assert_eq!(table.rules()[1].actions, ActionSet::forward(2));
    assert_agrees(&policy, &table, &[to("10.1.2.3"), to("11.0.0.1")]);

    let all = compile(&identity(), &DeviceCapability::default()).unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all.rules()[0].actions, ActionSet::identity());
    let none = compile(&drop_all(), &DeviceCapability::default()).unwrap();
    assert_eq!(none.len(), 1);
    assert!(none.rules()[0].actions.is_drop());
}

fn ssh() -> Predicate {
    Predicate::matches("dstport", "22").unwrap()
}

fn to_port(ip: &str, port: u64) -> Packet {
    to(ip).with(Field::DstPort, port).unwrap()
}

#[test]
fn test_dropped_branch_stays_small() {
    let policy = if_then_else(ssh(), drop_all(), fwd(1));
    let table = compile(&policy, &DeviceCapability::default()).unwrap();
    assert_eq!(table.len(), 2);
    assert!(table.rules()[0].actions.is_drop());
    assert!(table.rules()[1].matches.is_any());
    assert_eq!(table.rules()[1].actions, ActionSet::forward(1));
    assert!(table.verify().is_ok());
    assert_agrees(
        &policy,
        &table,
        &[to_port("10.0.0.1", 22), to_port("10.0.0.1", 80), to("10.0.0.1")],
    );

    let tight = DeviceCapability::default().with_max_rules(2);
    assert_eq!(compile(&policy, &tight), Ok(table));
}

#[test]
fn test_restrict_to_negation() {
    let policy = restrict(fwd(1), !dstip("10.0.0.0/8"));
    let table = compile(&policy, &DeviceCapability::default()).unwrap();
    assert_eq!(table.len(), 2);
    assert!(table.rules()[0].actions.is_drop());
    assert_eq!(table.rules()[1].actions, ActionSet::forward(1));
    assert_agrees(&policy, &table, &[to("10.1.2.3"), to("11.0.0.1"), to("192.168.0.1")]);

    // a matched region smaller than the unmatched one keeps the drop default
    let policy = restrict(fwd(1), ssh());
    let table = compile(&policy, &DeviceCapability::default()).unwrap();
    assert_eq!(table.len(), 2);
    assert!(table.rules()[1].actions.is_drop());
}

#[test]
fn test_reordered_rewrites_emit_once() {
    let vlan = modify(Field::Vlan, 1u64).unwrap();
    let port = modify(Field::DstPort, 2u64).unwrap();
    let a = sequential(sequential(vlan.clone(), port.clone()), fwd(1));
    let b = sequential(sequential(port, vlan), fwd(1));
    let caps = DeviceCapability::default();
    let single = compile(&a, &caps).unwrap();
    assert_eq!(single.len(), 1);
    assert_eq!(single.rules()[0].actions.len(), 1);
    assert_eq!(compile(&parallel(a, b), &caps), Ok(single));
}

#[test]
fn test_device_limits() {
    let one = forward_each(&[("10.0.0.1", 1)]);
    let caps = DeviceCapability::default().with_max_rules(1);
    assert_eq!(
        compile(&one, &caps),
        Err(CompileError::TableOverflow {
            rules: 2,
            max_rules: 1
        })
    );

    let two = forward_each(&[("10.0.0.1", 1), ("10.0.0.2", 2)]);
    let caps = DeviceCapability::default().with_priority_levels(2);
    assert_eq!(
        compile(&two, &caps),
        Err(CompileError::PriorityOverflow {
            levels: 3,
            max_levels: 2
        })
    );

    let caps = DeviceCapability::new([Field::DstMac], 100, 100);
    assert_eq!(
        compile(&two, &caps),
        Err(CompileError::UnsupportedField(Field::DstIp))
    );
    // rewriting a field the device cannot match on is fine
    let mac = Value::parse(Field::DstMac, "00:00:00:00:00:0a").unwrap();
    let rewrite = sequential(modify(Field::DstIp, to_value("10.0.0.1")).unwrap(), fwd(1));
    let caps = DeviceCapability::new([Field::DstMac], 100, 100);
    assert!(compile(&sequential(rewrite, modify(Field::DstMac, mac).unwrap()), &caps).is_ok());
}

fn to_value(ip: &str) -> Value {
    Value::parse(Field::DstIp, ip).unwrap()
}

#[test]
fn test_deterministic_bytes() {
    let policy = parallel(
        forward_each(&[("10.0.0.0/16", 1), ("10.0.3.0/24", 2)]),
        restrict(fwd(9), Predicate::matches("dstport", "22").unwrap()),
    );
    let caps = DeviceCapability::default();
    let (mut a, mut b) = (vec![], vec![]);
    compile(&policy, &caps).unwrap().write_buffer(&mut a);
    compile(&policy, &caps).unwrap().write_buffer(&mut b);
    assert_eq!(a, b);
}

const HOSTS: [&str; 4] = ["10.0.0.1", "10.0.0.2", "10.0.1.1", "10.0.1.2"];
const NETS: [&str; 3] = ["10.0.0.0/24", "10.0.1.0/24", "10.0.0.0/16"];

fn arb_pred() -> impl Strategy<Value = Predicate> {
    let atom = prop_oneof![
        (0..HOSTS.len()).prop_map(|i| dstip(HOSTS[i])),
        (0..NETS.len()).prop_map(|i| dstip(NETS[i])),
        (0u64..3).prop_map(|v| Predicate::field(Field::Vlan, v).unwrap()),
    ];
    atom.prop_recursive(2, 4, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(a, b)| a & b),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| a | b),
            inner.prop_map(|a| !a),
        ]
    })
}

fn arb_policy() -> impl Strategy<Value = Policy> {
    let leaf = prop_oneof![
        arb_pred().prop_map(filter),
        (1u32..4).prop_map(fwd),
        (0..HOSTS.len()).prop_map(|i| modify(Field::DstIp, to_value(HOSTS[i])).unwrap()),
        (0u64..3).prop_map(|v| modify(Field::Vlan, v).unwrap()),
        Just(identity()),
        Just(drop_all()),
    ];
    leaf.prop_recursive(3, 8, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(a, b)| parallel(a, b)),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| sequential(a, b)),
            (arb_pred(), inner.clone(), inner).prop_map(|(c, a, b)| if_then_else(c, a, b)),
        ]
    })
}

fn all_packets() -> Vec<Packet> {
    let mut ips: Vec<&str> = HOSTS.to_vec();
    ips.extend(["10.0.2.1", "10.1.0.1", "192.168.0.1"]);
    ips.into_iter()
        .flat_map(|ip| {
            (0u64..4).map(move |vlan| to(ip).with(Field::Vlan, vlan).unwrap())
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn compiled_table_matches_interpreter(policy in arb_policy()) {
        let table = compile(&policy, &DeviceCapability::default()).unwrap();
        prop_assert!(table.verify().is_ok());
        for pkt in all_packets() {
            prop_assert_eq!(table.apply(&pkt), policy.eval(&pkt));
        }
    }

    #[test]
    fn parallel_compiles_commutatively(a in arb_policy(), b in arb_policy()) {
        let caps = DeviceCapability::default();
        let ab = compile(&parallel(a.clone(), b.clone()), &caps).unwrap();
        let ba = compile(&parallel(b, a), &caps).unwrap();
        for pkt in all_packets() {
            let expected: BTreeSet<Delivery> = ab.apply(&pkt);
            prop_assert_eq!(ba.apply(&pkt), expected);
        }
    }
}

/// Large enough for any composition of three generated policies.
fn roomy() -> DeviceCapability {
    DeviceCapability::default()
        .with_max_rules(usize::MAX)
        .with_priority_levels(u32::MAX)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn parallel_compiles_associatively(a in arb_policy(), b in arb_policy(), c in arb_policy()) {
        let caps = roomy();
        let left = compile(&parallel(parallel(a.clone(), b.clone()), c.clone()), &caps).unwrap();
        let right = compile(&parallel(a, parallel(b, c)), &caps).unwrap();
        for pkt in all_packets() {
            let hit = left.lookup(&pkt).map(|r| &r.actions);
            prop_assert_eq!(right.lookup(&pkt).map(|r| &r.actions), hit, "packet {}", pkt);
        }
    }

    #[test]
    fn sequential_compiles_associatively(a in arb_policy(), b in arb_policy(), c in arb_policy()) {
        let caps = roomy();
        let left = compile(&sequential(sequential(a.clone(), b.clone()), c.clone()), &caps).unwrap();
        let right = compile(&sequential(a, sequential(b, c)), &caps).unwrap();
        for pkt in all_packets() {
            let hit = left.lookup(&pkt).map(|r| &r.actions);
            prop_assert_eq!(right.lookup(&pkt).map(|r| &r.actions), hit, "packet {}", pkt);
            prop_assert_eq!(right.apply(&pkt), left.apply(&pkt));
        }
    }
}
