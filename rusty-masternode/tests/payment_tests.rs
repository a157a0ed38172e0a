mod common;

use std::collections::HashMap;

use common::*;
use rusty_masternode::MasternodeError;

fn operators(count: u8) -> Vec<Operator> {
    (1..=count).map(Operator::new).collect()
}

#[test]
fn test_selection_is_pure_and_identical_across_nodes() {
    let ops = operators(6);
    let refs: Vec<&Operator> = ops.iter().collect();
    let first = TestNode::new();
    let second = TestNode::new();
    first.enable(&refs);
    second.enable(&refs);

    for height in 4100..4150 {
        let payee = first.manager.next_payee(height);
        assert!(payee.is_some());
        assert_eq!(payee, first.manager.next_payee(height));
        assert_eq!(payee, second.manager.next_payee(height));
    }
    assert_eq!(first.manager.next_payees(4100, 20), second.manager.next_payees(4100, 20));
}

#[test]
fn test_no_payee_before_start_block_or_without_seed() {
    let node = TestNode::new();
    let operator = Operator::new(1);
    node.enable(&[&operator]);
    let start = node.manager.config().chain_params.masternode_payments_start_block;

    assert_eq!(node.manager.next_payee(start - 1), None);
    assert_eq!(node.manager.next_payee(start), Some(operator.collateral.clone()));
    // Seed block for this height is beyond the tip.
    assert_eq!(node.manager.next_payee(CHAIN_HEIGHT + 200), None);
}

#[test]
fn test_nobody_is_paid_twice_within_the_window() {
    let ops = operators(5);
    let refs: Vec<&Operator> = ops.iter().collect();
    let node = TestNode::new();
    node.enable(&refs);

    let window = ops.len() as u64;
    let mut last_paid: HashMap<_, u64> = HashMap::new();
    for height in 4200..4240 {
        let payee = node.manager.next_payee(height).unwrap();
        if let Some(previous) = last_paid.get(&payee) {
            assert!(height - previous >= window, "{} paid at {} and {}", payee, previous, height);
        }
        node.manager.record_payment(&payee, height).unwrap();
        last_paid.insert(payee, height);
    }
    assert_eq!(last_paid.len(), ops.len());
}

#[test]
fn test_projection_matches_recorded_payments() {
    let ops = operators(4);
    let refs: Vec<&Operator> = ops.iter().collect();
    let node = TestNode::new();
    node.enable(&refs);

    let projected = node.manager.next_payees(4200, 8);
    assert_eq!(projected.len(), 8);
    for (height, payee) in &projected {
        assert_eq!(node.manager.next_payee(*height).as_ref(), Some(payee));
        node.manager.record_payment(payee, *height).unwrap();
    }
}

#[test]
fn test_payment_by_script_and_never_backwards() {
    let node = TestNode::new();
    let operator = Operator::new(1);
    node.enable(&[&operator]);
    let script = node.manager.registry().find_by_collateral(&operator.collateral).unwrap().payee_script();

    assert_eq!(node.manager.record_payment_to_script(&script, 4200).unwrap(), operator.collateral);
    node.manager.record_payment(&operator.collateral, 4100).unwrap();
    let record = node.manager.registry().find_by_collateral(&operator.collateral).unwrap();
    assert_eq!(record.last_paid_height, 4200);

    assert!(matches!(
        node.manager.record_payment_to_script(b"unknown", 4201),
        Err(MasternodeError::NotFound(_))
    ));
    assert!(matches!(
        node.manager.record_payment(&dummy_id(9), 4201),
        Err(MasternodeError::UnknownMasternode(_))
    ));
}

#[test]
fn test_ranks_are_one_based_and_consistent() {
    let ops = operators(5);
    let refs: Vec<&Operator> = ops.iter().collect();
    let node = TestNode::new();
    node.enable(&refs);
    let min_proto = node.manager.config().min_pose_protocol_version;

    let ranks = node.manager.masternode_ranks(4250, min_proto);
    assert_eq!(ranks.len(), 5);
    for (index, scored) in ranks.iter().enumerate() {
        assert_eq!(node.manager.masternode_rank(&scored.collateral, 4250, min_proto), Some(index + 1));
        let record = node.manager.masternode_by_rank(index + 1, 4250, min_proto).unwrap();
        assert_eq!(record.collateral, scored.collateral);
    }
    assert!(node.manager.masternode_by_rank(0, 4250, min_proto).is_none());
    assert!(node.manager.masternode_by_rank(6, 4250, min_proto).is_none());
    assert_eq!(node.manager.count_enabled(min_proto), 5);
    assert_eq!(node.manager.count_masternodes(min_proto), 5);
}

#[test]
fn test_random_pick_respects_exclusions() {
    let ops = operators(3);
    let refs: Vec<&Operator> = ops.iter().collect();
    let node = TestNode::new();
    node.enable(&refs);
    let min_proto = node.manager.config().min_protocol_version;

    let picked = node.manager.find_random_not_in(&[], min_proto).unwrap();
    assert_eq!(node.manager.find_random_not_in(&[], min_proto).unwrap(), picked);

    let everyone_but_last = vec![ops[0].collateral.clone(), ops[1].collateral.clone()];
    let record = node.manager.find_random_not_in(&everyone_but_last, min_proto).unwrap();
    assert_eq!(record.collateral, ops[2].collateral);

    let everyone: Vec<_> = ops.iter().map(|op| op.collateral.clone()).collect();
    assert!(node.manager.find_random_not_in(&everyone, min_proto).is_none());
}
