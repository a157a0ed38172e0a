mod common;

use common::*;
use rusty_masternode::{MasternodeError, Outbound};
use rusty_shared_types::{MasternodeMessage, MasternodeStatus, SyncScope};

fn sent_to(node: &mut TestNode) -> Vec<MasternodeMessage> {
    node.drain()
        .into_iter()
        .filter_map(|outbound| match outbound {
            Outbound::Send { message, .. } => Some(message),
            Outbound::Relay(_) => None,
        })
        .collect()
}

#[test]
fn test_repeated_full_list_request_is_not_answered() {
    let mut node = TestNode::new();
    let (a, b) = (Operator::new(1), Operator::new(2));
    node.enable(&[&a, &b]);
    node.drain();

    assert_eq!(node.manager.handle_sync_request(&peer(5), &SyncScope::FullList).unwrap(), 2);
    let commands: Vec<_> = sent_to(&mut node).iter().map(MasternodeMessage::command).collect();
    assert_eq!(commands, vec!["mnb", "mnp", "mnb", "mnp", "ssc"]);

    node.clock.advance(60);
    node.manager.process_message(peer(5), MasternodeMessage::SyncRequest(SyncScope::FullList));
    assert!(node.drain().is_empty());
    assert!(matches!(
        node.manager.handle_sync_request(&peer(5), &SyncScope::FullList),
        Err(MasternodeError::ThrottleViolation)
    ));
    assert_eq!(node.transport.misbehavior_score(&peer(5).addr), 0);

    // Another peer is answered.
    assert_eq!(node.manager.handle_sync_request(&peer(6), &SyncScope::FullList).unwrap(), 2);

    node.clock.advance(node.manager.config().dseg_update_secs);
    assert_eq!(node.manager.handle_sync_request(&peer(5), &SyncScope::FullList).unwrap(), 2);
}

#[test]
fn test_full_sync_converges_registries() {
    let mut source = TestNode::new();
    let ops: Vec<Operator> = (1..=4).map(Operator::new).collect();
    let refs: Vec<&Operator> = ops.iter().collect();
    source.enable(&refs);
    source.drain();

    let mut target = TestNode::build(regtest_config(), source.chain.clone(), source.clock.clone(), None);
    let source_addr = peer(9).addr;
    target.manager.request_full_list(source_addr).unwrap();
    assert!(matches!(target.manager.request_full_list(source_addr), Err(MasternodeError::ThrottleViolation)));
    let request = match sent_to(&mut target).pop() {
        Some(message @ MasternodeMessage::SyncRequest(SyncScope::FullList)) => message,
        other => panic!("expected a full list request, got {:?}", other),
    };

    source.manager.process_message(peer(2), request);
    for message in sent_to(&mut source) {
        target.manager.process_message(peer(9), message);
    }

    assert_eq!(target.manager.registry().len(), ops.len());
    for op in &ops {
        assert_eq!(target.status(&op.collateral), Some(MasternodeStatus::Enabled));
    }
    assert_eq!(target.transport.misbehavior_score(&peer(9).addr), 0);
    for height in 4200..4210 {
        assert_eq!(target.manager.next_payee(height), source.manager.next_payee(height));
    }
}

#[test]
fn test_single_entry_request() {
    let mut node = TestNode::new();
    let (a, b) = (Operator::new(1), Operator::new(2));
    node.enable(&[&a, &b]);
    node.drain();

    let scope = SyncScope::Entry(b.collateral.clone());
    assert_eq!(node.manager.handle_sync_request(&peer(5), &scope).unwrap(), 1);
    let sent = sent_to(&mut node);
    assert!(matches!(&sent[0], MasternodeMessage::Broadcast(mnb) if mnb.collateral == b.collateral));
    assert!(sent.iter().all(|message| message.command() != "ssc"));

    assert!(node.manager.handle_sync_request(&peer(5), &scope).is_err());
    assert_eq!(node.manager.handle_sync_request(&peer(5), &SyncScope::Entry(a.collateral.clone())).unwrap(), 1);
    assert_eq!(node.manager.handle_sync_request(&peer(5), &SyncScope::Entry(dummy_id(9))).unwrap(), 0);
}

#[test]
fn test_unconfirmed_entries_are_not_shared() {
    let mut node = TestNode::new();
    let (confirmed, pending) = (Operator::new(1), Operator::new(2));
    node.enable(&[&confirmed]);
    node.announce(&pending, 0);
    node.drain();

    assert_eq!(node.manager.handle_sync_request(&peer(5), &SyncScope::FullList).unwrap(), 1);
    let shared: Vec<_> = sent_to(&mut node)
        .into_iter()
        .filter_map(|message| match message {
            MasternodeMessage::Broadcast(mnb) => Some(mnb.collateral),
            _ => None,
        })
        .collect();
    assert_eq!(shared, vec![confirmed.collateral.clone()]);
}

#[test]
fn test_connected_peer_is_asked_for_the_list_once_per_interval() {
    let mut node = TestNode::new();
    let remote = peer(9).addr;

    assert!(node.manager.on_peer_connected(remote));
    let sent: Vec<_> = node
        .drain()
        .into_iter()
        .filter_map(|outbound| match outbound {
            Outbound::Send { peer, message } => Some((peer, message)),
            Outbound::Relay(_) => None,
        })
        .collect();
    assert_eq!(sent, vec![(remote, MasternodeMessage::SyncRequest(SyncScope::FullList))]);

    // Reconnecting right away does not ask again.
    assert!(!node.manager.on_peer_connected(remote));
    assert!(node.drain().is_empty());
    assert!(node.manager.on_peer_connected(peer(10).addr));
}
