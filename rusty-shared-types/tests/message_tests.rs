use rusty_shared_types::wire::{decode_message, encode_message, CodecError, MAX_MESSAGE_SIZE};
use rusty_shared_types::*;

fn broadcast() -> MasternodeBroadcast {
    MasternodeBroadcast {
        collateral: MasternodeID(OutPoint::new([4; 32], 1)),
        service_addr: "10.1.2.3:16518".parse().unwrap(),
        collateral_pubkey: [5; 32],
        service_pubkey: [6; 32],
        protocol_version: 70206,
        sig_time: 1_700_000_000,
        signature: vec![9; 64],
        last_ping: None,
    }
}

#[test]
fn test_announcement_with_ping_survives_the_wire() {
    let mut mnb = broadcast();
    mnb.last_ping = Some(MasternodePing {
        collateral: mnb.collateral.clone(),
        block_hash: [7; 32],
        sig_time: mnb.sig_time + 600,
        signature: vec![8; 64],
    });
    let message = MasternodeMessage::Broadcast(mnb);
    assert_eq!(decode_message(&encode_message(&message).unwrap()).unwrap(), message);
}

#[test]
fn test_every_signed_field_changes_the_signing_bytes() {
    let original = broadcast();
    let variants = [
        MasternodeBroadcast { service_addr: "10.1.2.4:16518".parse().unwrap(), ..broadcast() },
        MasternodeBroadcast { collateral_pubkey: [1; 32], ..broadcast() },
        MasternodeBroadcast { service_pubkey: [1; 32], ..broadcast() },
        MasternodeBroadcast { protocol_version: 70207, ..broadcast() },
        MasternodeBroadcast { sig_time: 1_700_000_001, ..broadcast() },
        MasternodeBroadcast { collateral: MasternodeID(OutPoint::new([4; 32], 2)), ..broadcast() },
    ];
    for changed in &variants {
        assert_ne!(changed.signing_bytes(), original.signing_bytes());
    }
    // The signature itself is not signed, but it does distinguish messages.
    let resigned = MasternodeBroadcast { signature: vec![1; 64], ..broadcast() };
    assert_eq!(resigned.signing_bytes(), original.signing_bytes());
    assert_ne!(resigned.hash(), original.hash());
}

#[test]
fn test_oversized_payload_is_rejected() {
    let mut bytes = vec![wire::WIRE_VERSION];
    bytes.extend(std::iter::repeat(0u8).take(MAX_MESSAGE_SIZE + 1));
    assert!(matches!(decode_message(&bytes), Err(CodecError::MessageTooLarge { .. })));
}

#[test]
fn test_collateral_ordering_and_display() {
    let low = MasternodeID(OutPoint::new([1; 32], 9));
    let high = MasternodeID(OutPoint::new([2; 32], 0));
    assert!(low < high);
    assert!(MasternodeID(OutPoint::new([1; 32], 0)) < low);
    assert_eq!(low.to_string(), format!("{}-9", "01".repeat(32)));
}
