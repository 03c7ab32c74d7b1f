//! Wire-format tests for signaling payloads

use peerlink::types::{SessionConfig, SignalPayload};

#[test]
fn test_offer_serialize() {
    let msg = SignalPayload::Offer {
        peer_id: "peer1".to_string(),
        target_peer_id: "peer2".to_string(),
        sdp: "v=0\r\n...".to_string(),
    };
    let json = serde_json::to_string(&msg).unwrap();
    assert!(json.contains("\"type\":\"offer\""));
    assert!(json.contains("\"peerId\":\"peer1\""));
    assert!(json.contains("\"targetPeerId\":\"peer2\""));
}

#[test]
fn test_answer_roundtrip() {
    let original = SignalPayload::Answer {
        peer_id: "peer1".to_string(),
        target_peer_id: "peer2".to_string(),
        sdp: "v=0\r\ntest sdp".to_string(),
    };
    let json = serde_json::to_string(&original).unwrap();
    let parsed: SignalPayload = serde_json::from_str(&json).unwrap();

    match parsed {
        SignalPayload::Answer {
            peer_id,
            target_peer_id,
            sdp,
        } => {
            assert_eq!(peer_id, "peer1");
            assert_eq!(target_peer_id, "peer2");
            assert_eq!(sdp, "v=0\r\ntest sdp");
        }
        _ => panic!("wrong message type"),
    }
}

#[test]
fn test_candidate_serialize() {
    let msg = SignalPayload::Candidate {
        peer_id: "peer1".to_string(),
        target_peer_id: "peer2".to_string(),
        candidate: "candidate:1 1 UDP 2122252543 192.0.2.1 44442 typ host".to_string(),
        sdp_m_line_index: Some(0),
        sdp_mid: Some("0".to_string()),
    };
    let json = serde_json::to_string(&msg).unwrap();
    assert!(json.contains("\"type\":\"candidate\""));
    assert!(json.contains("\"sdpMLineIndex\":0"));
    assert!(json.contains("\"sdpMid\":\"0\""));
}

#[test]
fn test_candidate_roundtrip_without_optionals() {
    let original = SignalPayload::Candidate {
        peer_id: "peer1".to_string(),
        target_peer_id: "peer2".to_string(),
        candidate: "candidate:1 1 UDP 1 192.0.2.1 3478 typ host".to_string(),
        sdp_m_line_index: None,
        sdp_mid: None,
    };
    let json = serde_json::to_string(&original).unwrap();
    let parsed: SignalPayload = serde_json::from_str(&json).unwrap();

    match parsed {
        SignalPayload::Candidate {
            sdp_m_line_index,
            sdp_mid,
            ..
        } => {
            assert_eq!(sdp_m_line_index, None);
            assert_eq!(sdp_mid, None);
        }
        _ => panic!("wrong message type"),
    }
}

#[test]
fn test_unknown_signal_type_rejected() {
    let result = serde_json::from_str::<SignalPayload>(r#"{"type":"hello","peerId":"x"}"#);
    assert!(result.is_err());
}

#[test]
fn test_session_config_default() {
    let config = SessionConfig::default();
    assert_eq!(config.channel_label, "data");
    assert_eq!(config.buffered_amount_limit, 1);
    assert_eq!(config.stun_servers.len(), 3);
    assert!(!config.debug);
}
