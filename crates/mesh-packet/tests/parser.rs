use mesh_packet::*;

#[test]
fn test_open_from_wire_json() {
    // As produced by a peer implementation: camelCase keys, optional fields
    // absent.
    let raw = r#"{"peerInfo":{"name":"node-b.somebiz.local.io","endpoint":"wss://node-b:4222","domains":["somebiz.local.io"],"peerToken":"s3cr3t"},"holdTime":45}"#;
    let open: OpenPacket = serde_json::from_str(raw).unwrap();
    assert_eq!(open.peer_info.name, "node-b.somebiz.local.io");
    assert_eq!(open.peer_info.peer_token.as_deref(), Some("s3cr3t"));
    assert_eq!(open.hold_time, Some(45));
}

#[test]
fn test_update_from_wire_json_defaults() {
    let raw = r#"{"peerInfo":{"name":"node-b","endpoint":"wss://node-b:4222"},"updates":[{"action":"add","route":{"name":"svc-x","protocol":"http","endpoint":"http://svc-x:8080"}},{"action":"remove","route":{"name":"svc-y","protocol":"tcp"}}]}"#;
    let update: UpdatePacket = serde_json::from_str(raw).unwrap();
    assert_eq!(update.updates.len(), 2);
    assert_eq!(update.updates[0].action, RouteAction::Add);
    assert!(update.updates[0].node_path.is_none());
    assert!(update.updates[1].route.endpoint.is_none());
    assert!(update.updates[0].route.tags.is_empty());
}

#[test]
fn test_request_with_traceparent_prefix() {
    let raw = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01\n{\"id\":3,\"method\":\"ibgp.keepalive\",\"params\":{\"peerInfo\":{\"name\":\"node-b\",\"endpoint\":\"wss://node-b:4222\"}}}";
    let (trace, payload) = decode_frame(raw);
    assert!(trace.is_some());
    let request: RpcRequest = serde_json::from_str(payload).unwrap();
    assert_eq!(request.method, METHOD_KEEPALIVE);
    let packet = Packet::from_request(&request.method, request.params).unwrap();
    assert!(matches!(packet, Packet::Keepalive(_)));
}

#[test]
fn test_request_without_traceparent_prefix() {
    let raw = r#"{"id":4,"method":"ibgp.close","params":{"peerInfo":{"name":"node-b","endpoint":"wss://node-b:4222"},"code":1000}}"#;
    let (trace, payload) = decode_frame(raw);
    assert!(trace.is_none());
    let request: RpcRequest = serde_json::from_str(payload).unwrap();
    let packet = Packet::from_request(&request.method, request.params).unwrap();
    match packet {
        Packet::Close(close) => {
            assert_eq!(close.code, CLOSE_NORMAL);
            assert!(close.reason.is_none());
        }
        other => panic!("expected close, got {other:?}"),
    }
}
