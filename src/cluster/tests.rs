//! Cluster Module Tests
//!
//! Validates ring placement and membership state handling.
//!
//! ## Test Scopes
//! - **Ring**: deterministic hashing, lookup with wrap-around, successor
//!   walks, snapshot/replace round-trips.
//! - **State**: membership mutation, the smallest-id leader rule, and
//!   follower views converging onto the leader's snapshot.

#[cfg(test)]
mod tests {
    use crate::cluster::ring::{hash64, placement_key, HashRing};
    use crate::cluster::state::ClusterState;
    use crate::cluster::types::NodeInfo;

    fn node(id: &str, addr: &str) -> NodeInfo {
        NodeInfo {
            id: id.to_string(),
            addr: addr.to_string(),
        }
    }

    // ============================================================
    // HASHING
    // ============================================================

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(hash64("u:|:k"), hash64("u:|:k"));
        assert_ne!(hash64("u:|:k1"), hash64("u:|:k2"));
    }

    #[test]
    fn test_placement_key_uses_fixed_separator() {
        assert_eq!(placement_key("tenant", "key"), "tenant:|:key");
    }

    // ============================================================
    // RING LOOKUP
    // ============================================================

    #[test]
    fn test_lookup_on_empty_ring_returns_none() {
        let ring = HashRing::new(10);
        assert!(ring.lookup("anything").is_none());
        assert!(ring.successors("anything", 3).is_empty());
    }

    #[test]
    fn test_single_node_owns_every_key() {
        let mut ring = HashRing::new(10);
        ring.add_node(node("a", "127.0.0.1:8080"));

        for i in 0..100 {
            let owner = ring.lookup(&format!("key-{}", i)).unwrap();
            assert_eq!(owner.id, "a");
        }
    }

    #[test]
    fn test_lookup_agrees_with_successor_walk() {
        let mut ring = HashRing::new(10);
        ring.add_node(node("a", "127.0.0.1:8080"));
        ring.add_node(node("b", "127.0.0.1:8081"));
        ring.add_node(node("c", "127.0.0.1:8082"));

        for i in 0..200 {
            let key = placement_key("u", &format!("key-{}", i));
            let owner = ring.lookup(&key).unwrap();
            let walk = ring.successors(&key, 3);
            assert_eq!(owner.id, walk[0].id, "lookup must equal walk start");
        }
    }

    #[test]
    fn test_successors_are_distinct_and_capped() {
        let mut ring = HashRing::new(10);
        ring.add_node(node("a", "127.0.0.1:8080"));
        ring.add_node(node("b", "127.0.0.1:8081"));
        ring.add_node(node("c", "127.0.0.1:8082"));

        let three = ring.successors("some-key", 3);
        assert_eq!(three.len(), 3);
        let mut ids: Vec<&str> = three.iter().map(|n| n.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 3, "successors must be distinct nodes");

        // Asking for more than the member count exhausts the ring.
        let ten = ring.successors("some-key", 10);
        assert_eq!(ten.len(), 3);
    }

    #[test]
    fn test_successor_order_depends_only_on_ring_contents() {
        let build = || {
            let mut ring = HashRing::new(10);
            ring.add_node(node("a", "127.0.0.1:8080"));
            ring.add_node(node("b", "127.0.0.1:8081"));
            ring.add_node(node("c", "127.0.0.1:8082"));
            ring
        };
        let first = build();
        let second = build();

        for i in 0..50 {
            let key = format!("key-{}", i);
            let ids1: Vec<String> = first.successors(&key, 3).into_iter().map(|n| n.id).collect();
            let ids2: Vec<String> = second.successors(&key, 3).into_iter().map(|n| n.id).collect();
            assert_eq!(ids1, ids2);
        }
    }

    // ============================================================
    // RING MUTATION
    // ============================================================

    #[test]
    fn test_remove_node_drops_all_positions() {
        let mut ring = HashRing::new(10);
        ring.add_node(node("a", "127.0.0.1:8080"));
        ring.add_node(node("b", "127.0.0.1:8081"));
        assert_eq!(ring.snapshot().len(), 20);

        ring.remove_node("a");
        assert_eq!(ring.snapshot().len(), 10);
        for i in 0..100 {
            assert_eq!(ring.lookup(&format!("k{}", i)).unwrap().id, "b");
        }
    }

    #[test]
    fn test_re_adding_a_node_replaces_its_positions() {
        let mut ring = HashRing::new(10);
        ring.add_node(node("a", "127.0.0.1:8080"));
        ring.add_node(node("a", "127.0.0.1:9999"));

        assert_eq!(ring.snapshot().len(), 10);
        for node in ring.snapshot().values() {
            assert_eq!(node.addr, "127.0.0.1:9999");
        }
    }

    #[test]
    fn test_snapshot_replace_preserves_ownership() {
        let mut original = HashRing::new(10);
        original.add_node(node("a", "127.0.0.1:8080"));
        original.add_node(node("b", "127.0.0.1:8081"));
        original.add_node(node("c", "127.0.0.1:8082"));

        let mut rebuilt = HashRing::new(3);
        rebuilt.replace(&original.snapshot(), 10);

        for i in 0..200 {
            let key = format!("key-{}", i);
            assert_eq!(
                original.lookup(&key).unwrap().id,
                rebuilt.lookup(&key).unwrap().id
            );
            let walk1: Vec<String> = original.successors(&key, 3).into_iter().map(|n| n.id).collect();
            let walk2: Vec<String> = rebuilt.successors(&key, 3).into_iter().map(|n| n.id).collect();
            assert_eq!(walk1, walk2);
        }
    }

    #[test]
    fn test_replace_skips_unparsable_positions() {
        let mut ring = HashRing::new(10);
        ring.add_node(node("a", "127.0.0.1:8080"));
        let mut snapshot = ring.snapshot();
        snapshot.insert("not-a-number".to_string(), node("x", "127.0.0.1:1"));

        let mut rebuilt = HashRing::new(10);
        rebuilt.replace(&snapshot, 10);
        assert_eq!(rebuilt.snapshot().len(), 10);
        assert_eq!(rebuilt.lookup("k").unwrap().id, "a");
    }

    // ============================================================
    // CLUSTER STATE
    // ============================================================

    #[test]
    fn test_new_state_contains_self() {
        let state = ClusterState::new(node("a", "127.0.0.1:8080"), 10);
        let members = state.members();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].id, "a");
        assert!(state.is_leader());
    }

    #[test]
    fn test_members_are_sorted_by_id() {
        let state = ClusterState::new(node("m", "127.0.0.1:8080"), 10);
        state.add(node("z", "127.0.0.1:8081"));
        state.add(node("a", "127.0.0.1:8082"));

        let ids: Vec<String> = state.members().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["a", "m", "z"]);
    }

    #[test]
    fn test_leader_is_smallest_id() {
        let state = ClusterState::new(node("b", "127.0.0.1:8080"), 10);
        assert!(state.is_leader());

        state.add(node("c", "127.0.0.1:8081"));
        assert!(state.is_leader());

        state.add(node("a", "127.0.0.1:8082"));
        assert!(!state.is_leader());

        state.remove("a");
        assert!(state.is_leader());
    }

    #[test]
    fn test_add_existing_member_is_noop() {
        let state = ClusterState::new(node("a", "127.0.0.1:8080"), 10);
        state.add(node("b", "127.0.0.1:8081"));
        state.add(node("b", "127.0.0.1:9999"));

        let members = state.members();
        assert_eq!(members.len(), 2);
        assert_eq!(members[1].addr, "127.0.0.1:8081");
    }

    #[test]
    fn test_follower_replace_matches_leader_ownership() {
        let leader = ClusterState::new(node("a", "127.0.0.1:8080"), 10);
        leader.add(node("b", "127.0.0.1:8081"));
        leader.add(node("c", "127.0.0.1:8082"));

        let follower = ClusterState::new(node("b", "127.0.0.1:8081"), 10);
        follower.replace(&leader.snapshot());

        assert_eq!(follower.members().len(), 3);
        assert_eq!(follower.replicas(), 10);
        for i in 0..200 {
            let key = placement_key("u", &format!("key-{}", i));
            assert_eq!(
                leader.lookup_owner(&key).unwrap().id,
                follower.lookup_owner(&key).unwrap().id,
                "follower must route key {} like the leader",
                key
            );
        }
    }

    #[test]
    fn test_snapshot_serializes_to_wire_shape() {
        let state = ClusterState::new(node("a", "127.0.0.1:8080"), 4);
        let value = serde_json::to_value(state.snapshot()).unwrap();

        assert_eq!(value["replicas"], 4);
        assert_eq!(value["nodes"][0]["id"], "a");
        assert_eq!(value["ring"].as_object().unwrap().len(), 4);
    }
}
