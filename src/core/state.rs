use crate::chain::EpochInfo;
use crate::key::ChainAddress;
use crate::key::Point;
use crate::net::peer::PeerId;

use std::collections::BTreeMap;
use std::collections::BTreeSet;

/// Verified identity of a committee member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeDetails {
    pub index: u64,
    pub public_key: Point,
}

/// Resolved identity and reachability of a committee member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeReference {
    pub address: ChainAddress,
    pub peer_id: PeerId,
    pub index: u64,
    pub public_key: Point,
    pub tm_connection: String,
    pub p2p_connection: String,
}

impl NodeReference {
    pub fn details(&self) -> NodeDetails {
        NodeDetails {
            index: self.index,
            public_key: self.public_key,
        }
    }
}

/// Connectivity-confirmed view of a committee.
///
/// Created empty when discovery for the epoch begins, `node_list` is only
/// ever replaced as a whole by a complete list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeRegister {
    pub all_connected: bool,
    pub node_list: Vec<NodeReference>,
}

impl NodeRegister {
    pub fn is_published(&self) -> bool {
        self.all_connected && !self.node_list.is_empty()
    }
}

/// Outcome of an observed ledger epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochTransition {
    /// Same or older epoch, nothing changed.
    Unchanged,
    Advanced {
        /// This node's committee became the current one.
        activated: bool,
        /// This node's committee is older than the current one.
        superseded: bool,
    },
}

/// Mutable state shared by the coordinator monitors.
///
/// Monitors copy what they need out of it, do I/O unlocked and
/// write results back in a short critical section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorState {
    pub self_epoch: u64,
    pub current_epoch: u64,
    pub is_new_committee: bool,
    pub is_whitelisted: bool,
    pub is_registered: bool,
    pub pss_running: bool,
    pub self_index: Option<u64>,
    pub registry: BTreeMap<u64, NodeRegister>,
    /// Epochs with a membership discovery task alive.
    discovering: BTreeSet<u64>,
}

impl CoordinatorState {
    pub fn new(self_epoch: u64, current_epoch: u64) -> Self {
        Self {
            self_epoch,
            current_epoch,
            is_new_committee: self_epoch > current_epoch,
            is_whitelisted: false,
            is_registered: false,
            pss_running: false,
            self_index: None,
            registry: BTreeMap::new(),
            discovering: BTreeSet::new(),
        }
    }

    /// Applies ledger's active epoch. Older values are ignored so that
    /// `current_epoch` never decreases.
    pub fn observe_epoch(&mut self, epoch: u64) -> EpochTransition {
        if epoch <= self.current_epoch {
            return EpochTransition::Unchanged;
        }
        self.current_epoch = epoch;

        let activated = self.self_epoch == epoch;
        if activated {
            self.is_new_committee = false;
        }
        EpochTransition::Advanced {
            activated,
            superseded: self.self_epoch < epoch,
        }
    }

    /// Records the handover flag, returns `true` on a rising edge only.
    pub fn observe_pss(&mut self, running: bool) -> bool {
        let rising = running && !self.pss_running;
        self.pss_running = running;
        rising
    }

    /// Adjacent committee this node must reach during a handover.
    /// `own` is the record of `self_epoch`.
    ///
    /// The incoming committee connects back to the outgoing one and vice versa.
    /// Returns `None` if the adjacent epoch is not set on the ledger.
    pub fn handover_target(&self, own: &EpochInfo) -> Option<u64> {
        let target = if self.is_new_committee {
            own.prev_epoch
        } else {
            own.next_epoch
        };
        (target != 0).then_some(target)
    }

    /// Marks discovery for `epoch` as started and creates its empty register.
    /// Returns `false` if discovery is already running or the register is published.
    pub fn begin_discovery(&mut self, epoch: u64) -> bool {
        if self.is_published(epoch) || !self.discovering.insert(epoch) {
            return false;
        }
        self.registry.entry(epoch).or_default();
        true
    }

    pub fn end_discovery(&mut self, epoch: u64) {
        self.discovering.remove(&epoch);
    }

    pub fn is_discovering(&self, epoch: u64) -> bool {
        self.discovering.contains(&epoch)
    }

    /// Replaces the register of `epoch` with a complete, connected list.
    pub fn publish(&mut self, epoch: u64, node_list: Vec<NodeReference>) {
        self.registry.insert(
            epoch,
            NodeRegister {
                all_connected: true,
                node_list,
            },
        );
        self.discovering.remove(&epoch);
    }

    pub fn is_published(&self, epoch: u64) -> bool {
        self.registry
            .get(&epoch)
            .is_some_and(NodeRegister::is_published)
    }

    pub fn node_list(&self, epoch: u64) -> Option<&[NodeReference]> {
        self.registry
            .get(&epoch)
            .filter(|r| r.is_published())
            .map(|r| r.node_list.as_slice())
    }

    /// Searches `epoch` register or, if `None`, every register.
    pub fn find_by_key(&self, key: &Point, epoch: Option<u64>) -> Option<&NodeReference> {
        let mut registers: Box<dyn Iterator<Item = &NodeRegister>> = match epoch {
            Some(epoch) => Box::new(self.registry.get(&epoch).into_iter()),
            None => Box::new(self.registry.values()),
        };
        registers.find_map(|r| r.node_list.iter().find(|n| n.public_key == *key))
    }

    pub fn find_by_address(&self, address: ChainAddress) -> Option<&NodeReference> {
        self.registry
            .values()
            .find_map(|r| r.node_list.iter().find(|n| n.address == address))
    }

    pub fn find_by_index(&self, epoch: u64, index: u64) -> Option<&NodeReference> {
        self.registry
            .get(&epoch)?
            .node_list
            .iter()
            .find(|n| n.index == index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Pair;

    fn reference(index: u64) -> NodeReference {
        let public_key = *Pair::generate().public();
        NodeReference {
            address: public_key.address(),
            peer_id: PeerId::from_public_key(&public_key),
            index,
            public_key,
            tm_connection: format!("id{index}@10.0.0.{index}:26656"),
            p2p_connection: String::new(),
        }
    }

    #[test]
    fn epoch_is_monotonic() {
        let mut state = CoordinatorState::new(5, 5);
        assert!(!state.is_new_committee);

        let mut seen = vec![];
        for epoch in [5, 4, 6, 3, 6, 7, 1] {
            state.observe_epoch(epoch);
            seen.push(state.current_epoch);
        }
        assert_eq!(seen, vec![5, 5, 6, 6, 6, 7, 7]);
    }

    #[test]
    fn epoch_transitions() {
        let mut state = CoordinatorState::new(6, 5);
        assert!(state.is_new_committee);

        assert_eq!(
            state.observe_epoch(6),
            EpochTransition::Advanced {
                activated: true,
                superseded: false
            }
        );
        assert!(!state.is_new_committee);
        assert_eq!(state.observe_epoch(6), EpochTransition::Unchanged);
        assert_eq!(
            state.observe_epoch(7),
            EpochTransition::Advanced {
                activated: false,
                superseded: true
            }
        );
    }

    #[test]
    fn pss_rising_edges() {
        let mut state = CoordinatorState::new(1, 1);
        let fired: Vec<usize> = [false, true, true, false, true]
            .into_iter()
            .enumerate()
            .filter(|(_, running)| state.observe_pss(*running))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(fired, vec![1, 4]);
    }

    #[test]
    fn handover_direction() {
        let outgoing = EpochInfo {
            id: 5,
            n: 4,
            k: 3,
            t: 1,
            prev_epoch: 4,
            next_epoch: 6,
        };
        let incoming = EpochInfo {
            id: 6,
            prev_epoch: 5,
            next_epoch: 0,
            ..outgoing
        };
        // Node of the outgoing committee reaches forward.
        assert_eq!(CoordinatorState::new(5, 5).handover_target(&outgoing), Some(6));
        // Node of the incoming committee reaches back.
        assert_eq!(CoordinatorState::new(6, 5).handover_target(&incoming), Some(5));

        let last = EpochInfo {
            next_epoch: 0,
            ..outgoing
        };
        assert_eq!(CoordinatorState::new(5, 5).handover_target(&last), None);
    }

    #[test]
    fn discovery_runs_once_per_epoch() {
        let mut state = CoordinatorState::new(1, 1);
        assert!(state.begin_discovery(1));
        assert!(!state.begin_discovery(1));
        assert_eq!(state.registry.get(&1), Some(&NodeRegister::default()));
        assert!(state.node_list(1).is_none());

        state.publish(1, vec![reference(1), reference(2)]);
        assert!(!state.is_discovering(1));
        assert!(!state.begin_discovery(1));
        assert_eq!(state.node_list(1).map(<[_]>::len), Some(2));

        // Failed discovery may be restarted.
        assert!(state.begin_discovery(2));
        state.end_discovery(2);
        assert!(state.begin_discovery(2));
    }

    #[test]
    fn registry_lookups() {
        let mut state = CoordinatorState::new(1, 1);
        let a = reference(1);
        let b = reference(2);
        state.publish(1, vec![a.clone()]);
        state.publish(2, vec![b.clone()]);

        assert_eq!(state.find_by_key(&a.public_key, None), Some(&a));
        assert_eq!(state.find_by_key(&b.public_key, Some(2)), Some(&b));
        assert_eq!(state.find_by_key(&b.public_key, Some(1)), None);
        assert_eq!(state.find_by_key(&a.public_key, Some(9)), None);

        assert_eq!(state.find_by_address(b.address), Some(&b));
        assert_eq!(state.find_by_index(1, 1), Some(&a));
        assert_eq!(state.find_by_index(1, 2), None);
    }
}
