//! Topology self-integration.
//!
//! Evaluated once per dispatch tick. Decides whether the node should dial a
//! known candidate, ask a peer for more addresses, or do nothing, based on
//! how many peers it currently holds. The controller is pure: the registry
//! feeds it the current peer ids and candidate list and executes the action
//! it returns.

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

use crate::constants::integration::*;
use crate::network::peer_connection::PeerId;
use crate::network::wire::PeerAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IntegrationLevel {
    /// No peers at all; wait for inbound connections or manual seeding
    Isolated,
    UnderIntegrated,
    Integrated,
    /// At `max_clients`; no further opportunistic connections
    Saturated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrationAction {
    Idle,
    Connect(PeerAddr),
    RequestPeers(PeerId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Cooldown {
    /// REQUESTPEER while under-integrated
    Urgent,
    /// Churn resistance once integrated
    Opportunistic,
    /// Pause after a failed dial
    Retry,
}

const RETRY_COOLDOWN_SECS: f64 = 1.0;

#[derive(Debug)]
pub struct IntegrationController {
    min_integration: usize,
    max_clients: usize,
    cooldowns: HashMap<Cooldown, f64>,
    integrated: bool,
}

impl IntegrationController {
    pub fn new(min_integration: usize, max_clients: usize) -> Self {
        let min_integration = min_integration.max(1);
        Self {
            min_integration,
            max_clients: max_clients.max(min_integration),
            cooldowns: HashMap::new(),
            integrated: false,
        }
    }

    pub fn is_integrated(&self) -> bool {
        self.integrated
    }

    pub fn level(&self, peers: usize) -> IntegrationLevel {
        if peers == 0 {
            IntegrationLevel::Isolated
        } else if peers < self.min_integration {
            IntegrationLevel::UnderIntegrated
        } else if peers < self.max_clients {
            IntegrationLevel::Integrated
        } else {
            IntegrationLevel::Saturated
        }
    }

    /// Quadratic in the fill ratio, reaching ~100 s near `max_clients`
    pub fn opportunistic_cooldown(&self, peers: usize) -> f64 {
        let ratio = peers as f64 / self.max_clients as f64;
        OPPORTUNISTIC_COOLDOWN_CEILING_SECS * ratio * ratio
    }

    fn ready(&self, cooldown: Cooldown) -> bool {
        self.cooldowns.get(&cooldown).copied().unwrap_or(0.0) <= 0.0
    }

    fn reset(&mut self, cooldown: Cooldown, secs: f64) {
        self.cooldowns.insert(cooldown, secs);
    }

    /// The last `Connect` action failed; back off before dialing again.
    pub fn connect_failed(&mut self) {
        self.reset(Cooldown::Retry, RETRY_COOLDOWN_SECS);
    }

    pub fn tick<R: Rng + ?Sized>(
        &mut self,
        elapsed: Duration,
        peers: &[PeerId],
        candidates: &[PeerAddr],
        rng: &mut R,
    ) -> IntegrationAction {
        let delta = elapsed.as_secs_f64();
        for remaining in self.cooldowns.values_mut() {
            *remaining -= delta;
        }

        let level = self.level(peers.len());
        let integrated = level >= IntegrationLevel::Integrated;
        if integrated != self.integrated {
            if integrated {
                info!("🌐 Became integrated ({} peers)", peers.len());
            } else {
                info!("⚠️ Lost integration ({} peers)", peers.len());
            }
            self.integrated = integrated;
        }

        match level {
            IntegrationLevel::Isolated | IntegrationLevel::Saturated => IntegrationAction::Idle,
            IntegrationLevel::UnderIntegrated => {
                if !candidates.is_empty() {
                    if !self.ready(Cooldown::Retry) {
                        return IntegrationAction::Idle;
                    }
                    return candidates
                        .choose(rng)
                        .cloned()
                        .map(IntegrationAction::Connect)
                        .unwrap_or(IntegrationAction::Idle);
                }
                if !self.ready(Cooldown::Urgent) {
                    return IntegrationAction::Idle;
                }
                let secs = rng.gen_range(URGENT_COOLDOWN_MIN_SECS..URGENT_COOLDOWN_MAX_SECS);
                self.reset(Cooldown::Urgent, secs);
                peers
                    .choose(rng)
                    .copied()
                    .map(IntegrationAction::RequestPeers)
                    .unwrap_or(IntegrationAction::Idle)
            }
            IntegrationLevel::Integrated => {
                if !self.ready(Cooldown::Opportunistic) {
                    return IntegrationAction::Idle;
                }
                let secs = self.opportunistic_cooldown(peers.len());
                self.reset(Cooldown::Opportunistic, secs);
                if let Some(addr) = candidates.choose(rng) {
                    IntegrationAction::Connect(addr.clone())
                } else {
                    peers
                        .choose(rng)
                        .copied()
                        .map(IntegrationAction::RequestPeers)
                        .unwrap_or(IntegrationAction::Idle)
                }
            }
        }
    }
}

impl Default for IntegrationController {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTEGRATION, DEFAULT_MAX_CLIENTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ids(n: usize) -> Vec<PeerId> {
        (0..n).collect()
    }

    fn addr(port: u16) -> PeerAddr {
        PeerAddr::new("127.0.0.1", port)
    }

    #[test]
    fn test_levels() {
        let ctl = IntegrationController::new(5, 50);
        assert_eq!(ctl.level(0), IntegrationLevel::Isolated);
        assert_eq!(ctl.level(1), IntegrationLevel::UnderIntegrated);
        assert_eq!(ctl.level(4), IntegrationLevel::UnderIntegrated);
        assert_eq!(ctl.level(5), IntegrationLevel::Integrated);
        assert_eq!(ctl.level(49), IntegrationLevel::Integrated);
        assert_eq!(ctl.level(50), IntegrationLevel::Saturated);
    }

    #[test]
    fn test_isolated_node_waits() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut ctl = IntegrationController::default();
        let action = ctl.tick(Duration::from_secs(60), &[], &[addr(1)], &mut rng);
        assert_eq!(action, IntegrationAction::Idle);
    }

    #[test]
    fn test_under_integrated_dials_candidates() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut ctl = IntegrationController::new(5, 50);
        let candidates = vec![addr(1), addr(2)];
        for _ in 0..10 {
            match ctl.tick(Duration::from_millis(100), &ids(4), &candidates, &mut rng) {
                IntegrationAction::Connect(a) => assert!(candidates.contains(&a)),
                other => panic!("expected Connect, got {:?}", other),
            }
        }
        assert!(!ctl.is_integrated());
    }

    #[test]
    fn test_failed_dial_backs_off() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut ctl = IntegrationController::new(5, 50);
        let candidates = vec![addr(1)];
        assert!(matches!(
            ctl.tick(Duration::ZERO, &ids(1), &candidates, &mut rng),
            IntegrationAction::Connect(_)
        ));
        ctl.connect_failed();
        assert_eq!(
            ctl.tick(Duration::from_millis(500), &ids(1), &candidates, &mut rng),
            IntegrationAction::Idle
        );
        assert!(matches!(
            ctl.tick(Duration::from_millis(600), &ids(1), &candidates, &mut rng),
            IntegrationAction::Connect(_)
        ));
    }

    #[test]
    fn test_under_integrated_requests_peers_with_cooldown() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut ctl = IntegrationController::new(5, 50);
        let peers = ids(3);

        match ctl.tick(Duration::ZERO, &peers, &[], &mut rng) {
            IntegrationAction::RequestPeers(id) => assert!(peers.contains(&id)),
            other => panic!("expected RequestPeers, got {:?}", other),
        }
        // Cooldown is at least 2 s
        assert_eq!(
            ctl.tick(Duration::from_millis(1900), &peers, &[], &mut rng),
            IntegrationAction::Idle
        );
        // ...and below 5 s
        assert!(matches!(
            ctl.tick(Duration::from_millis(3200), &peers, &[], &mut rng),
            IntegrationAction::RequestPeers(_)
        ));
    }

    #[test]
    fn test_integrated_is_opportunistic() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut ctl = IntegrationController::new(5, 50);
        let peers = ids(25);

        assert!(matches!(
            ctl.tick(Duration::ZERO, &peers, &[addr(9)], &mut rng),
            IntegrationAction::Connect(_)
        ));
        assert!(ctl.is_integrated());

        // 100 * (25/50)^2 = 25 s
        assert_eq!(ctl.opportunistic_cooldown(25), 25.0);
        assert_eq!(
            ctl.tick(Duration::from_secs(24), &peers, &[addr(9)], &mut rng),
            IntegrationAction::Idle
        );
        assert!(matches!(
            ctl.tick(Duration::from_secs(2), &peers, &[], &mut rng),
            IntegrationAction::RequestPeers(_)
        ));
    }

    #[test]
    fn test_saturated_does_nothing() {
        let mut rng = StdRng::seed_from_u64(6);
        let mut ctl = IntegrationController::new(5, 50);
        for _ in 0..5 {
            assert_eq!(
                ctl.tick(Duration::from_secs(1000), &ids(50), &[addr(1)], &mut rng),
                IntegrationAction::Idle
            );
        }
        assert!(ctl.is_integrated());
    }

    #[test]
    fn test_losing_peers_drops_integration() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut ctl = IntegrationController::new(5, 50);
        ctl.tick(Duration::ZERO, &ids(5), &[], &mut rng);
        assert!(ctl.is_integrated());
        ctl.tick(Duration::ZERO, &ids(4), &[], &mut rng);
        assert!(!ctl.is_integrated());
    }

    #[test]
    fn test_cooldown_approaches_ceiling() {
        let ctl = IntegrationController::new(5, 50);
        assert!(ctl.opportunistic_cooldown(5) < 2.0);
        assert!(ctl.opportunistic_cooldown(49) > 95.0);
        assert!(ctl.opportunistic_cooldown(49) < 100.0);
    }
}
