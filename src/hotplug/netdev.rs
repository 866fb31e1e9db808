//! Netdev hotplug handling and the netdev-move routine (§4.4 "Netdev
//! handling" / "Netdev-move routine"), grounded on `hotplug_netdev_move`
//! and the net branch of `hotplug_handle_uevent_cb` in `daemon/hotplug.c`.

use std::time::Duration;

use super::rename::{kind_from_devtype, rename_uevent, RenameCounters};
use super::timer::TimerWheel;
use super::uevent::{Action, Uevent};
use crate::container::{ContainerRegistry, PnetCfg};
use crate::error::HotplugResult;
use crate::registry::ClaimRegistry;

const SETTLE_INTERVAL: Duration = Duration::from_millis(100);

/// Network helpers consumed by the router (§6): MAC lookup, wifi
/// detection, interface rename and netns re-injection of a uevent.
pub trait NetHelpers {
    fn get_mac_by_ifname(&self, ifname: &str) -> Option<[u8; 6]>;
    fn is_wifi(&self, ifname: &str) -> bool;
    fn rename_ifi(&self, old: &str, new: &str) -> HotplugResult<()>;
    fn inject_into_netns(&self, ev: &Uevent, pid: i32, has_userns: bool);
}

pub struct NetSettleState {
    pub ev: Uevent,
}

/// On `add`/`net`/non-virtual devpath: tracks the interface and arms the
/// 100ms settle timer that eventually triggers the move routine.
pub fn handle_net_add(
    ev: &Uevent,
    physical_netifs: &mut Vec<String>,
    timers: &mut TimerWheel<NetSettleState>,
) {
    if ev.action != Action::Add || ev.subsystem != "net" {
        return;
    }
    if ev.devpath.contains("virtual") {
        log::debug!("netdev {:?} is virtual, skipping move", ev.ifname);
        return;
    }
    if let Some(ifname) = &ev.ifname {
        physical_netifs.push(ifname.clone());
    }
    timers.arm(SETTLE_INTERVAL, true, NetSettleState { ev: ev.clone() });
}

/// Runs one tick of every due settle timer: waits for a wlan interface
/// to become sysfs-observable, then performs the move and cancels.
pub fn poll_netdev_settle_timers<R: ContainerRegistry, N: NetHelpers>(
    timers: &mut TimerWheel<NetSettleState>,
    registry: &mut ClaimRegistry,
    containers: &R,
    net: &N,
    physical_netifs: &mut Vec<String>,
    counters: &mut RenameCounters,
) {
    // fire_due can't hold `&mut registry`/`counters` across the closure
    // boundary cleanly alongside TimerWheel's own borrow, so collect due
    // events first and run the move routine afterward.
    let mut ready = Vec::new();
    timers.fire_due(|_, state| {
        let ifname = match &state.ev.ifname {
            Some(n) => n.clone(),
            None => return false,
        };
        if state.ev.devtype == "wlan" && !net.is_wifi(&ifname) {
            return true;
        }
        ready.push(state.ev.clone());
        false
    });

    for ev in ready {
        netdev_move(&ev, registry, containers, net, physical_netifs, counters);
    }
}

/// The six-step netdev-move routine. Never returns an error to the
/// caller: every failure mode is an "abort with warning, drop the
/// event" per §5's propagation policy.
pub fn netdev_move<R: ContainerRegistry, N: NetHelpers>(
    ev: &Uevent,
    registry: &mut ClaimRegistry,
    containers: &R,
    net: &N,
    physical_netifs: &mut Vec<String>,
    counters: &mut RenameCounters,
) -> HotplugResult<()> {
    let ifname = match &ev.ifname {
        Some(n) => n.clone(),
        None => {
            log::warn!("netdev_move: uevent carries no interface name");
            return Ok(());
        }
    };

    // 1. read MAC
    let mac = match net.get_mac_by_ifname(&ifname) {
        Some(m) => m,
        None => {
            log::warn!("netdev_move: no MAC for {}, aborting", ifname);
            return Ok(());
        }
    };

    // 2. match against netdev claims, or fall back to c0
    let (target, pnet_cfg) = match registry.find_netdev_by_mac(mac) {
        Some(claim) => (claim.container, claim.pnet_cfg.clone()),
        None => (
            containers.c0(),
            PnetCfg { ifi_name: ifname.clone(), mac_filter: false },
        ),
    };

    let container = match containers.get(target) {
        Some(c) => c,
        None => {
            log::warn!("netdev_move: target container handle is stale");
            return Ok(());
        }
    };

    // 3. state check
    if !container.state().accepts_netdev_move() {
        log::warn!("netdev_move: target container {} not in a movable state", container.name());
        return Ok(());
    }

    // 4. rename-before-move
    let kind = kind_from_devtype(&ev.devtype);
    let new_name = counters.rename_ifi_new(kind);
    let final_ev = match net.rename_ifi(&ifname, &new_name) {
        Ok(()) => {
            if let Some(slot) = physical_netifs.iter_mut().find(|n| **n == ifname) {
                *slot = new_name.clone();
            }
            rename_uevent(ev, &ifname, &new_name)
        }
        Err(e) => {
            log::warn!("netdev_move: rename {} -> {} failed: {}, using original event", ifname, new_name, e);
            ev.clone()
        }
    };

    // 5. move into the target's netns
    container.add_net_iface(&pnet_cfg, false);

    // 6. MAC-filter (bridge) claims stop here; otherwise re-inject.
    if pnet_cfg.mac_filter {
        return Ok(());
    }
    net.inject_into_netns(&final_ev, container.pid(), container.has_userns());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::test_double::{Call, FakeContainer, FakeRegistry};
    use crate::container::ContainerState;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct FakeNet {
        macs: HashMap<String, [u8; 6]>,
        wifi: Vec<String>,
        renamed: RefCell<Vec<(String, String)>>,
        injected: RefCell<Vec<(String, i32, bool)>>,
    }

    impl NetHelpers for FakeNet {
        fn get_mac_by_ifname(&self, ifname: &str) -> Option<[u8; 6]> {
            self.macs.get(ifname).copied()
        }
        fn is_wifi(&self, ifname: &str) -> bool {
            self.wifi.iter().any(|n| n == ifname)
        }
        fn rename_ifi(&self, old: &str, new: &str) -> HotplugResult<()> {
            self.renamed.borrow_mut().push((old.to_string(), new.to_string()));
            Ok(())
        }
        fn inject_into_netns(&self, ev: &Uevent, pid: i32, has_userns: bool) {
            self.injected.borrow_mut().push((ev.ifname.clone().unwrap_or_default(), pid, has_userns));
        }
    }

    fn net_add_event(ifname: &str, devpath: &str) -> Uevent {
        Uevent {
            action: Action::Add,
            subsystem: "net".into(),
            devtype: String::new(),
            devpath: devpath.into(),
            devname: None,
            ifname: Some(ifname.into()),
            major: None,
            minor: None,
            id_vendor: None,
            id_product: None,
        }
    }

    #[test]
    fn virtual_devpath_is_never_moved() {
        let ev = net_add_event("veth0", "/devices/virtual/net/veth0");
        let mut physical = Vec::new();
        let mut timers = TimerWheel::new();
        handle_net_add(&ev, &mut physical, &mut timers);
        assert!(physical.is_empty());
        assert!(timers.is_empty());
    }

    #[test]
    fn unclaimed_mac_moves_into_c0() {
        let mut registry = ClaimRegistry::new();
        let fakes = FakeRegistry::new();
        let mut net = FakeNet {
            macs: HashMap::from([("enp3s0".to_string(), [2, 0x11, 0x22, 0x33, 0x44, 0x55])]),
            wifi: vec![],
            renamed: RefCell::new(Vec::new()),
            injected: RefCell::new(Vec::new()),
        };
        let mut physical = vec!["enp3s0".to_string()];
        let mut counters = RenameCounters::new();

        let ev = net_add_event("enp3s0", "/devices/pci0/enp3s0");
        netdev_move(&ev, &mut registry, &fakes, &mut net, &mut physical, &mut counters).unwrap();

        let c0_calls = fakes.containers[&0].calls.borrow();
        assert_eq!(c0_calls.len(), 1);
        assert!(matches!(&c0_calls[0], Call::AddNetIface { persistent: false, .. }));
        assert_eq!(physical[0], "cmleth0");
    }

    #[test]
    fn claimed_mac_moves_into_target_with_rename() {
        let mut registry = ClaimRegistry::new();
        let mut fakes = FakeRegistry::new();
        let c2 = fakes.insert(2, FakeContainer::new("c2", ContainerState::Running));
        registry.register_netdev(
            c2,
            [2, 0x11, 0x22, 0x33, 0x44, 0x55],
            PnetCfg { ifi_name: "net0".into(), mac_filter: false },
        );
        let mut net = FakeNet {
            macs: HashMap::from([("enp3s0".to_string(), [2, 0x11, 0x22, 0x33, 0x44, 0x55])]),
            wifi: vec![],
            renamed: RefCell::new(Vec::new()),
            injected: RefCell::new(Vec::new()),
        };
        let mut physical = vec!["enp3s0".to_string()];
        let mut counters = RenameCounters::new();

        let ev = net_add_event("enp3s0", "/devices/pci0/enp3s0");
        netdev_move(&ev, &mut registry, &fakes, &mut net, &mut physical, &mut counters).unwrap();

        assert_eq!(net.renamed.borrow()[0], ("enp3s0".to_string(), "cmleth0".to_string()));
        assert_eq!(physical[0], "cmleth0");
        assert_eq!(net.injected.borrow().len(), 1);

        let c2_calls = fakes.containers[&2].calls.borrow();
        assert_eq!(c2_calls.len(), 1);
    }

    #[test]
    fn rename_kind_follows_devtype_not_is_wifi() {
        // is_wifi reporting true must not override a non-"wlan" devtype:
        // the move routine's rename step is devtype-driven only.
        let mut registry = ClaimRegistry::new();
        let fakes = FakeRegistry::new();
        let mut net = FakeNet {
            macs: HashMap::from([("enp3s0".to_string(), [2, 0x11, 0x22, 0x33, 0x44, 0x55])]),
            wifi: vec!["enp3s0".to_string()],
            renamed: RefCell::new(Vec::new()),
            injected: RefCell::new(Vec::new()),
        };
        let mut physical = vec!["enp3s0".to_string()];
        let mut counters = RenameCounters::new();

        let ev = net_add_event("enp3s0", "/devices/pci0/enp3s0");
        netdev_move(&ev, &mut registry, &fakes, &mut net, &mut physical, &mut counters).unwrap();

        assert_eq!(net.renamed.borrow()[0], ("enp3s0".to_string(), "cmleth0".to_string()));
        assert_eq!(physical[0], "cmleth0");
    }

    #[test]
    fn mac_filter_claim_stops_before_injection() {
        let mut registry = ClaimRegistry::new();
        let mut fakes = FakeRegistry::new();
        let c2 = fakes.insert(2, FakeContainer::new("c2", ContainerState::Running));
        registry.register_netdev(
            c2,
            [2, 0x11, 0x22, 0x33, 0x44, 0x55],
            PnetCfg { ifi_name: "net0".into(), mac_filter: true },
        );
        let mut net = FakeNet {
            macs: HashMap::from([("enp3s0".to_string(), [2, 0x11, 0x22, 0x33, 0x44, 0x55])]),
            wifi: vec![],
            renamed: RefCell::new(Vec::new()),
            injected: RefCell::new(Vec::new()),
        };
        let mut physical = vec!["enp3s0".to_string()];
        let mut counters = RenameCounters::new();

        let ev = net_add_event("enp3s0", "/devices/pci0/enp3s0");
        netdev_move(&ev, &mut registry, &fakes, &mut net, &mut physical, &mut counters).unwrap();
        assert!(net.injected.borrow().is_empty());
    }
}
