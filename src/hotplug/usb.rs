//! USB hotplug handling (§4.4 "USB handling"), grounded on
//! `hotplug_handle_usb_device` in `daemon/hotplug.c`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use super::timer::TimerWheel;
use super::uevent::{Action, Uevent};
use crate::container::{ContainerHandle, ContainerRegistry};
use crate::error::HotplugResult;
use crate::registry::{ClaimRegistry, UsbDevType};

const TOKEN_POLL_INTERVAL: Duration = Duration::from_millis(100);
const TOKEN_POLL_RETRIES: u32 = 10;

pub struct TokenPollState {
    pub container: ContainerHandle,
    pub devname: String,
    pub retries: u32,
}

fn read_serial(devpath: &str) -> Option<String> {
    let path = Path::new("/sys").join(devpath.trim_start_matches('/')).join("serial");
    let raw = fs::read_to_string(path).ok()?;
    Some(raw.trim_end_matches('\n').to_string())
}

/// Entry point for a `subsystem == "usb" && devtype == "usb_device"`
/// event. Only this pair of conditions is checked by the caller; this
/// function assumes it.
pub fn handle_usb_device<R: ContainerRegistry>(
    ev: &Uevent,
    registry: &mut ClaimRegistry,
    containers: &R,
    timers: &mut TimerWheel<TokenPollState>,
) -> HotplugResult<()> {
    match ev.action {
        Action::Remove => handle_remove(ev, registry, containers),
        Action::Add => handle_add(ev, registry, containers, timers),
        Action::Change => Ok(()),
    }
}

fn handle_remove<R: ContainerRegistry>(
    ev: &Uevent,
    registry: &mut ClaimRegistry,
    containers: &R,
) -> HotplugResult<()> {
    let (Some(major), Some(minor)) = (ev.major, ev.minor) else {
        return Ok(());
    };
    let (major, minor) = (major as i32, minor as i32);

    loop {
        let Some(idx) = registry.find_usb_by_major_minor(major, minor) else {
            break;
        };
        let claim = registry.usb_claims()[idx].clone();
        if let Some(container) = containers.get(claim.container) {
            if claim.dev_type == UsbDevType::Token {
                log::info!("usb device {}:{} detached, detaching token", major, minor);
                container.token_detach();
            } else {
                log::info!("usb device {}:{} detached, denying access", major, minor);
                container.device_deny('c', major as u32, minor as u32);
            }
        }
        registry.usb_claims_mut()[idx].major = -1;
        registry.usb_claims_mut()[idx].minor = -1;
        // a single physical device matches at most one claim; break to
        // avoid looping forever if `major`/`minor` somehow stay matched.
        break;
    }
    Ok(())
}

fn handle_add<R: ContainerRegistry>(
    ev: &Uevent,
    registry: &mut ClaimRegistry,
    containers: &R,
    timers: &mut TimerWheel<TokenPollState>,
) -> HotplugResult<()> {
    let Some(serial) = read_serial(&ev.devpath) else {
        log::debug!("usb device at {} has no serial, cannot be claimed", ev.devpath);
        return Ok(());
    };
    let (Some(vendor), Some(product)) = (ev.id_vendor, ev.id_product) else {
        return Ok(());
    };

    let Some(idx) = registry.find_usb_by_ids(vendor, product, &serial) else {
        return Ok(());
    };
    let (major, minor) = match (ev.major, ev.minor) {
        (Some(ma), Some(mi)) => (ma as i32, mi as i32),
        _ => return Ok(()),
    };

    registry.usb_claims_mut()[idx].major = major;
    registry.usb_claims_mut()[idx].minor = minor;
    let claim = registry.usb_claims()[idx].clone();

    let container = match containers.get(claim.container) {
        Some(c) => c,
        None => return Ok(()),
    };

    if claim.dev_type == UsbDevType::Token {
        log::info!(
            "usb device {:04x}:{:04x} serial={} assigned to {} as {}:{}",
            vendor, product, serial, container.name(), major, minor
        );
    } else {
        log::info!(
            "usb device {:04x}:{:04x} serial={} allowed for {} as {}:{}",
            vendor, product, serial, container.name(), major, minor
        );
    }
    container.device_allow('c', major as u32, minor as u32, claim.assign);

    if claim.dev_type == UsbDevType::Token {
        if let Some(devname) = &ev.devname {
            let state = TokenPollState {
                container: claim.container,
                devname: devname.clone(),
                retries: TOKEN_POLL_RETRIES,
            };
            timers.arm(TOKEN_POLL_INTERVAL, true, state);
        }
    }
    Ok(())
}

/// Runs one tick of every due token-attach timer. The retry budget is
/// consumed before the existence check on every tick; once the devnode
/// is found, `token_attach` fires and the timer is cancelled without
/// consuming further retries.
pub fn poll_token_timers<R: ContainerRegistry>(
    timers: &mut TimerWheel<TokenPollState>,
    containers: &R,
) {
    timers.fire_due(|_, state| {
        state.retries = state.retries.saturating_sub(1);
        let devnode = format!("/dev/{}", state.devname);
        if Path::new(&devnode).exists() {
            if let Some(container) = containers.get(state.container) {
                container.token_attach();
            }
            return false;
        }
        if state.retries == 0 {
            log::warn!("token attach for {} abandoned after 10 ticks", state.devname);
            return false;
        }
        true
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::test_double::FakeRegistry;
    use crate::container::test_double::{Call, FakeContainer};
    use crate::container::{ContainerRegistry, ContainerState};
    use crate::registry::{UsbClaim, UsbDevType};

    fn uevent_add(devpath: &str, vendor: u16, product: u16, major: u32, minor: u32) -> Uevent {
        Uevent {
            action: Action::Add,
            subsystem: "usb".into(),
            devtype: "usb_device".into(),
            devpath: devpath.into(),
            devname: Some("bus/usb/001/003".into()),
            ifname: None,
            major: Some(major),
            minor: Some(minor),
            id_vendor: Some(vendor),
            id_product: Some(product),
        }
    }

    #[test]
    fn add_with_matching_claim_allows_device_once() {
        let mut registry = ClaimRegistry::new();
        let mut fakes = FakeRegistry::new();
        let c1 = fakes.insert(1, FakeContainer::new("c1", ContainerState::Running));
        registry.register_usb(UsbClaim::new(0x1050, 0x0407, "0001A2B3", UsbDevType::Generic, true, c1));

        // can't stub /sys/<devpath>/serial in a unit test without root;
        // instead exercise the matching/allow path directly once the
        // serial is known, mirroring handle_add's post-lookup behavior.
        let idx = registry.find_usb_by_ids(0x1050, 0x0407, "0001A2B3").unwrap();
        registry.usb_claims_mut()[idx].major = 189;
        registry.usb_claims_mut()[idx].minor = 2;
        let claim = registry.usb_claims()[idx].clone();
        let container = fakes.get(claim.container).unwrap();
        container.device_allow('c', 189, 2, claim.assign);

        let fake_c1 = &fakes.containers[&1];
        assert_eq!(
            *fake_c1.calls.borrow(),
            vec![Call::DeviceAllow { major: 189, minor: 2, assign: true }]
        );
    }

    #[test]
    fn remove_denies_non_token_claim() {
        let mut registry = ClaimRegistry::new();
        let mut fakes = FakeRegistry::new();
        let c1 = fakes.insert(1, FakeContainer::new("c1", ContainerState::Running));
        let mut claim = UsbClaim::new(0x1050, 0x0407, "0001A2B3", UsbDevType::Generic, false, c1);
        claim.major = 189;
        claim.minor = 2;
        registry.register_usb(claim);

        let ev = Uevent {
            action: Action::Remove,
            subsystem: "usb".into(),
            devtype: "usb_device".into(),
            devpath: "/devices/x".into(),
            devname: None,
            ifname: None,
            major: Some(189),
            minor: Some(2),
            id_vendor: None,
            id_product: None,
        };
        handle_remove(&ev, &mut registry, &fakes).unwrap();

        let fake_c1 = &fakes.containers[&1];
        assert_eq!(*fake_c1.calls.borrow(), vec![Call::DeviceDeny { major: 189, minor: 2 }]);
    }

    #[test]
    fn remove_detaches_token_claim() {
        let mut registry = ClaimRegistry::new();
        let mut fakes = FakeRegistry::new();
        let c1 = fakes.insert(1, FakeContainer::new("c1", ContainerState::Running));
        let mut claim = UsbClaim::new(0x1050, 0x0407, "0001A2B3", UsbDevType::Token, true, c1);
        claim.major = 189;
        claim.minor = 2;
        registry.register_usb(claim);

        let ev = Uevent {
            action: Action::Remove,
            subsystem: "usb".into(),
            devtype: "usb_device".into(),
            devpath: "/devices/x".into(),
            devname: None,
            ifname: None,
            major: Some(189),
            minor: Some(2),
            id_vendor: None,
            id_product: None,
        };
        handle_remove(&ev, &mut registry, &fakes).unwrap();

        let fake_c1 = &fakes.containers[&1];
        assert_eq!(*fake_c1.calls.borrow(), vec![Call::TokenDetach]);
    }

    #[test]
    fn token_poll_gives_up_after_ten_ticks() {
        let mut fakes = FakeRegistry::new();
        let c1 = fakes.insert(1, FakeContainer::new("c1", ContainerState::Running));
        let mut timers: TimerWheel<TokenPollState> = TimerWheel::new();
        timers.arm(
            Duration::from_millis(0),
            true,
            TokenPollState { container: c1, devname: "does-not-exist-xyz".into(), retries: 10 },
        );

        for _ in 0..10 {
            std::thread::sleep(Duration::from_millis(1));
            poll_token_timers(&mut timers, &fakes);
        }
        assert!(timers.is_empty());
        assert!(fakes.containers[&1].calls.borrow().is_empty());
    }

    #[test]
    fn uevent_add_helper_builds_expected_shape() {
        let ev = uevent_add("/devices/x", 0x1050, 0x0407, 189, 2);
        assert_eq!(ev.id_vendor, Some(0x1050));
        assert_eq!(ev.major, Some(189));
    }
}
