//! Uevent Router (C4) and the physical-interface/claim bookkeeping it
//! owns, grounded on `daemon/hotplug.c`'s `hotplug_init`,
//! `hotplug_handle_uevent_cb` and their surrounding state.

pub mod netdev;
pub mod rename;
pub mod timer;
pub mod usb;
pub mod uevent;

use std::io;
use std::time::Duration;

use mio::{Events, Poll, Token};

use self::netdev::{NetHelpers, NetSettleState};
use self::rename::RenameCounters;
use self::timer::TimerWheel;
use self::uevent::Uevent;
use self::usb::TokenPollState;
use crate::config::HotplugConfig;
use crate::container::ContainerRegistry;
use crate::error::HotplugResult;
use crate::registry::{sysfs_prepopulate, ClaimRegistry};

/// A source of decoded kernel uevents (§6): wraps the real
/// `NETLINK_KOBJECT_UEVENT` socket in production; swappable in tests.
pub trait UeventSource {
    /// Registers the underlying fd with `poll` so the router's event
    /// loop wakes on a readable event.
    fn register(&mut self, poll: &Poll, token: Token) -> io::Result<()>;
    /// Reads and decodes the next uevent, if one is ready.
    fn next_event(&mut self) -> io::Result<Option<Uevent>>;
}

const UEVENT_TOKEN: Token = Token(0);
/// The event loop wakes at least this often even with no readable fd, so
/// timer wheels still get serviced.
const POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Ties the claim registry, rename counters, and both timer wheels
/// together behind a single `mio`-driven loop. Owns no container state of
/// its own; every container operation is dispatched through the
/// `ContainerRegistry`/`Container` traits.
pub struct Router {
    claims: ClaimRegistry,
    counters: RenameCounters,
    token_timers: TimerWheel<TokenPollState>,
    netdev_timers: TimerWheel<NetSettleState>,
    physical_netifs: Vec<String>,
    config: HotplugConfig,
}

impl Router {
    pub fn new(config: HotplugConfig) -> Self {
        Router {
            claims: ClaimRegistry::new(),
            counters: RenameCounters::new(),
            token_timers: TimerWheel::new(),
            netdev_timers: TimerWheel::new(),
            physical_netifs: Vec::new(),
            config,
        }
    }

    pub fn claims_mut(&mut self) -> &mut ClaimRegistry {
        &mut self.claims
    }

    pub fn claims(&self) -> &ClaimRegistry {
        &self.claims
    }

    /// Seeds the set of already-present physical interfaces that `init`
    /// should rename. Callers are expected to enumerate the real
    /// interface list (e.g. `/sys/class/net`) themselves, since that
    /// enumeration is a system detail the router has no opinion on.
    pub fn seed_physical_netif(&mut self, ifname: String) {
        self.physical_netifs.push(ifname);
    }

    /// Pre-populates already-attached USB devices and, unless hosted mode
    /// is active, renames every already-present physical interface before
    /// uevent handling starts. Callers must seed the interface list via
    /// `seed_physical_netif` beforehand.
    pub fn init<N: NetHelpers>(&mut self, net: &N) -> HotplugResult<()> {
        sysfs_prepopulate(&mut self.claims)?;

        if !self.config.hosted_mode {
            for ifname in &mut self.physical_netifs {
                let kind = if net.is_wifi(ifname) {
                    rename::Kind::Wlan
                } else {
                    rename::Kind::Eth
                };
                let new_name = self.counters.rename_ifi_new(kind);
                if net.rename_ifi(ifname, &new_name).is_ok() {
                    *ifname = new_name;
                } else {
                    log::warn!("initial rename of {} failed, leaving as-is", ifname);
                }
            }
        }
        Ok(())
    }

    /// Dispatches one decoded uevent (§4.4's top-level `subsystem`/
    /// `devtype`/`action` routing).
    pub fn dispatch<R: ContainerRegistry, N: NetHelpers>(
        &mut self,
        ev: &Uevent,
        containers: &R,
        net: &N,
    ) -> HotplugResult<()> {
        if ev.subsystem == "usb" && ev.devtype == "usb_device" {
            return usb::handle_usb_device(ev, &mut self.claims, containers, &mut self.token_timers);
        }
        netdev::handle_net_add(ev, &mut self.physical_netifs, &mut self.netdev_timers);
        Ok(())
    }

    /// Services every due token-attach and netdev-settle timer. Called
    /// once per event loop iteration regardless of whether a uevent
    /// arrived on that iteration.
    pub fn poll_timers<R: ContainerRegistry, N: NetHelpers>(&mut self, containers: &R, net: &N) {
        usb::poll_token_timers(&mut self.token_timers, containers);
        netdev::poll_netdev_settle_timers(
            &mut self.netdev_timers,
            &mut self.claims,
            containers,
            net,
            &mut self.physical_netifs,
            &mut self.counters,
        );
    }

    /// Runs the blocking event loop: waits for a uevent or the poll
    /// timeout, dispatches, services timers, repeats forever. Not
    /// exercised by this crate's own tests (it requires a live kernel
    /// uevent stream); wired here so the CLI's `hotplug run` subcommand
    /// has a real implementation to call.
    pub fn run<R: ContainerRegistry, N: NetHelpers, S: UeventSource>(
        &mut self,
        mut source: S,
        containers: &R,
        net: &N,
    ) -> io::Result<()> {
        let poll = Poll::new()?;
        source.register(&poll, UEVENT_TOKEN)?;
        let mut events = Events::with_capacity(16);

        loop {
            poll.poll(&mut events, Some(POLL_TIMEOUT))?;
            for event in events.iter() {
                if event.token() == UEVENT_TOKEN {
                    while let Some(ev) = source.next_event()? {
                        if let Err(e) = self.dispatch(&ev, containers, net) {
                            log::error!("failed to dispatch uevent: {}", e);
                        }
                    }
                }
            }
            self.poll_timers(containers, net);
        }
    }
}
