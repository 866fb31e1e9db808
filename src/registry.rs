//! Device Claim Registry (C5): USB-claim and netdev-claim tables. Owned
//! by the router, mutated only from the uevent-handling context per §5.

use std::fs;
use std::path::Path;

use crate::container::{ContainerHandle, PnetCfg};
use crate::error::{HotplugError, HotplugResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbDevType {
    Generic,
    Token,
}

#[derive(Debug, Clone)]
pub struct UsbClaim {
    pub vendor_id: u16,
    pub product_id: u16,
    pub i_serial: String,
    pub dev_type: UsbDevType,
    pub assign: bool,
    pub container: ContainerHandle,
    pub major: i32,
    pub minor: i32,
}

impl UsbClaim {
    pub fn new(
        vendor_id: u16,
        product_id: u16,
        i_serial: impl Into<String>,
        dev_type: UsbDevType,
        assign: bool,
        container: ContainerHandle,
    ) -> Self {
        UsbClaim {
            vendor_id,
            product_id,
            i_serial: i_serial.into(),
            dev_type,
            assign,
            container,
            major: -1,
            minor: -1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NetdevClaim {
    pub mac: [u8; 6],
    pub pnet_cfg: PnetCfg,
    pub container: ContainerHandle,
}

/// Two ordered lists; multiple claims per container, at most one
/// matching claim per physical device.
#[derive(Default)]
pub struct ClaimRegistry {
    usb: Vec<UsbClaim>,
    netdev: Vec<NetdevClaim>,
}

impl ClaimRegistry {
    pub fn new() -> Self {
        ClaimRegistry::default()
    }

    /// Deep-copies owned fields (`i_serial`) so the caller may free its
    /// input after the call returns.
    pub fn register_usb(&mut self, claim: UsbClaim) {
        self.usb.push(claim);
    }

    pub fn unregister_usb(
        &mut self,
        container: ContainerHandle,
        vendor_id: u16,
        product_id: u16,
        i_serial: &str,
    ) -> HotplugResult<()> {
        let pos = self.usb.iter().position(|c| {
            c.container == container
                && c.vendor_id == vendor_id
                && c.product_id == product_id
                && c.i_serial == i_serial
        });
        match pos {
            Some(i) => {
                self.usb.remove(i);
                Ok(())
            }
            None => Err(HotplugError::NotFound),
        }
    }

    pub fn register_netdev(&mut self, container: ContainerHandle, mac: [u8; 6], pnet_cfg: PnetCfg) {
        self.netdev.push(NetdevClaim { mac, pnet_cfg, container });
    }

    pub fn unregister_netdev(&mut self, container: ContainerHandle, mac: [u8; 6]) -> HotplugResult<()> {
        let pos = self.netdev.iter().position(|c| c.container == container && c.mac == mac);
        match pos {
            Some(i) => {
                self.netdev.remove(i);
                Ok(())
            }
            None => Err(HotplugError::NotFound),
        }
    }

    pub fn usb_claims(&self) -> &[UsbClaim] {
        &self.usb
    }

    pub fn usb_claims_mut(&mut self) -> &mut [UsbClaim] {
        &mut self.usb
    }

    pub fn netdev_claims(&self) -> &[NetdevClaim] {
        &self.netdev
    }

    pub fn find_usb_by_major_minor(&self, major: i32, minor: i32) -> Option<usize> {
        self.usb.iter().position(|c| c.major == major && c.minor == minor)
    }

    pub fn find_usb_by_ids(&self, vendor_id: u16, product_id: u16, serial: &str) -> Option<usize> {
        self.usb
            .iter()
            .position(|c| c.vendor_id == vendor_id && c.product_id == product_id && c.i_serial == serial)
    }

    pub fn find_netdev_by_mac(&self, mac: [u8; 6]) -> Option<&NetdevClaim> {
        self.netdev.iter().find(|c| c.mac == mac)
    }
}

/// Pre-populates `(major, minor)` for already-attached USB devices by
/// enumerating `/sys/bus/usb/devices/*` and matching on
/// `idVendor`/`idProduct`/`serial`.
pub fn sysfs_prepopulate(registry: &mut ClaimRegistry) -> HotplugResult<()> {
    let root = Path::new("/sys/bus/usb/devices");
    let entries = match fs::read_dir(root) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(HotplugError::Io(e)),
    };

    for entry in entries {
        let entry = entry.map_err(HotplugError::Io)?;
        let dir = entry.path();
        let id_vendor = match read_hex_attr(&dir.join("idVendor")) {
            Some(v) => v,
            None => continue,
        };
        let id_product = match read_hex_attr(&dir.join("idProduct")) {
            Some(v) => v,
            None => continue,
        };
        let serial = match fs::read_to_string(dir.join("serial")) {
            Ok(s) => s.trim_end_matches('\n').to_string(),
            Err(_) => continue,
        };
        let dev = match fs::read_to_string(dir.join("dev")) {
            Ok(s) => s.trim_end_matches('\n').to_string(),
            Err(_) => continue,
        };
        let (major, minor) = match parse_major_minor(&dev) {
            Some(mm) => mm,
            None => continue,
        };

        if let Some(i) = registry.find_usb_by_ids(id_vendor, id_product, &serial) {
            let claim = &mut registry.usb[i];
            claim.major = major;
            claim.minor = minor;
            log::debug!(
                "sysfs_prepopulate: pre-filled {:04x}:{:04x} serial={} as {}:{}",
                id_vendor, id_product, serial, major, minor
            );
        }
    }
    Ok(())
}

fn read_hex_attr(path: &Path) -> Option<u16> {
    let s = fs::read_to_string(path).ok()?;
    u16::from_str_radix(s.trim(), 16).ok()
}

fn parse_major_minor(dev: &str) -> Option<(i32, i32)> {
    let (maj, min) = dev.trim().split_once(':')?;
    Some((maj.parse().ok()?, min.parse().ok()?))
}
