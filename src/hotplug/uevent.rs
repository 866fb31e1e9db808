//! Decoded kernel uevent, per the data model (§3). A real kernel-netlink
//! reader (not exercised by this crate's own tests) decodes the raw
//! `NETLINK_KOBJECT_UEVENT` datagram into this shape.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Add,
    Change,
    Remove,
}

impl Action {
    pub fn parse(s: &str) -> Option<Action> {
        match s {
            "add" => Some(Action::Add),
            "change" => Some(Action::Change),
            "remove" => Some(Action::Remove),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Uevent {
    pub action: Action,
    pub subsystem: String,
    pub devtype: String,
    pub devpath: String,
    pub devname: Option<String>,
    pub ifname: Option<String>,
    pub major: Option<u32>,
    pub minor: Option<u32>,
    pub id_vendor: Option<u16>,
    pub id_product: Option<u16>,
}

impl Uevent {
    /// Parses the `KEY=value` lines a kernel uevent datagram is
    /// traditionally split into (as delivered by `NETLINK_KOBJECT_UEVENT`
    /// after the leading `ACTION@DEVPATH` header line is stripped).
    pub fn from_fields(action: Action, devpath: String, fields: &[(String, String)]) -> Uevent {
        let mut ev = Uevent {
            action,
            subsystem: String::new(),
            devtype: String::new(),
            devpath,
            devname: None,
            ifname: None,
            major: None,
            minor: None,
            id_vendor: None,
            id_product: None,
        };
        for (k, v) in fields {
            match k.as_str() {
                "SUBSYSTEM" => ev.subsystem = v.clone(),
                "DEVTYPE" => ev.devtype = v.clone(),
                "DEVNAME" => ev.devname = Some(v.clone()),
                "INTERFACE" => ev.ifname = Some(v.clone()),
                "MAJOR" => ev.major = v.parse().ok(),
                "MINOR" => ev.minor = v.parse().ok(),
                "PRODUCT" => {
                    // kernel format "idVendor/idProduct/bcdDevice" in hex, no padding
                    if let Some((vendor, rest)) = v.split_once('/') {
                        ev.id_vendor = u16::from_str_radix(vendor, 16).ok();
                        if let Some((product, _)) = rest.split_once('/') {
                            ev.id_product = u16::from_str_radix(product, 16).ok();
                        }
                    }
                }
                _ => {}
            }
        }
        ev
    }
}
