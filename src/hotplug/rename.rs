//! Interface rename scheme, grounded on `hotplug_rename_ifi_new` /
//! `hotplug_rename_interface` / `hotplug_replace_devpath_new` in
//! `daemon/hotplug.c`.

use super::uevent::Uevent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Eth,
    Wlan,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Eth => "eth",
            Kind::Wlan => "wlan",
        }
    }
}

/// Kind is determined by devtype; an empty devtype defaults to `"eth"`.
pub fn kind_from_devtype(devtype: &str) -> Kind {
    if devtype == "wlan" {
        Kind::Wlan
    } else {
        Kind::Eth
    }
}

/// Per-kind monotonic counters, never reset or reused for the router's
/// lifetime.
#[derive(Debug, Default)]
pub struct RenameCounters {
    eth: u32,
    wlan: u32,
}

impl RenameCounters {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self, kind: Kind) -> u32 {
        let counter = match kind {
            Kind::Eth => &mut self.eth,
            Kind::Wlan => &mut self.wlan,
        };
        let idx = *counter;
        *counter += 1;
        idx
    }

    /// `cml<kind><idx>`.
    pub fn rename_ifi_new(&mut self, kind: Kind) -> String {
        let idx = self.next(kind);
        format!("cml{}{}", kind.as_str(), idx)
    }
}

/// Replaces the **first** occurrence of `old_name` in `devpath` with
/// `new_name`. Not a global replace.
pub fn replace_devpath_first(devpath: &str, old_name: &str, new_name: &str) -> String {
    match devpath.find(old_name) {
        Some(pos) => {
            let mut out = String::with_capacity(devpath.len() - old_name.len() + new_name.len());
            out.push_str(&devpath[..pos]);
            out.push_str(new_name);
            out.push_str(&devpath[pos + old_name.len()..]);
            out
        }
        None => devpath.to_string(),
    }
}

/// Synthesizes a renamed uevent via two successive field replacements:
/// interface name first, then devpath (re-derived from the pre-rename
/// devpath, not from any already-renamed copy).
pub fn rename_uevent(ev: &Uevent, old_name: &str, new_name: &str) -> Uevent {
    let mut renamed = ev.clone();
    renamed.ifname = Some(new_name.to_string());
    renamed.devpath = replace_devpath_first(&ev.devpath, old_name, new_name);
    renamed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_monotonic_and_independent_per_kind() {
        let mut counters = RenameCounters::new();
        assert_eq!(counters.rename_ifi_new(Kind::Eth), "cmleth0");
        assert_eq!(counters.rename_ifi_new(Kind::Wlan), "cmlwlan0");
        assert_eq!(counters.rename_ifi_new(Kind::Eth), "cmleth1");
        assert_eq!(counters.rename_ifi_new(Kind::Eth), "cmleth2");
    }

    #[test]
    fn empty_devtype_defaults_to_eth() {
        assert_eq!(kind_from_devtype(""), Kind::Eth);
        assert_eq!(kind_from_devtype("wlan"), Kind::Wlan);
        assert_eq!(kind_from_devtype("something-else"), Kind::Eth);
    }

    #[test]
    fn devpath_replace_is_first_occurrence_only() {
        let devpath = "/devices/pci0/enp3s0/enp3s0-sub";
        let replaced = replace_devpath_first(devpath, "enp3s0", "cmleth0");
        assert_eq!(replaced, "/devices/pci0/cmleth0/enp3s0-sub");
    }
}
