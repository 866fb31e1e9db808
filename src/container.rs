//! The container subsystem contract (§6): consumed by C4/C5, not owned by
//! this crate. Modeled as traits over non-owning opaque handles so claims
//! never hold a strong reference to a container (see DESIGN.md, "cyclic
//! container references").

use std::collections::HashMap;

/// Opaque, non-owning reference to a container. Indexes into an external
/// `ContainerRegistry`; has no lifetime tied to the container itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContainerHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Stopped,
    Starting,
    Booting,
    Running,
    ShuttingDown,
}

impl ContainerState {
    /// The states in which a netdev move is permitted to proceed (§4.4
    /// step 3).
    pub fn accepts_netdev_move(self) -> bool {
        matches!(self, ContainerState::Booting | ContainerState::Starting | ContainerState::Running)
    }
}

/// In-container network interface configuration requested by a claim or
/// synthesized as a passthrough default.
#[derive(Debug, Clone)]
pub struct PnetCfg {
    pub ifi_name: String,
    pub mac_filter: bool,
}

/// Per-container operations C4/C5 invoke. Implemented by the real daemon;
/// this crate only consumes it.
pub trait Container {
    fn state(&self) -> ContainerState;
    fn pid(&self) -> i32;
    fn has_userns(&self) -> bool;
    fn name(&self) -> &str;
    fn device_allow(&self, kind: char, major: u32, minor: u32, assign: bool);
    fn device_deny(&self, kind: char, major: u32, minor: u32);
    fn token_attach(&self);
    fn token_detach(&self);
    fn add_net_iface(&self, cfg: &PnetCfg, persistent: bool);
}

/// Container registry contract: yields handles and, by contract with the
/// container subsystem, the privileged "compartment zero".
pub trait ContainerRegistry {
    fn get(&self, handle: ContainerHandle) -> Option<&dyn Container>;
    fn c0(&self) -> ContainerHandle;
}

#[cfg(test)]
pub mod test_double {
    use super::*;
    use std::cell::RefCell;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        DeviceAllow { major: u32, minor: u32, assign: bool },
        DeviceDeny { major: u32, minor: u32 },
        TokenAttach,
        TokenDetach,
        AddNetIface { ifi_name: String, persistent: bool },
    }

    pub struct FakeContainer {
        pub name: String,
        pub state: ContainerState,
        pub pid: i32,
        pub has_userns: bool,
        pub calls: RefCell<Vec<Call>>,
    }

    impl FakeContainer {
        pub fn new(name: &str, state: ContainerState) -> Self {
            FakeContainer {
                name: name.to_string(),
                state,
                pid: 1000,
                has_userns: false,
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl Container for FakeContainer {
        fn state(&self) -> ContainerState {
            self.state
        }
        fn pid(&self) -> i32 {
            self.pid
        }
        fn has_userns(&self) -> bool {
            self.has_userns
        }
        fn name(&self) -> &str {
            &self.name
        }
        fn device_allow(&self, _kind: char, major: u32, minor: u32, assign: bool) {
            self.calls.borrow_mut().push(Call::DeviceAllow { major, minor, assign });
        }
        fn device_deny(&self, _kind: char, major: u32, minor: u32) {
            self.calls.borrow_mut().push(Call::DeviceDeny { major, minor });
        }
        fn token_attach(&self) {
            self.calls.borrow_mut().push(Call::TokenAttach);
        }
        fn token_detach(&self) {
            self.calls.borrow_mut().push(Call::TokenDetach);
        }
        fn add_net_iface(&self, cfg: &PnetCfg, persistent: bool) {
            self.calls.borrow_mut().push(Call::AddNetIface {
                ifi_name: cfg.ifi_name.clone(),
                persistent,
            });
        }
    }

    pub struct FakeRegistry {
        pub containers: HashMap<u32, FakeContainer>,
        pub c0: ContainerHandle,
    }

    impl FakeRegistry {
        pub fn new() -> Self {
            let mut containers = HashMap::new();
            containers.insert(0, FakeContainer::new("c0", ContainerState::Running));
            FakeRegistry { containers, c0: ContainerHandle(0) }
        }

        pub fn insert(&mut self, id: u32, container: FakeContainer) -> ContainerHandle {
            self.containers.insert(id, container);
            ContainerHandle(id)
        }
    }

    impl ContainerRegistry for FakeRegistry {
        fn get(&self, handle: ContainerHandle) -> Option<&dyn Container> {
            self.containers.get(&handle.0).map(|c| c as &dyn Container)
        }
        fn c0(&self) -> ContainerHandle {
            self.c0
        }
    }
}
