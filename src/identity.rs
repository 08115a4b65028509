//! Node identity and roles.
//!
//! Each controller derives a 64-bit [`NodeId`] once at startup from its
//! hardware address. The ordering over NodeIds is the tie-break used by
//! the election protocol: the highest id always wins.

use std::fmt;
use std::path::Path;

use rand::Rng;
use tracing::{debug, warn};

/// Opaque 64-bit node identifier.
///
/// Derived from the six hardware-address bytes, big-endian, so that the
/// natural integer ordering matches the ordering of MAC addresses.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u64);

impl NodeId {
    /// Build a NodeId from a 6-byte hardware address.
    pub fn from_mac(mac: [u8; 6]) -> Self {
        let mut id = 0u64;
        for byte in mac {
            id = (id << 8) | u64::from(byte);
        }
        NodeId(id)
    }

    /// Build a NodeId from a raw 64-bit value.
    pub fn from_raw(raw: u64) -> Self {
        NodeId(raw)
    }

    /// Raw 64-bit value, as carried in the frame header.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Derive an id from the first non-loopback network interface.
    ///
    /// Scans `/sys/class/net` for a usable hardware address. When no
    /// interface is available (containers, odd platforms) a random id is
    /// generated; the node still participates, it just will not keep the
    /// same id across reboots.
    pub fn from_host() -> Self {
        if let Some(id) = Self::scan_sysfs(Path::new("/sys/class/net")) {
            return id;
        }
        let id = NodeId(rand::thread_rng().gen());
        warn!(id = %id, "no hardware address found, generated random node id");
        id
    }

    fn scan_sysfs(root: &Path) -> Option<Self> {
        let entries = std::fs::read_dir(root).ok()?;
        let mut names: Vec<_> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n != "lo")
            .collect();
        names.sort();

        for name in names {
            let path = root.join(&name).join("address");
            let Ok(text) = std::fs::read_to_string(&path) else {
                continue;
            };
            if let Some(mac) = parse_mac(text.trim()) {
                // All-zero addresses show up on virtual interfaces.
                if mac != [0u8; 6] {
                    let id = NodeId::from_mac(mac);
                    debug!(interface = %name, id = %id, "derived node id");
                    return Some(id);
                }
            }
        }
        None
    }
}

/// Parse a colon-separated hardware address like `aa:bb:cc:dd:ee:ff`.
fn parse_mac(text: &str) -> Option<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut parts = text.split(':');
    for slot in &mut mac {
        *slot = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(mac)
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self)
    }
}

/// Role of a node in the mesh.
///
/// Exactly one role at any time; transitions are driven by the election
/// state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeRole {
    /// Created but the bus is not up yet.
    Startup,
    /// Listening for a master, none heard so far.
    Idle,
    /// Election in progress.
    Election,
    /// This node is the elected time reference.
    Master,
    /// Following a master.
    Slave,
}

impl NodeRole {
    /// Stable byte value carried in peer announcements.
    pub fn to_byte(self) -> u8 {
        match self {
            NodeRole::Startup => 0,
            NodeRole::Idle => 1,
            NodeRole::Election => 2,
            NodeRole::Master => 3,
            NodeRole::Slave => 4,
        }
    }

    /// Decode a role byte; unknown values map to `Idle` rather than
    /// failing, a stale announcement is not worth dropping.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0 => NodeRole::Startup,
            2 => NodeRole::Election,
            3 => NodeRole::Master,
            4 => NodeRole::Slave,
            _ => NodeRole::Idle,
        }
    }

    pub fn is_master(&self) -> bool {
        matches!(self, NodeRole::Master)
    }

    pub fn is_slave(&self) -> bool {
        matches!(self, NodeRole::Slave)
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeRole::Startup => "startup",
            NodeRole::Idle => "idle",
            NodeRole::Election => "election",
            NodeRole::Master => "master",
            NodeRole::Slave => "slave",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_from_mac_ordering() {
        let low = NodeId::from_mac([0, 0, 0, 0, 0, 1]);
        let high = NodeId::from_mac([0, 0, 0, 0, 0, 3]);
        assert!(high > low);
        assert_eq!(low.as_u64(), 1);
        assert_eq!(high.as_u64(), 3);
    }

    #[test]
    fn test_node_id_display() {
        let id = NodeId::from_mac([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        assert_eq!(id.to_string(), "0000aabbccddeeff");
    }

    #[test]
    fn test_parse_mac() {
        assert_eq!(
            parse_mac("aa:bb:cc:dd:ee:ff"),
            Some([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff])
        );
        assert_eq!(parse_mac("aa:bb:cc"), None);
        assert_eq!(parse_mac("not a mac"), None);
        assert_eq!(parse_mac("aa:bb:cc:dd:ee:ff:00"), None);
    }

    #[test]
    fn test_role_byte_round_trip() {
        for role in [
            NodeRole::Startup,
            NodeRole::Idle,
            NodeRole::Election,
            NodeRole::Master,
            NodeRole::Slave,
        ] {
            assert_eq!(NodeRole::from_byte(role.to_byte()), role);
        }
        // Unknown bytes degrade to Idle.
        assert_eq!(NodeRole::from_byte(0xff), NodeRole::Idle);
    }
}
