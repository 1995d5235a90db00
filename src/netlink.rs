use nix::net::if_::if_nametoindex;

use crate::errors::{DeChainyError, Result};

/// Resolves an interface name to its kernel ifindex.
pub fn get_ifindex(iface: &str) -> Result<u32> {
    log::info!("getting ifindex for iface {iface}");
    if_nametoindex(iface).map_err(|_| DeChainyError::UnknownInterface(iface.to_string()))
}
