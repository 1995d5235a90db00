//! The `dechainy0` sentinel interface: a dummy link created at controller
//! startup to enforce the one-controller-per-host-namespace invariant
//! through an OS-visible resource rather than language-level global state.
//! A second controller's `init` fails with `AlreadyRunning` when it tries
//! to create the same link and gets `EEXIST`.

use futures::TryStreamExt;
use rtnetlink::Handle;

use crate::errors::{DeChainyError, Result};

pub const SENTINEL_LINK_NAME: &str = "dechainy0";

/// Creates the sentinel dummy link. Returns `AlreadyRunning` if it already
/// exists — either another controller is live, or a previous instance
/// crashed without tearing it down.
pub async fn create_sentinel(handle: &Handle) -> Result<()> {
    match handle
        .link()
        .add()
        .dummy(SENTINEL_LINK_NAME.to_string())
        .execute()
        .await
    {
        Ok(()) => {
            log::info!("created sentinel interface {SENTINEL_LINK_NAME}");
            Ok(())
        }
        Err(rtnetlink::Error::NetlinkError(msg)) if msg.code == Some(-17) => {
            Err(DeChainyError::AlreadyRunning)
        }
        Err(e) => Err(DeChainyError::Error(format!(
            "failed to create sentinel interface: {e}"
        ))),
    }
}

/// Removes the sentinel link during controller shutdown.
pub async fn remove_sentinel(handle: &Handle) -> Result<()> {
    let mut links = handle
        .link()
        .get()
        .match_name(SENTINEL_LINK_NAME.to_string())
        .execute();
    if let Some(link) = links
        .try_next()
        .await
        .map_err(|e| DeChainyError::Error(e.to_string()))?
    {
        handle
            .link()
            .del(link.header.index)
            .execute()
            .await
            .map_err(|e| DeChainyError::Error(e.to_string()))?;
    }
    Ok(())
}
