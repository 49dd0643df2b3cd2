//! Timed collection windows: give the performer a moment to get into
//! position, then record for a fixed duration.
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;

use crate::{error::Result, session::Phase, store::Target, worker::SharedSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionWindow {
    pub delay: Duration,
    pub duration: Duration,
}

impl Default for CollectionWindow {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            duration: Duration::from_secs(10),
        }
    }
}

/// Wait `delay`, collect for `duration`, then stop collecting.
///
/// Fails without waiting for the collection period if the session refuses to
/// start collecting. Returns the number of samples the store grew by. If the
/// collection was ended or replaced from elsewhere during the window, the
/// session is left alone and 0 is returned.
pub async fn run_collection_window(
    session: SharedSession,
    target: Target,
    window: CollectionWindow,
) -> Result<usize> {
    log::info!("Collecting {:?} in {:?}", target, window.delay);
    sleep(window.delay).await;

    let before = {
        let mut session = session.lock().await;
        session.begin_collecting(target.clone())?;
        session.store().size()
    };

    sleep(window.duration).await;

    let mut session = session.lock().await;
    if session.phase() != Phase::Collecting || session.active_target() != Some(&target) {
        log::info!(
            "Collection of {:?} was ended elsewhere, leaving the session {}",
            target,
            session.phase()
        );
        return Ok(0);
    }
    session.end_collecting()?;
    let collected = session.store().size().saturating_sub(before);
    log::info!("Collection window closed with {} new samples", collected);
    Ok(collected)
}
