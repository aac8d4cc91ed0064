use carelink_core::{HttpRemote, OfflineService};
use tokio::sync::broadcast::error::RecvError;

use crate::error::CliError;

/// Run the connectivity monitor until Ctrl-C, printing transitions and notices
pub async fn run_watch(service: &OfflineService<HttpRemote>) -> Result<(), CliError> {
    let monitor = service.monitor();
    let mut notices = monitor.notices();
    let subscription = monitor.subscribe(|state| println!("Connectivity: {}", state.phase()));

    service.start();
    println!("Watching connectivity (Ctrl-C to stop)");

    let result = loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => break signal.map_err(CliError::from),
            notice = notices.recv() => match notice {
                Ok(notice) => println!("{notice}"),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Missed {} notices", skipped);
                }
                Err(RecvError::Closed) => break Ok(()),
            },
        }
    };

    monitor.unsubscribe(subscription);
    service.shutdown();
    result
}
