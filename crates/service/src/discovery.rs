//! Port advertisement through `<data_dir>/service.port`.

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{debug, info};

use crate::paths::port_file_path;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub fn advertise(data_dir: &Path, port: u16) -> io::Result<()> {
    fs::create_dir_all(data_dir)?;
    let path = port_file_path(data_dir);
    fs::write(&path, format!("{port}\n"))?;
    info!(
        component = "discovery",
        event = "discovery.advertised",
        port,
        path = %path.display(),
        "Advertised service port"
    );
    Ok(())
}

/// The advertised port, if one is present and readable right now.
pub fn advertised_port(data_dir: &Path) -> Option<u16> {
    let contents = fs::read_to_string(port_file_path(data_dir)).ok()?;
    contents.trim().parse().ok()
}

/// Wait up to `within` for a port to be advertised.
pub async fn discover(data_dir: &Path, within: Duration) -> Option<u16> {
    let poll = async {
        loop {
            if let Some(port) = advertised_port(data_dir) {
                return port;
            }
            sleep(POLL_INTERVAL).await;
        }
    };
    match timeout(within, poll).await {
        Ok(port) => Some(port),
        Err(_) => {
            debug!(
                component = "discovery",
                event = "discovery.timed_out",
                data_dir = %data_dir.display(),
                "No service port advertised"
            );
            None
        }
    }
}

pub fn withdraw(data_dir: &Path) -> io::Result<()> {
    match fs::remove_file(port_file_path(data_dir)) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}
