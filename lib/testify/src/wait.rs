use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::time::sleep;

const WAIT_FOR_MIN_MILLIS: u64 = 5; // The minimum time to pause before retrying
const WAIT_FOR_MAX_MILLIS: u64 = 500; // The maximum time to pause before retrying

// Wait (for 10s) for a TCP socket to be reachable
pub async fn wait_for_tcp(addr: SocketAddr) {
    let timeout = Duration::from_secs(10);
    let start = Instant::now();
    let mut delay = WAIT_FOR_MIN_MILLIS;

    loop {
        if let Ok(Ok(_conn)) =
            tokio::time::timeout(Duration::from_millis(500), TcpStream::connect(addr)).await
        {
            break;
        }

        if start.elapsed() > timeout {
            panic!("Timed out waiting for connection to {addr}");
        }

        sleep(Duration::from_millis(delay)).await;
        // quadratic backoff up to a maximum delay
        delay = (2 * delay).min(WAIT_FOR_MAX_MILLIS);
    }
}
