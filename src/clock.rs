//! Wall clock and readiness collaborators.
//!
//! The dispatcher only ever asks the clock what time it is and to sleep;
//! tests swap in a fake that records sleeps instead of performing them.

use crate::frame::Timestamp;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds since the epoch for 2020-01-01. A board whose clock reads earlier
/// than this has not been synchronized since boot.
pub const SYNCED_EPOCH_FLOOR: i64 = 1_577_836_800;

/// Source of wall-clock time for the dispatcher.
pub trait Clock {
    fn now(&self) -> Timestamp;

    fn sleep(&self, duration: Duration);
}

/// The host's real-time clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(since) => Timestamp::new(since.as_secs() as i64, since.subsec_nanos() as i64),
            // A clock before 1970 is as unsynchronized as it gets.
            Err(before) => {
                let d = before.duration();
                Timestamp::new(-(d.as_secs() as i64), -(d.subsec_nanos() as i64))
            }
        }
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// "Network is up" and "clock is synchronized" signals.
///
/// The blocking waits poll the non-blocking checks by default. The
/// `_or_cancel` variants give up once `cancel` is set, checked once per poll
/// interval, and return whether the condition was reached.
pub trait Readiness {
    fn wifi_is_connected(&self) -> bool;

    fn clock_is_synchronized(&self) -> bool;

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(500)
    }

    fn wait_for_wifi(&self) {
        self.wait_for_wifi_or_cancel(&AtomicBool::new(false));
    }

    fn wait_for_clock_sync(&self) {
        self.wait_for_clock_sync_or_cancel(&AtomicBool::new(false));
    }

    fn wait_for_wifi_or_cancel(&self, cancel: &AtomicBool) -> bool {
        poll_until(
            || self.wifi_is_connected(),
            self.poll_interval(),
            cancel,
            ("waiting for network...", "network is up"),
        )
    }

    fn wait_for_clock_sync_or_cancel(&self, cancel: &AtomicBool) -> bool {
        poll_until(
            || self.clock_is_synchronized(),
            self.poll_interval(),
            cancel,
            ("waiting for wall clock synchronization...", "wall clock synchronized"),
        )
    }
}

fn poll_until(
    ready: impl Fn() -> bool,
    poll: Duration,
    cancel: &AtomicBool,
    (waiting, done): (&str, &str),
) -> bool {
    if ready() {
        return true;
    }
    tracing::info!("{}", waiting);
    while !ready() {
        if cancel.load(Ordering::Relaxed) {
            tracing::info!("readiness wait cancelled");
            return false;
        }
        thread::sleep(poll);
    }
    tracing::info!("{}", done);
    true
}

/// Readiness as seen from a Linux board: the network counts as up once the
/// kernel has a route to the broker, the clock once it reads a plausible
/// date.
#[derive(Clone, Debug)]
pub struct HostReadiness {
    broker_addr: String,
    poll: Duration,
}

impl HostReadiness {
    pub fn new(broker_addr: impl Into<String>, poll: Duration) -> Self {
        Self {
            broker_addr: broker_addr.into(),
            poll,
        }
    }
}

impl Readiness for HostReadiness {
    fn wifi_is_connected(&self) -> bool {
        // Connecting a UDP socket only asks the kernel for a route; nothing
        // is sent.
        UdpSocket::bind("0.0.0.0:0")
            .and_then(|socket| socket.connect(&self.broker_addr))
            .is_ok()
    }

    fn clock_is_synchronized(&self) -> bool {
        SystemClock.now().secs >= SYNCED_EPOCH_FLOOR
    }

    fn poll_interval(&self) -> Duration {
        self.poll
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn system_clock_reads_a_synced_host_clock() {
        // CI machines are NTP-synchronized.
        let now = SystemClock.now();
        assert!(now.secs >= SYNCED_EPOCH_FLOOR);
        assert!((0..1_000_000_000).contains(&now.nanos));
    }

    struct Flaky {
        polls_until_up: Cell<u32>,
    }

    impl Readiness for Flaky {
        fn wifi_is_connected(&self) -> bool {
            let left = self.polls_until_up.get();
            self.polls_until_up.set(left.saturating_sub(1));
            left == 0
        }

        fn clock_is_synchronized(&self) -> bool {
            true
        }

        fn poll_interval(&self) -> Duration {
            Duration::from_millis(1)
        }
    }

    #[test]
    fn wait_for_wifi_polls_until_connected() {
        let flaky = Flaky {
            polls_until_up: Cell::new(3),
        };
        flaky.wait_for_wifi();
        assert_eq!(flaky.polls_until_up.get(), 0);
        flaky.wait_for_clock_sync();
    }

    struct Offline;

    impl Readiness for Offline {
        fn wifi_is_connected(&self) -> bool {
            false
        }

        fn clock_is_synchronized(&self) -> bool {
            false
        }

        fn poll_interval(&self) -> Duration {
            Duration::from_millis(1)
        }
    }

    #[test]
    fn cancel_ends_a_pending_wait() {
        let cancel = AtomicBool::new(false);
        let reached = thread::scope(|s| {
            let waiter = s.spawn(|| Offline.wait_for_wifi_or_cancel(&cancel));
            thread::sleep(Duration::from_millis(20));
            cancel.store(true, Ordering::Relaxed);
            waiter.join().unwrap()
        });
        assert!(!reached);
        assert!(!Offline.wait_for_clock_sync_or_cancel(&cancel));
    }

    #[test]
    fn ready_wait_ignores_cancel() {
        let cancel = AtomicBool::new(true);
        let flaky = Flaky {
            polls_until_up: Cell::new(0),
        };
        assert!(flaky.wait_for_wifi_or_cancel(&cancel));
        assert!(flaky.wait_for_clock_sync_or_cancel(&cancel));
    }

    #[test]
    fn loopback_broker_is_routable() {
        let readiness = HostReadiness::new("127.0.0.1:4222", Duration::from_millis(1));
        assert!(readiness.wifi_is_connected());
        assert!(readiness.clock_is_synchronized());
    }
}
