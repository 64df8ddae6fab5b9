//! Frame queue and deadline dispatcher.
//!
//! The network path pushes decoded frames into a bounded queue without ever
//! blocking. A single dispatcher, running on its own thread, pops them in
//! FIFO order, sleeps until each frame's deadline and hands it to the
//! display. Frames whose deadline has already passed are dropped unrendered.
//!
//! ## Rust concepts
//! - `std::sync::mpsc::sync_channel` as a bounded queue
//! - `try_send()` for a producer that must not block
//! - generics over the [`Clock`] and [`DisplaySink`] collaborators

use crate::clock::Clock;
use crate::frame::{Frame, Timestamp};
use crate::render::DisplaySink;
use crate::stats::WallStats;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::time::Duration;

// ── Queue ────────────────────────────────────────────────────────────

/// Result of offering a frame to the queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Offer {
    Queued,
    /// Queue at capacity; the frame was discarded.
    Full,
    /// The dispatcher is gone; the frame was discarded.
    Closed,
}

/// Producer half of the frame queue.
#[derive(Clone, Debug)]
pub struct FrameSender {
    tx: SyncSender<Frame>,
}

/// Consumer half of the frame queue.
#[derive(Debug)]
pub struct FrameReceiver {
    rx: Receiver<Frame>,
}

/// Create a queue holding at most `capacity` frames.
///
/// A `capacity` of zero would make every offer fail; callers validate it
/// through [`WallConfig::validate`](crate::WallConfig::validate).
pub fn frame_queue(capacity: usize) -> (FrameSender, FrameReceiver) {
    let (tx, rx) = mpsc::sync_channel(capacity);
    (FrameSender { tx }, FrameReceiver { rx })
}

impl FrameSender {
    /// Enqueue without blocking. A full queue drops the incoming frame;
    /// late frames are worthless, so there is no retry.
    pub fn offer(&self, frame: Frame) -> Offer {
        match self.tx.try_send(frame) {
            Ok(()) => Offer::Queued,
            Err(TrySendError::Full(_)) => Offer::Full,
            Err(TrySendError::Disconnected(_)) => Offer::Closed,
        }
    }

    /// `true` when the frame was queued.
    pub fn try_enqueue(&self, frame: Frame) -> bool {
        self.offer(frame) == Offer::Queued
    }
}

impl FrameReceiver {
    /// Block until a frame is available. `None` once every sender is gone
    /// and the queue is drained.
    pub fn dequeue_blocking(&self) -> Option<Frame> {
        self.rx.recv().ok()
    }
}

// ── Deadline planning ────────────────────────────────────────────────

/// What to do with a frame, given the current time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// The deadline is not in the future.
    Late { by: Duration },
    /// Sleep this long, then render.
    Wait(Duration),
}

/// Decide how to handle a frame due at `deadline` when the clock reads `now`.
///
/// Waits are capped at `max_wait` so a corrupt deadline or a clock jump
/// cannot stall the dispatcher.
pub fn plan(deadline: Timestamp, now: Timestamp, max_wait: Duration) -> Dispatch {
    let delta = deadline.nanos_since(now);
    if delta <= 0 {
        return Dispatch::Late {
            by: nanos_to_duration(-delta),
        };
    }
    Dispatch::Wait(nanos_to_duration(delta).min(max_wait))
}

fn nanos_to_duration(nanos: i128) -> Duration {
    u64::try_from(nanos).map_or(Duration::MAX, Duration::from_nanos)
}

// ── Dispatcher ───────────────────────────────────────────────────────

/// What happened to one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Rendered { waited: Duration },
    Missed { by: Duration },
}

/// The single consumer of the frame queue.
pub struct Dispatcher<C, S> {
    clock: C,
    sink: S,
    max_wait: Duration,
    stats: Arc<WallStats>,
    shutdown: Arc<AtomicBool>,
}

impl<C: Clock, S: DisplaySink> Dispatcher<C, S> {
    pub fn new(clock: C, sink: S, max_wait: Duration, stats: Arc<WallStats>) -> Self {
        Self {
            clock,
            sink,
            max_wait,
            stats,
            shutdown: Arc::default(),
        }
    }

    /// Once `shutdown` is set, frames still queued are discarded unrendered.
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Sleep until the frame is due and render it, or drop it when late.
    pub fn dispatch(&mut self, frame: Frame) -> Outcome {
        match plan(frame.deadline(), self.clock.now(), self.max_wait) {
            Dispatch::Late { by } => {
                tracing::warn!(deadline = ?frame.deadline(), "missed deadline by {:?}", by);
                self.stats.frame_missed();
                Outcome::Missed { by }
            }
            Dispatch::Wait(wait) => {
                self.clock.sleep(wait);
                self.sink.render(frame.pixels());
                self.stats.frame_rendered();
                tracing::trace!(deadline = ?frame.deadline(), "rendered after {:?}", wait);
                Outcome::Rendered { waited: wait }
            }
        }
    }

    /// Main dispatch loop. Returns once the queue is closed and drained, or
    /// at the next frame after shutdown is requested.
    pub fn run(&mut self, queue: FrameReceiver) {
        tracing::info!("dispatcher started, waiting for frames...");
        while let Some(frame) = queue.dequeue_blocking() {
            if self.shutdown.load(Ordering::Relaxed) {
                tracing::info!("dispatcher: shutdown requested, discarding queued frames.");
                return;
            }
            self.dispatch(frame);
        }
        tracing::info!("dispatcher: queue closed, shutting down.");
    }

    /// Give back the sink, e.g. to blank the display on shutdown.
    pub fn into_sink(self) -> S {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Color;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    const MAX_WAIT: Duration = Duration::from_millis(3000);

    #[derive(Debug, PartialEq, Eq)]
    enum Step {
        Sleep(Duration),
        Render(u8),
    }

    type Log = Rc<RefCell<Vec<Step>>>;

    /// A clock that only moves when slept on.
    struct FakeClock {
        now: Cell<Timestamp>,
        log: Log,
    }

    impl Clock for FakeClock {
        fn now(&self) -> Timestamp {
            self.now.get()
        }

        fn sleep(&self, duration: Duration) {
            self.now.set(self.now.get().after(duration));
            self.log.borrow_mut().push(Step::Sleep(duration));
        }
    }

    /// Records the red channel of the first pixel as a frame id.
    struct RecordingSink {
        log: Log,
    }

    impl DisplaySink for RecordingSink {
        fn render(&mut self, pixels: &[Color]) {
            self.log.borrow_mut().push(Step::Render(pixels[0].r));
        }
    }

    const NOW: Timestamp = Timestamp::new(1_700_000_000, 0);

    fn dispatcher() -> (Dispatcher<FakeClock, RecordingSink>, Log, Arc<WallStats>) {
        let log: Log = Rc::default();
        let stats = Arc::new(WallStats::new());
        let clock = FakeClock {
            now: Cell::new(NOW),
            log: log.clone(),
        };
        let sink = RecordingSink { log: log.clone() };
        (Dispatcher::new(clock, sink, MAX_WAIT, stats.clone()), log, stats)
    }

    fn frame(id: u8, deadline: Timestamp) -> Frame {
        Frame::new(deadline, vec![Color::new(id, 0, 0)])
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[rstest]
    #[case(NOW.after(ms(250)), Dispatch::Wait(ms(250)))]
    #[case(NOW.after(ms(3000)), Dispatch::Wait(ms(3000)))]
    #[case(NOW.after(ms(3001)), Dispatch::Wait(ms(3000)))]
    #[case(Timestamp::new(i64::MAX, 0), Dispatch::Wait(ms(3000)))]
    #[case(NOW, Dispatch::Late { by: Duration::ZERO })]
    #[case(Timestamp::new(NOW.secs - 1, 500_000_000), Dispatch::Late { by: ms(500) })]
    fn plan_cases(#[case] deadline: Timestamp, #[case] expected: Dispatch) {
        assert_eq!(plan(deadline, NOW, MAX_WAIT), expected);
    }

    #[test]
    fn late_frames_are_never_rendered() {
        let (mut d, log, stats) = dispatcher();
        let outcome = d.dispatch(frame(1, Timestamp::new(NOW.secs - 2, 0)));

        assert_eq!(outcome, Outcome::Missed { by: ms(2000) });
        assert!(log.borrow().is_empty());
        assert_eq!(stats.snapshot().missed, 1);
        assert_eq!(stats.snapshot().rendered, 0);
    }

    #[test]
    fn far_future_deadline_sleeps_exactly_the_cap() {
        let (mut d, log, _) = dispatcher();
        let outcome = d.dispatch(frame(7, NOW.after(Duration::from_secs(3600))));

        assert_eq!(outcome, Outcome::Rendered { waited: ms(3000) });
        assert_eq!(*log.borrow(), vec![Step::Sleep(ms(3000)), Step::Render(7)]);
    }

    #[test]
    fn sleeps_until_deadline_then_renders() {
        let (mut d, log, stats) = dispatcher();
        d.dispatch(frame(3, NOW.after(ms(40))));

        assert_eq!(*log.borrow(), vec![Step::Sleep(ms(40)), Step::Render(3)]);
        assert_eq!(stats.snapshot().rendered, 1);
    }

    #[test]
    fn run_renders_in_fifo_order_and_skips_stale() {
        let (mut d, log, _) = dispatcher();
        let (tx, rx) = frame_queue(8);

        // Deadlines out of order on purpose: FIFO wins, and frame 2 is
        // stale by the time frame 1's sleep is over.
        assert!(tx.try_enqueue(frame(1, NOW.after(ms(100)))));
        assert!(tx.try_enqueue(frame(2, NOW.after(ms(50)))));
        assert!(tx.try_enqueue(frame(3, NOW.after(ms(150)))));
        drop(tx);

        d.run(rx);
        assert_eq!(
            *log.borrow(),
            vec![
                Step::Sleep(ms(100)),
                Step::Render(1),
                Step::Sleep(ms(50)),
                Step::Render(3),
            ]
        );
    }

    #[test]
    fn shutdown_discards_queued_frames() {
        let (d, log, stats) = dispatcher();
        let shutdown = Arc::new(AtomicBool::new(true));
        let mut d = d.with_shutdown(shutdown);
        let (tx, rx) = frame_queue(8);
        for id in 0..3 {
            assert!(tx.try_enqueue(frame(id, NOW.after(Duration::from_secs(3)))));
        }
        drop(tx);

        d.run(rx);
        assert!(log.borrow().is_empty());
        assert_eq!(stats.snapshot().rendered, 0);
    }

    #[test]
    fn full_queue_drops_exactly_the_newest_frame() {
        const K: u8 = 4;
        let (tx, rx) = frame_queue(K as usize);

        let offers: Vec<Offer> = (0..=K).map(|id| tx.offer(frame(id, NOW.after(ms(10))))).collect();
        assert_eq!(offers.iter().filter(|o| **o == Offer::Full).count(), 1);
        assert_eq!(offers.last(), Some(&Offer::Full));
        drop(tx);

        let delivered: Vec<u8> = std::iter::from_fn(|| rx.dequeue_blocking())
            .map(|f| f.pixels()[0].r)
            .collect();
        assert_eq!(delivered, vec![0, 1, 2, 3]);
    }

    #[test]
    fn offer_after_consumer_gone_is_closed() {
        let (tx, rx) = frame_queue(2);
        drop(rx);
        assert_eq!(tx.offer(frame(0, NOW)), Offer::Closed);
    }

    #[test]
    fn consumer_blocks_across_threads() {
        let (tx, rx) = frame_queue(1);
        let consumer = std::thread::spawn(move || rx.dequeue_blocking().map(|f| f.pixels()[0].r));
        std::thread::sleep(ms(20));
        assert!(tx.try_enqueue(frame(9, NOW)));
        assert_eq!(consumer.join().unwrap(), Some(9));
    }
}
