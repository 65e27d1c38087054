//! Named background threads with cooperative cancellation.
//!
//! A [`Worker`] owns one thread and the sending half of a stop channel.
//! Dropping that sender disconnects the channel, which the thread observes
//! through its [`StopSignal`]; the same channel doubles as an interruptible
//! sleep so loops waiting out a reconnect delay react to stop immediately.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

/// Receiving side of a worker's stop channel.
#[derive(Debug)]
pub struct StopSignal {
    rx: Receiver<()>,
}

impl StopSignal {
    /// Returns true once the owning [`Worker`] has asked the thread to stop.
    pub fn is_stopped(&self) -> bool {
        !matches!(self.rx.try_recv(), Err(TryRecvError::Empty))
    }

    /// Sleeps for `duration` or until stop is requested.
    ///
    /// Returns true if the sleep was cut short by a stop request.
    pub fn sleep(&self, duration: Duration) -> bool {
        !matches!(self.rx.recv_timeout(duration), Err(RecvTimeoutError::Timeout))
    }
}

/// Handle to a running background thread.
#[derive(Debug)]
pub struct Worker {
    name: String,
    stop_tx: Option<Sender<()>>,
    done_rx: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawns `body` on a new thread called `name`.
    pub fn spawn<F>(name: &str, body: F) -> std::io::Result<Self>
    where
        F: FnOnce(StopSignal) + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let (done_tx, done_rx) = bounded::<()>(1);

        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            body(StopSignal { rx: stop_rx });
            let _ = done_tx.send(());
        })?;

        Ok(Self {
            name: name.to_string(),
            stop_tx: Some(stop_tx),
            done_rx,
            handle: Some(handle),
        })
    }

    /// Returns the thread name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true if the thread body has returned.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Signals the thread to stop and waits up to `timeout` for it to exit.
    ///
    /// Returns true if the thread exited in time. Otherwise the thread is
    /// detached and keeps running until its blocking call returns.
    pub fn stop(mut self, timeout: Duration) -> bool {
        self.stop_tx.take();

        match self.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.handle.take() {
                    if handle.join().is_err() {
                        tracing::error!(worker = %self.name, "Worker thread panicked");
                    }
                }
                tracing::debug!(worker = %self.name, "Worker stopped");
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    worker = %self.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "Worker did not stop in time, detaching"
                );
                self.handle.take();
                false
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // Disconnecting the stop channel is enough; never block in drop.
        self.stop_tx.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_stop_interrupts_sleep() {
        let observed = Arc::new(AtomicU32::new(0));
        let flags = Arc::clone(&observed);
        let worker = Worker::spawn("sleeper", move |signal| {
            if !signal.is_stopped() {
                flags.fetch_or(1, Ordering::SeqCst);
            }
            if signal.sleep(Duration::from_secs(30)) && signal.is_stopped() {
                flags.fetch_or(2, Ordering::SeqCst);
            }
        })
        .unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let start = Instant::now();
        assert!(worker.stop(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(observed.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_sleep_times_out_without_stop() {
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&ticks);
        let worker = Worker::spawn("ticker", move |signal| {
            while !signal.sleep(Duration::from_millis(5)) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();

        std::thread::sleep(Duration::from_millis(60));
        assert!(worker.stop(Duration::from_secs(1)));
        assert!(ticks.load(Ordering::SeqCst) > 1);
    }

    #[test]
    fn test_stop_times_out_on_stuck_thread() {
        let worker = Worker::spawn("stuck", |_signal| {
            std::thread::sleep(Duration::from_millis(300));
        })
        .unwrap();

        assert_eq!(worker.name(), "stuck");
        assert!(!worker.stop(Duration::from_millis(20)));
    }

    #[test]
    fn test_finished_body() {
        let worker = Worker::spawn("oneshot", |_signal| {}).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(worker.is_finished());
        assert!(worker.stop(Duration::from_millis(10)));
    }
}
