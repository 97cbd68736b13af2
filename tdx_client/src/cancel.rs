//! Caller-driven cancellation for long operations.
//!
//! A [`Cancel`] is a cloneable trigger. Firing it drops the only sender of a
//! signal channel, which wakes every waiter selecting on the receiving side.
//! An [`Abort`] bundles an optional trigger with an optional deadline and is
//! what the paginated operations and the request waiter consume.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded, never};
use tdx_common::{Result, TdxError};

#[derive(Debug)]
struct Trigger {
    fired: AtomicBool,
    sender: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
}

/// Thread-safe cancellation trigger.
#[derive(Debug, Clone)]
pub struct Cancel {
    trigger: Arc<Trigger>,
}

impl Default for Cancel {
    fn default() -> Self {
        Self::new()
    }
}

impl Cancel {
    /// Token that has not fired.
    pub fn new() -> Self {
        let (sender, signal) = bounded(0);
        Self {
            trigger: Arc::new(Trigger {
                fired: AtomicBool::new(false),
                sender: Mutex::new(Some(sender)),
                signal,
            }),
        }
    }

    /// Fires the trigger. Idempotent.
    pub fn cancel(&self) {
        self.trigger.fired.store(true, Ordering::SeqCst);
        let mut sender = match self.trigger.sender.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sender.take();
    }

    /// Whether [`Cancel::cancel`] has been called on any clone.
    pub fn is_cancelled(&self) -> bool {
        self.trigger.fired.load(Ordering::SeqCst)
    }

    /// Receiver that becomes ready (disconnected) once the trigger fires.
    pub fn signal(&self) -> Receiver<()> {
        self.trigger.signal.clone()
    }
}

/// Cancellation trigger and deadline for one operation.
#[derive(Debug, Clone, Default)]
pub struct Abort {
    cancel: Option<Cancel>,
    deadline: Option<Instant>,
}

impl Abort {
    /// Never aborts.
    pub fn none() -> Self {
        Self::default()
    }

    /// Aborts when `cancel` fires.
    #[must_use]
    pub fn with_cancel(mut self, cancel: Cancel) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Aborts at `deadline`.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Aborts `timeout` from now.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Deadline, if one was set.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fails with [`TdxError::Cancelled`] once cancelled or past the deadline.
    pub fn check(&self) -> Result<()> {
        if self.cancel.as_ref().is_some_and(Cancel::is_cancelled) {
            return Err(TdxError::Cancelled("operation cancelled".to_string()));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(TdxError::Cancelled("deadline reached".to_string()));
        }
        Ok(())
    }

    /// Cancellation signal to select on; never ready without a trigger.
    pub fn signal(&self) -> Receiver<()> {
        match &self.cancel {
            Some(cancel) => cancel.signal(),
            None => never(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::select;
    use std::thread;

    #[test]
    fn firing_wakes_every_clone() {
        let cancel = Cancel::new();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let signal = cancel.signal();
                thread::spawn(move || signal.recv().is_err())
            })
            .collect();

        cancel.clone().cancel();
        for waiter in waiters {
            assert!(waiter.join().unwrap());
        }
        assert!(cancel.is_cancelled());
        cancel.cancel();
    }

    #[test]
    fn check_reports_cancel_and_deadline() {
        assert!(Abort::none().check().is_ok());

        let cancel = Cancel::new();
        let abort = Abort::none().with_cancel(cancel.clone());
        assert!(abort.check().is_ok());
        cancel.cancel();
        assert!(abort.check().unwrap_err().is_cancelled());

        let past = Abort::none().with_deadline(Instant::now() - Duration::from_millis(1));
        assert!(past.check().unwrap_err().is_cancelled());
    }

    #[test]
    fn no_trigger_means_a_silent_signal() {
        let signal = Abort::none().signal();
        select! {
            recv(signal) -> _ => panic!("signal fired without a trigger"),
            default(Duration::from_millis(20)) => {}
        }
    }
}
