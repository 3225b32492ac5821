//! Command queue plus poll loop: the worker shape shared by bindings that
//! talk to slow devices.
//!
//! `send_command` pushes onto a bounded [`CommandQueue`] and returns. One
//! [`PollWorker`] per binding waits for the next command or the next device
//! poll deadline, whichever comes first. Commands are drained before any
//! poll; a device touched by a command has its poll deferred by one interval.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use uhab_domain::error::{HubError, ResourceExhausted};

/// The device side of a poll loop.
pub trait PollDriver: Send + 'static {
    type Command: Send + 'static;

    /// Name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Poll interval of each device, indexed by device number.
    fn poll_intervals(&self) -> Vec<Duration>;

    /// Execute one command. Returns the device it touched, if any.
    fn apply(&mut self, command: Self::Command) -> Option<usize>;

    /// Read device `device` and report changes.
    fn poll(&mut self, device: usize);
}

/// Producer side of a binding's bounded command queue.
#[derive(Debug)]
pub struct CommandQueue<C> {
    sender: mpsc::Sender<C>,
    resource: &'static str,
}

impl<C> Clone for CommandQueue<C> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            resource: self.resource,
        }
    }
}

impl<C> CommandQueue<C> {
    /// Create a queue of `capacity` commands. `resource` names it in errors.
    #[must_use]
    pub fn bounded(resource: &'static str, capacity: usize) -> (Self, mpsc::Receiver<C>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender, resource }, receiver)
    }

    /// Enqueue without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::ResourceExhausted`] when full and
    /// [`HubError::Closed`] once the worker has stopped.
    pub fn push(&self, command: C) -> Result<(), HubError> {
        self.sender.try_send(command).map_err(|err| match err {
            TrySendError::Full(_) => ResourceExhausted {
                resource: self.resource,
            }
            .into(),
            TrySendError::Closed(_) => HubError::Closed(self.resource),
        })
    }
}

struct Schedule {
    interval: Duration,
    next: Instant,
}

/// Drives a [`PollDriver`] from its command queue and poll deadlines.
///
/// The driver talks to serial lines with blocking calls, so every
/// [`PollDriver::apply`] and [`PollDriver::poll`] runs on the blocking pool
/// while this loop only waits for commands and deadlines.
pub struct PollWorker<D: PollDriver> {
    name: &'static str,
    driver: Arc<Mutex<D>>,
    commands: mpsc::Receiver<D::Command>,
    schedule: Vec<Schedule>,
}

impl<D: PollDriver> PollWorker<D> {
    /// Every device is due for its first poll immediately.
    pub fn new(driver: D, commands: mpsc::Receiver<D::Command>) -> Self {
        let now = Instant::now();
        let schedule = driver
            .poll_intervals()
            .into_iter()
            .map(|interval| Schedule {
                interval,
                next: now,
            })
            .collect();
        Self {
            name: driver.name(),
            driver: Arc::new(Mutex::new(driver)),
            commands,
            schedule,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until every [`CommandQueue`] has been dropped.
    pub async fn run(mut self) {
        tracing::info!(
            worker = self.name,
            devices = self.schedule.len(),
            "poll worker started"
        );
        loop {
            let received = match self.next_deadline() {
                Some(at) => tokio::select! {
                    biased;
                    command = self.commands.recv() => Some(command),
                    () = tokio::time::sleep_until(at) => None,
                },
                None => Some(self.commands.recv().await),
            };
            match received {
                Some(Some(command)) => {
                    let mut pending = vec![command];
                    while let Ok(command) = self.commands.try_recv() {
                        pending.push(command);
                    }
                    self.apply(pending).await;
                }
                Some(None) => break,
                None => {}
            }
            self.poll_due().await;
        }
        tracing::info!(worker = self.name, "poll worker stopped");
    }

    async fn apply(&mut self, commands: Vec<D::Command>) {
        let touched = on_blocking_pool(self.name, &self.driver, move |driver| {
            commands
                .into_iter()
                .filter_map(|command| driver.apply(command))
                .collect::<Vec<_>>()
        })
        .await
        .unwrap_or_default();
        let now = Instant::now();
        for device in touched {
            if let Some(schedule) = self.schedule.get_mut(device) {
                schedule.next = now + schedule.interval;
            }
        }
    }

    async fn poll_due(&mut self) {
        let now = Instant::now();
        let due: Vec<usize> = (0..self.schedule.len())
            .filter(|&device| self.schedule[device].next <= now)
            .collect();
        if due.is_empty() {
            return;
        }
        let polled = due.clone();
        on_blocking_pool(self.name, &self.driver, move |driver| {
            for device in polled {
                driver.poll(device);
            }
        })
        .await;
        let now = Instant::now();
        for device in due {
            let schedule = &mut self.schedule[device];
            schedule.next = now + schedule.interval;
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.schedule.iter().map(|s| s.next).min()
    }
}

/// Run `work` against the driver on the blocking pool.
async fn on_blocking_pool<D, R, F>(name: &'static str, driver: &Arc<Mutex<D>>, work: F) -> Option<R>
where
    D: PollDriver,
    R: Send + 'static,
    F: FnOnce(&mut D) -> R + Send + 'static,
{
    let driver = Arc::clone(driver);
    let task = tokio::task::spawn_blocking(move || {
        let mut driver = driver.lock().unwrap_or_else(PoisonError::into_inner);
        work(&mut driver)
    });
    match task.await {
        Ok(result) => Some(result),
        Err(err) => {
            tracing::error!(%err, worker = name, "device I/O task failed");
            None
        }
    }
}
