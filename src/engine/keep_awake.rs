use crate::engine::IdleInhibitor;
use anyhow::{Result, bail};
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

enum ControlMsg {
    Stop,
}

/// Runs `poke` every `interval` on a background thread while started.
///
/// The thread shares nothing with the trainer core; it is only ever told to start or stop.
pub struct KeepAwake {
    interval: Duration,
    poke: Arc<dyn Fn() + Send + Sync>,
    control_tx: Option<Sender<ControlMsg>>,
    worker_handle: Option<JoinHandle<()>>,
}

impl KeepAwake {
    pub fn new<F>(interval: Duration, poke: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            interval,
            poke: Arc::new(poke),
            control_tx: None,
            worker_handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker_handle.is_some()
    }
}

impl IdleInhibitor for KeepAwake {
    fn start(&mut self) -> Result<()> {
        if self.worker_handle.is_some() {
            bail!("Keep-awake already running..!")
        }

        let (tx, rx) = mpsc::channel::<ControlMsg>();
        let poke = Arc::clone(&self.poke);
        let interval = self.interval;

        let handle = thread::Builder::new()
            .name("keep-awake".into())
            .spawn(move || {
                loop {
                    match rx.recv_timeout(interval) {
                        Ok(ControlMsg::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => poke(),
                    }
                }
                debug!("Keep-awake thread finished..!");
            })?;

        self.control_tx = Some(tx);
        self.worker_handle = Some(handle);
        info!("Started keep-awake every {:?}..!", self.interval);

        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let Some(tx) = self.control_tx.take() else {
            bail!("Keep-awake is not running..!")
        };
        let _ = tx.send(ControlMsg::Stop);

        if let Some(handle) = self.worker_handle.take()
            && handle.join().is_err()
        {
            warn!("Keep-awake thread panicked..!");
        }
        debug!("Keep-awake thread joined..!");

        Ok(())
    }
}

impl Drop for KeepAwake {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn pokes_until_stopped() {
        env_logger::try_init().unwrap_or(());

        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let mut keep_awake = KeepAwake::new(Duration::from_millis(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(keep_awake.stop().is_err());
        keep_awake.start().unwrap();
        assert!(keep_awake.start().is_err());

        spin_sleep::sleep(Duration::from_millis(60));
        keep_awake.stop().unwrap();
        assert!(!keep_awake.is_running());

        let seen = count.load(Ordering::SeqCst);
        assert!(seen >= 1, "expected at least one poke, saw {}", seen);

        spin_sleep::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), seen);
    }
}
