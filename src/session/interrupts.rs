//! Operator hotkeys delivered to the run-loop as discrete commands.
//!
//! The listener reads single keys on a blocking thread and pushes
//! [`Interrupt`]s into an unbounded channel. The run-loop drains the
//! channel between stories; it never polls the terminal itself.

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const POLL_TIMEOUT: Duration = Duration::from_millis(100);
const RELEASE_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Pause,
    Skip,
    Abort,
    Ask,
    Status,
    Pivot,
    Help,
}

impl Interrupt {
    pub fn from_key(code: KeyCode, modifiers: KeyModifiers) -> Option<Self> {
        match code {
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => Some(Self::Abort),
            KeyCode::Char('p') => Some(Self::Pause),
            KeyCode::Char('s') => Some(Self::Skip),
            KeyCode::Char('q') => Some(Self::Abort),
            KeyCode::Char('?') => Some(Self::Ask),
            KeyCode::Char('v') => Some(Self::Pivot),
            KeyCode::Char('i') => Some(Self::Status),
            KeyCode::Char('h') => Some(Self::Help),
            _ => None,
        }
    }
}

pub const HELP_TEXT: &str = "\
Hotkeys (take effect between stories):
  p  pause after the current story
  s  skip the next story
  q  abort the session (Ctrl+C also works)
  ?  ask the agent a question
  v  pivot: reprioritize, add a story, skip remaining, restart current
  i  show session status
  h  show this help";

pub type InterruptSender = mpsc::UnboundedSender<Interrupt>;
pub type InterruptReceiver = mpsc::UnboundedReceiver<Interrupt>;

pub fn channel() -> (InterruptSender, InterruptReceiver) {
    mpsc::unbounded_channel()
}

/// Everything currently queued, in arrival order.
pub fn drain(rx: &mut InterruptReceiver) -> Vec<Interrupt> {
    let mut pending = Vec::new();
    while let Ok(interrupt) = rx.try_recv() {
        pending.push(interrupt);
    }
    pending
}

/// Lets interactive prompts take the terminal away from the listener.
///
/// Both flags change under the `wake` lock so neither side misses the
/// other's transition.
#[derive(Clone, Default)]
pub struct ListenerControl {
    suspended: Arc<AtomicBool>,
    released: Arc<AtomicBool>,
    wake: Arc<(Mutex<()>, Condvar)>,
}

impl ListenerControl {
    /// Release raw mode and stop reading keys until [`Self::resume`].
    pub fn suspend(&self) {
        let (lock, cvar) = &*self.wake;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.suspended.store(true, Ordering::SeqCst);
        // Wait for the listener thread to let go of the terminal
        let timed_out = match cvar.wait_timeout_while(guard, RELEASE_TIMEOUT, |_| {
            !self.released.load(Ordering::SeqCst)
        }) {
            Ok((_, result)) => result.timed_out(),
            Err(poisoned) => poisoned.into_inner().1.timed_out(),
        };
        if timed_out {
            warn!("hotkey listener did not release the terminal in time");
        }
    }

    /// Hand the terminal back and wake the listener at once.
    pub fn resume(&self) {
        let (lock, cvar) = &*self.wake;
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.released.store(false, Ordering::SeqCst);
        self.suspended.store(false, Ordering::SeqCst);
        cvar.notify_all();
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Listener side: acknowledge a suspend, then sleep until resumed or
    /// `timeout` passes.
    fn park(&self, timeout: Duration) {
        let (lock, cvar) = &*self.wake;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.is_suspended() {
            return;
        }
        self.released.store(true, Ordering::SeqCst);
        cvar.notify_all();
        // A resume clears the release even if a new suspend follows at once
        let _ = cvar.wait_timeout_while(guard, timeout, |_| {
            self.is_suspended() && self.is_released()
        });
    }
}

/// Single-key hotkey reader for interactive sessions.
pub struct HotkeyListener {
    control: ListenerControl,
    stop: Arc<AtomicBool>,
    keys: Option<tokio::task::JoinHandle<()>>,
    signals: tokio::task::JoinHandle<()>,
}

impl HotkeyListener {
    /// Start reading keys. Only call this when stdin is a terminal.
    pub fn start(tx: InterruptSender) -> Result<Self> {
        enable_raw_mode().context("Failed to enable raw mode")?;

        let control = ListenerControl::default();
        let stop = Arc::new(AtomicBool::new(false));

        let keys = {
            let control = control.clone();
            let stop = stop.clone();
            let tx = tx.clone();
            tokio::task::spawn_blocking(move || read_keys(&tx, &control, &stop))
        };

        // Ctrl+C while a prompt owns the terminal arrives as a signal
        let signals = tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if tx.send(Interrupt::Abort).is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            control,
            stop,
            keys: Some(keys),
            signals,
        })
    }

    pub fn control(&self) -> ListenerControl {
        self.control.clone()
    }

    /// Stop the listener and restore the terminal.
    pub async fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.signals.abort();
        if let Some(keys) = self.keys.take() {
            let _ = keys.await;
        }
        let _ = disable_raw_mode();
    }
}

impl Drop for HotkeyListener {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.signals.abort();
        let _ = disable_raw_mode();
    }
}

fn read_keys(tx: &InterruptSender, control: &ListenerControl, stop: &AtomicBool) {
    let mut raw = true;
    while !stop.load(Ordering::SeqCst) {
        if control.is_suspended() {
            if raw {
                let _ = disable_raw_mode();
                raw = false;
            }
            control.park(POLL_TIMEOUT);
            continue;
        }
        if !raw {
            if enable_raw_mode().is_err() {
                std::thread::sleep(POLL_TIMEOUT);
                continue;
            }
            raw = true;
        }

        match event::poll(POLL_TIMEOUT) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                warn!(error = %e, "hotkey poll failed, listener stopping");
                break;
            }
        }
        let Ok(Event::Key(key)) = event::read() else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        if let Some(interrupt) = Interrupt::from_key(key.code, key.modifiers) {
            debug!(?interrupt, "hotkey");
            if tx.send(interrupt).is_err() {
                break;
            }
        }
    }
    if raw {
        let _ = disable_raw_mode();
    }
}
