pub mod config;
pub mod device;
pub mod input;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use config::Config;
use device::{ConnectionState, DeviceManager};
use input::{DeckEvent, EventInterpreter};

/// How often pending long-presses are checked while the deck runs
const LONG_PRESS_TICK: Duration = Duration::from_millis(25);

/// Top-level handle over one deck: connection manager plus the event
/// pipeline turning raw records into semantic events.
pub struct Deck {
    manager: Arc<DeviceManager>,
    events: mpsc::UnboundedReceiver<DeckEvent>,
    driver: tokio::task::JoinHandle<()>,
}

impl Deck {
    /// Connect to the deck and start the event pipeline.
    ///
    /// With auto-reconnect on, a failed initial connection is logged and
    /// retried in the background; otherwise it is returned to the caller.
    pub async fn open(config: Config) -> Result<Self> {
        let (record_tx, mut record_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let manager = Arc::new(DeviceManager::new(config.device.clone(), record_tx)?);
        let mut state_rx = manager.subscribe_state();

        match manager.connect() {
            Ok(()) => {}
            Err(e) if config.device.auto_reconnect => {
                warn!("Initial connection failed, retrying in background: {}", e);
            }
            Err(e) => return Err(e.into()),
        }

        let mut interpreter = EventInterpreter::new(
            Duration::from_millis(config.input.long_press_ms),
            event_tx,
        );
        let brightness = config.device.brightness;
        let mgr = Arc::clone(&manager);

        let driver = tokio::spawn(async move {
            let mut tick = tokio::time::interval(LONG_PRESS_TICK);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    record = record_rx.recv() => match record {
                        Some(record) => interpreter.handle_record(record),
                        None => break,
                    },
                    _ = tick.tick() => interpreter.check_long_press(),
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        // Brightness is device-side state; reapply it on
                        // every (re)connect.
                        if *state_rx.borrow_and_update() == ConnectionState::Connected {
                            if let Err(e) = mgr.set_brightness(brightness) {
                                warn!("Could not restore brightness: {}", e);
                            }
                        }
                    }
                }
            }
            debug!("Event driver stopped");
        });

        Ok(Self {
            manager,
            events: event_rx,
            driver,
        })
    }

    /// The underlying connection manager, for commands and state watching
    pub fn manager(&self) -> &DeviceManager {
        &self.manager
    }

    /// Next semantic event, in emission order. `None` after shutdown.
    pub async fn next_event(&mut self) -> Option<DeckEvent> {
        self.events.recv().await
    }

    /// Stop the pipeline and release the device
    pub fn shutdown(&mut self) {
        info!("Shutting down deck...");
        self.driver.abort();
        self.manager.disconnect();
        info!("Shutdown complete");
    }
}
