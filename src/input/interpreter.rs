//! Semantic event interpretation
//!
//! Turns the raw event records decoded from ACK frames into timestamped
//! button and encoder events, owning all press-duration and modifier
//! state. Hardware ordering over USB is not fully trustworthy, so the
//! interpreter is deliberately forgiving: duplicate presses, releases
//! without a press, and unknown codes are dropped, never errors.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::debug;

use crate::device::events::{classify, CodeClass, ElementAddress, Rotation, MODIFIER_ELEMENT};
use crate::device::RawEventRecord;

/// What a button-style element did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonKind {
    Press,
    Release,
    /// Emitted once per press cycle when the hold exceeds the threshold.
    /// Does not suppress the eventual release.
    LongPress,
}

/// Semantic event for LCD buttons, plain buttons and encoder centers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonEvent {
    pub element: ElementAddress,
    pub kind: ButtonKind,
    /// Modifier state at the moment of emission, read fresh every time
    pub modifier: bool,
    pub at: Instant,
}

/// Semantic event for one encoder rotation tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderEvent {
    pub element: ElementAddress,
    pub rotation: Rotation,
    pub modifier: bool,
    pub at: Instant,
}

/// Event stream delivered to the action-binding consumer, in emission order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeckEvent {
    Button(ButtonEvent),
    Encoder(EncoderEvent),
}

/// Per-element press bookkeeping; cleared on release
struct PressState {
    down_since: Instant,
    long_press_fired: bool,
}

/// Stateful raw-record to semantic-event mapper
pub struct EventInterpreter {
    long_press: Duration,
    pressed: HashMap<ElementAddress, PressState>,
    modifier_down: bool,
    sink: mpsc::UnboundedSender<DeckEvent>,
    last_event: Option<DeckEvent>,
}

impl EventInterpreter {
    /// `long_press` is supplied by the configuration collaborator; this
    /// layer hardcodes no threshold of its own.
    pub fn new(long_press: Duration, sink: mpsc::UnboundedSender<DeckEvent>) -> Self {
        Self {
            long_press,
            pressed: HashMap::new(),
            modifier_down: false,
            sink,
            last_event: None,
        }
    }

    /// Most recent emitted event, kept for UI feedback
    pub fn last_event(&self) -> Option<&DeckEvent> {
        self.last_event.as_ref()
    }

    /// Whether the modifier element is currently held
    pub fn modifier_active(&self) -> bool {
        self.modifier_down
    }

    /// Consume one raw record; the record's arrival timestamp is the
    /// event time.
    pub fn handle_record(&mut self, record: RawEventRecord) {
        let Some(class) = classify(record.code) else {
            debug!(
                "Unknown event: code=0x{:02x}, state=0x{:02x}",
                record.code, record.state
            );
            return;
        };

        match class {
            CodeClass::Rotate(element, rotation) => {
                // Rotation frames are discrete ticks, one event per frame
                self.emit(DeckEvent::Encoder(EncoderEvent {
                    element,
                    rotation,
                    modifier: self.modifier_down,
                    at: record.at,
                }));
            }
            CodeClass::Switch(element) => {
                let is_down = record.state != 0;
                // Modifier state updates before its own event goes out
                if element == MODIFIER_ELEMENT {
                    self.modifier_down = is_down;
                }
                if is_down {
                    self.handle_press(element, record.at);
                } else {
                    self.handle_release(element, record.at);
                }
            }
        }
    }

    /// Fire pending long-presses. Called periodically while anything may
    /// be held down.
    pub fn check_long_press(&mut self) {
        self.check_long_press_at(Instant::now());
    }

    /// Clock-injected variant of [`check_long_press`](Self::check_long_press)
    pub fn check_long_press_at(&mut self, now: Instant) {
        let threshold = self.long_press;
        let due: Vec<ElementAddress> = self
            .pressed
            .iter()
            .filter(|(_, state)| {
                !state.long_press_fired
                    && now.saturating_duration_since(state.down_since) >= threshold
            })
            .map(|(&element, _)| element)
            .collect();

        for element in due {
            if let Some(state) = self.pressed.get_mut(&element) {
                state.long_press_fired = true;
            }
            let modifier = self.modifier_down;
            self.emit(DeckEvent::Button(ButtonEvent {
                element,
                kind: ButtonKind::LongPress,
                modifier,
                at: now,
            }));
        }
    }

    fn handle_press(&mut self, element: ElementAddress, at: Instant) {
        if self.pressed.contains_key(&element) {
            // Duplicate press frame (bounce), ignore
            debug!("Duplicate press for {:?} ignored", element);
            return;
        }
        self.pressed.insert(
            element,
            PressState {
                down_since: at,
                long_press_fired: false,
            },
        );
        let modifier = self.modifier_down;
        self.emit(DeckEvent::Button(ButtonEvent {
            element,
            kind: ButtonKind::Press,
            modifier,
            at,
        }));
    }

    fn handle_release(&mut self, element: ElementAddress, at: Instant) {
        if self.pressed.remove(&element).is_none() {
            // Release without a tracked press, no-op
            debug!("Release without press for {:?} ignored", element);
            return;
        }
        let modifier = self.modifier_down;
        self.emit(DeckEvent::Button(ButtonEvent {
            element,
            kind: ButtonKind::Release,
            modifier,
            at,
        }));
    }

    fn emit(&mut self, event: DeckEvent) {
        self.last_event = Some(event);
        if self.sink.send(event).is_err() {
            debug!("Event consumer gone, dropping {:?}", event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LCD0_PRESS: u8 = 0x01;
    const MODIFIER_CODE: u8 = 0x25;

    fn record(code: u8, state: u8, at: Instant) -> RawEventRecord {
        RawEventRecord { code, state, at }
    }

    fn interpreter(
        long_press: Duration,
    ) -> (EventInterpreter, mpsc::UnboundedReceiver<DeckEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventInterpreter::new(long_press, tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<DeckEvent>) -> Vec<DeckEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn documented_press_release_sequence() {
        let (mut interp, mut rx) = interpreter(Duration::from_secs(2));
        let t0 = Instant::now();

        interp.handle_record(record(LCD0_PRESS, 0x01, t0));
        interp.handle_record(record(LCD0_PRESS, 0x00, t0 + Duration::from_millis(80)));

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        match events[0] {
            DeckEvent::Button(e) => {
                assert_eq!(e.element, ElementAddress::LcdButton(0));
                assert_eq!(e.kind, ButtonKind::Press);
                assert!(!e.modifier);
            }
            other => panic!("expected button event, got {other:?}"),
        }
        match events[1] {
            DeckEvent::Button(e) => {
                assert_eq!(e.element, ElementAddress::LcdButton(0));
                assert_eq!(e.kind, ButtonKind::Release);
            }
            other => panic!("expected button event, got {other:?}"),
        }
    }

    #[test]
    fn long_press_fires_exactly_once() {
        let threshold = Duration::from_millis(500);
        let (mut interp, mut rx) = interpreter(threshold);
        let t0 = Instant::now();

        interp.handle_record(record(LCD0_PRESS, 0x01, t0));
        drain(&mut rx);

        // Before the threshold: nothing
        interp.check_long_press_at(t0 + Duration::from_millis(499));
        assert!(drain(&mut rx).is_empty());

        // Past the threshold: exactly one long-press
        interp.check_long_press_at(t0 + threshold);
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            DeckEvent::Button(ButtonEvent {
                kind: ButtonKind::LongPress,
                ..
            })
        ));

        // Held much longer: still nothing more
        interp.check_long_press_at(t0 + Duration::from_secs(60));
        interp.check_long_press_at(t0 + Duration::from_secs(120));
        assert!(drain(&mut rx).is_empty());

        // Release still arrives after a long-press
        interp.handle_record(record(LCD0_PRESS, 0x00, t0 + Duration::from_secs(121)));
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            DeckEvent::Button(ButtonEvent {
                kind: ButtonKind::Release,
                ..
            })
        ));
    }

    #[test]
    fn modifier_marks_other_elements_while_held() {
        let (mut interp, mut rx) = interpreter(Duration::from_secs(2));
        let t0 = Instant::now();

        interp.handle_record(record(MODIFIER_CODE, 0x01, t0));
        interp.handle_record(record(LCD0_PRESS, 0x01, t0 + Duration::from_millis(10)));
        interp.handle_record(record(LCD0_PRESS, 0x00, t0 + Duration::from_millis(20)));
        interp.handle_record(record(MODIFIER_CODE, 0x00, t0 + Duration::from_millis(30)));
        interp.handle_record(record(0x02, 0x01, t0 + Duration::from_millis(40)));

        let events = drain(&mut rx);
        assert_eq!(events.len(), 5);

        // The modifier's own press reports the already-updated state
        assert!(matches!(
            events[0],
            DeckEvent::Button(ButtonEvent {
                element: MODIFIER_ELEMENT,
                kind: ButtonKind::Press,
                modifier: true,
                ..
            })
        ));
        assert!(matches!(
            events[1],
            DeckEvent::Button(ButtonEvent {
                kind: ButtonKind::Press,
                modifier: true,
                ..
            })
        ));
        assert!(matches!(
            events[2],
            DeckEvent::Button(ButtonEvent {
                kind: ButtonKind::Release,
                modifier: true,
                ..
            })
        ));
        assert!(matches!(
            events[3],
            DeckEvent::Button(ButtonEvent {
                element: MODIFIER_ELEMENT,
                kind: ButtonKind::Release,
                modifier: false,
                ..
            })
        ));
        // After modifier release, presses are unmodified again
        assert!(matches!(
            events[4],
            DeckEvent::Button(ButtonEvent {
                kind: ButtonKind::Press,
                modifier: false,
                ..
            })
        ));
    }

    #[test]
    fn modifier_is_read_fresh_not_cached_at_press_time() {
        let threshold = Duration::from_millis(500);
        let (mut interp, mut rx) = interpreter(threshold);
        let t0 = Instant::now();

        // Button goes down unmodified, then the modifier is pressed
        interp.handle_record(record(LCD0_PRESS, 0x01, t0));
        interp.handle_record(record(MODIFIER_CODE, 0x01, t0 + Duration::from_millis(100)));
        drain(&mut rx);

        // Long-press and release both see the current modifier state
        interp.check_long_press_at(t0 + threshold);
        interp.handle_record(record(LCD0_PRESS, 0x00, t0 + Duration::from_millis(700)));
        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            DeckEvent::Button(ButtonEvent {
                kind: ButtonKind::LongPress,
                modifier: true,
                ..
            })
        ));
        assert!(matches!(
            events[1],
            DeckEvent::Button(ButtonEvent {
                kind: ButtonKind::Release,
                modifier: true,
                ..
            })
        ));
    }

    #[test]
    fn rotation_ticks_are_stateless() {
        let (mut interp, mut rx) = interpreter(Duration::from_secs(2));
        let t0 = Instant::now();

        interp.handle_record(record(0x51, 0x00, t0));
        interp.handle_record(record(0x51, 0x00, t0 + Duration::from_millis(5)));
        interp.handle_record(record(0x90, 0x00, t0 + Duration::from_millis(10)));

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        assert!(matches!(
            events[0],
            DeckEvent::Encoder(EncoderEvent {
                element: ElementAddress::Encoder(0),
                rotation: Rotation::Clockwise,
                ..
            })
        ));
        assert!(matches!(
            events[2],
            DeckEvent::Encoder(EncoderEvent {
                element: ElementAddress::Encoder(2),
                rotation: Rotation::CounterClockwise,
                ..
            })
        ));

        // Rotation carries no press state; nothing is pending
        interp.check_long_press_at(t0 + Duration::from_secs(10));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn duplicate_press_and_stray_release_ignored() {
        let (mut interp, mut rx) = interpreter(Duration::from_secs(2));
        let t0 = Instant::now();

        // Stray release with no tracked press
        interp.handle_record(record(LCD0_PRESS, 0x00, t0));
        assert!(drain(&mut rx).is_empty());

        // Press, then a bounce duplicate
        interp.handle_record(record(LCD0_PRESS, 0x01, t0 + Duration::from_millis(10)));
        interp.handle_record(record(LCD0_PRESS, 0x01, t0 + Duration::from_millis(12)));
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn unknown_codes_are_dropped() {
        let (mut interp, mut rx) = interpreter(Duration::from_secs(2));
        for code in [0x00u8, 0x07, 0xFF] {
            interp.handle_record(record(code, 0x01, Instant::now()));
        }
        assert!(drain(&mut rx).is_empty());
        assert!(interp.last_event().is_none());
    }

    #[test]
    fn last_event_tracks_most_recent_emission() {
        let (mut interp, _rx) = interpreter(Duration::from_secs(2));
        let t0 = Instant::now();
        interp.handle_record(record(LCD0_PRESS, 0x01, t0));
        assert!(matches!(
            interp.last_event(),
            Some(DeckEvent::Button(ButtonEvent {
                kind: ButtonKind::Press,
                ..
            }))
        ));
    }

    #[test]
    fn encoder_center_presses_track_duration_like_buttons() {
        let threshold = Duration::from_millis(300);
        let (mut interp, mut rx) = interpreter(threshold);
        let t0 = Instant::now();

        interp.handle_record(record(0x33, 0x01, t0));
        interp.check_long_press_at(t0 + threshold);
        interp.handle_record(record(0x33, 0x00, t0 + Duration::from_millis(400)));

        let kinds: Vec<ButtonKind> = drain(&mut rx)
            .into_iter()
            .map(|e| match e {
                DeckEvent::Button(b) => b.kind,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(
            kinds,
            vec![ButtonKind::Press, ButtonKind::LongPress, ButtonKind::Release]
        );
    }
}
