mod interpreter;

pub use interpreter::{ButtonEvent, ButtonKind, DeckEvent, EncoderEvent, EventInterpreter};
