//! Event-code to element lookup table
//!
//! The mapping is a static table audited against USB captures, never
//! inferred logic. Input mapping:
//!   - 0x01-0x06: LCD buttons 0-5 (press/release via state code)
//!   - 0x25, 0x30, 0x31: plain buttons 0-2 (0x25 is the modifier)
//!   - 0x50/0x51, 0x70/0x71, 0x90/0x91: encoders 0-2 rotate CCW/CW
//!   - 0x33, 0x35, 0x36: encoder center presses 0-2

/// Number of LCD buttons
pub const LCD_BUTTON_COUNT: u8 = 6;

/// Number of plain (non-display) buttons
pub const PLAIN_BUTTON_COUNT: u8 = 3;

/// Number of rotary encoders
pub const ENCODER_COUNT: u8 = 3;

/// Identity of a physical element on the deck
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementAddress {
    /// LCD button, index 0-5
    LcdButton(u8),
    /// Plain button, index 0-2
    PlainButton(u8),
    /// Rotary encoder, index 0-2
    Encoder(u8),
}

/// The plain button whose held state activates the alternate action layer
pub const MODIFIER_ELEMENT: ElementAddress = ElementAddress::PlainButton(0);

/// Direction of one encoder rotation tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Clockwise,
    CounterClockwise,
}

/// What a raw event code means
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeClass {
    /// Press/release element; the state code distinguishes the two
    Switch(ElementAddress),
    /// One discrete rotation tick; carries no state
    Rotate(ElementAddress, Rotation),
}

/// Classify a raw event code. `None` means an unmapped hardware event,
/// which callers log and discard - it is never an error.
pub fn classify(code: u8) -> Option<CodeClass> {
    use CodeClass::*;
    use ElementAddress::*;
    use Rotation::*;

    match code {
        0x01..=0x06 => Some(Switch(LcdButton(code - 1))),

        0x25 => Some(Switch(PlainButton(0))),
        0x30 => Some(Switch(PlainButton(1))),
        0x31 => Some(Switch(PlainButton(2))),

        0x33 => Some(Switch(Encoder(0))),
        0x35 => Some(Switch(Encoder(1))),
        0x36 => Some(Switch(Encoder(2))),

        0x50 => Some(Rotate(Encoder(0), CounterClockwise)),
        0x51 => Some(Rotate(Encoder(0), Clockwise)),
        0x70 => Some(Rotate(Encoder(1), CounterClockwise)),
        0x71 => Some(Rotate(Encoder(1), Clockwise)),
        0x90 => Some(Rotate(Encoder(2), CounterClockwise)),
        0x91 => Some(Rotate(Encoder(2), Clockwise)),

        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lcd_buttons_are_contiguous_from_one() {
        for code in 0x01..=0x06u8 {
            assert_eq!(
                classify(code),
                Some(CodeClass::Switch(ElementAddress::LcdButton(code - 1)))
            );
        }
    }

    #[test]
    fn plain_buttons_and_modifier() {
        assert_eq!(
            classify(0x25),
            Some(CodeClass::Switch(ElementAddress::PlainButton(0)))
        );
        assert_eq!(
            classify(0x30),
            Some(CodeClass::Switch(ElementAddress::PlainButton(1)))
        );
        assert_eq!(
            classify(0x31),
            Some(CodeClass::Switch(ElementAddress::PlainButton(2)))
        );
        assert_eq!(classify(0x25), Some(CodeClass::Switch(MODIFIER_ELEMENT)));
    }

    #[test]
    fn encoder_rotation_pairs() {
        let pairs = [(0x50u8, 0u8), (0x70, 1), (0x90, 2)];
        for (base, encoder) in pairs {
            assert_eq!(
                classify(base),
                Some(CodeClass::Rotate(
                    ElementAddress::Encoder(encoder),
                    Rotation::CounterClockwise
                ))
            );
            assert_eq!(
                classify(base + 1),
                Some(CodeClass::Rotate(
                    ElementAddress::Encoder(encoder),
                    Rotation::Clockwise
                ))
            );
        }
    }

    #[test]
    fn encoder_centers() {
        assert_eq!(
            classify(0x33),
            Some(CodeClass::Switch(ElementAddress::Encoder(0)))
        );
        assert_eq!(
            classify(0x35),
            Some(CodeClass::Switch(ElementAddress::Encoder(1)))
        );
        assert_eq!(
            classify(0x36),
            Some(CodeClass::Switch(ElementAddress::Encoder(2)))
        );
    }

    #[test]
    fn unmapped_codes_yield_none() {
        for code in [0x00u8, 0x07, 0x24, 0x32, 0x34, 0x37, 0x52, 0x92, 0xFF] {
            assert_eq!(classify(code), None, "code 0x{code:02x}");
        }
    }
}
