//! Controller input handling
//!
//! Standard pad on $4016/$4017: a write with bit 0 set latches the buttons
//! and resets the read index, then each read shifts out one button.

/// Button bit positions in the button vector
pub const BUTTON_A: u8 = 0;
pub const BUTTON_B: u8 = 1;
pub const BUTTON_SELECT: u8 = 2;
pub const BUTTON_START: u8 = 3;
pub const BUTTON_UP: u8 = 4;
pub const BUTTON_DOWN: u8 = 5;
pub const BUTTON_LEFT: u8 = 6;
pub const BUTTON_RIGHT: u8 = 7;

/// Number of buttons on a standard pad
pub const BUTTON_COUNT: usize = 8;

/// Standard NES controller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Controller {
    /// Bit n set when button n is held
    buttons: u8,
    index: u8,
    strobe: u8,
}

impl Controller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole button vector
    pub fn set_buttons(&mut self, buttons: u8) {
        self.buttons = buttons;
    }

    /// Replace the button vector from per-button states in A, B, Select,
    /// Start, Up, Down, Left, Right order
    pub fn set_button_states(&mut self, states: [bool; BUTTON_COUNT]) {
        self.buttons = pack_buttons(states);
    }

    pub fn buttons(&self) -> u8 {
        self.buttons
    }

    pub fn button_down(&mut self, button: u8) {
        if (button as usize) < BUTTON_COUNT {
            self.buttons |= 1 << button;
        }
    }

    pub fn button_up(&mut self, button: u8) {
        if (button as usize) < BUTTON_COUNT {
            self.buttons &= !(1 << button);
        }
    }

    /// Shift out the next button. Reads past the eighth return 1.
    pub fn read(&mut self) -> u8 {
        let value = if (self.index as usize) < BUTTON_COUNT {
            (self.buttons >> self.index) & 1
        } else {
            1
        };
        if self.strobe & 1 == 1 {
            self.index = 0;
        } else if (self.index as usize) < BUTTON_COUNT {
            self.index += 1;
        }
        value
    }

    /// Strobe write; bit 0 held high keeps the index at button A
    pub fn write(&mut self, value: u8) {
        self.strobe = value;
        if self.strobe & 1 == 1 {
            self.index = 0;
        }
    }
}

/// Pack per-button states into a button vector
pub fn pack_buttons(states: [bool; BUTTON_COUNT]) -> u8 {
    states
        .iter()
        .enumerate()
        .fold(0, |acc, (bit, &down)| if down { acc | (1 << bit) } else { acc })
}
