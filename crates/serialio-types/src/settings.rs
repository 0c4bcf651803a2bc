//! Serial link framing and electrical parameters.
//!
//! Every textual setter on [`LinkSettings`] is permissive: a value outside the
//! fixed vocabulary leaves the field untouched instead of failing.  A device
//! with a misconfigured `parity` therefore keeps running with its previous
//! (usually default) parity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Default baud rate used when `baud_rate` is absent or unparseable.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
    Space,
    Mark,
}

impl Parity {
    /// Every variant, in vocabulary order.
    pub const ALL: [Parity; 5] = [
        Parity::None,
        Parity::Even,
        Parity::Odd,
        Parity::Space,
        Parity::Mark,
    ];

    /// Parse the case-sensitive configuration spelling.
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "None" => Some(Parity::None),
            "Even" => Some(Parity::Even),
            "Odd" => Some(Parity::Odd),
            "Space" => Some(Parity::Space),
            "Mark" => Some(Parity::Mark),
            _ => None,
        }
    }

    /// Canonical spelling, the inverse of [`Parity::parse`].
    pub fn as_str(self) -> &'static str {
        match self {
            Parity::None => "None",
            Parity::Even => "Even",
            Parity::Odd => "Odd",
            Parity::Space => "Space",
            Parity::Mark => "Mark",
        }
    }
}

/// Number of stop bits terminating each character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StopBits {
    None,
    #[default]
    One,
    Two,
    OnePointFive,
}

impl StopBits {
    pub const ALL: [StopBits; 4] = [
        StopBits::None,
        StopBits::One,
        StopBits::Two,
        StopBits::OnePointFive,
    ];

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "None" => Some(StopBits::None),
            "One" => Some(StopBits::One),
            "Two" => Some(StopBits::Two),
            "OnePointFive" => Some(StopBits::OnePointFive),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StopBits::None => "None",
            StopBits::One => "One",
            StopBits::Two => "Two",
            StopBits::OnePointFive => "OnePointFive",
        }
    }
}

/// Flow-control handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Handshake {
    #[default]
    None,
    XOnXOff,
    RequestToSend,
    RequestToSendXOnXOff,
}

impl Handshake {
    pub const ALL: [Handshake; 4] = [
        Handshake::None,
        Handshake::XOnXOff,
        Handshake::RequestToSend,
        Handshake::RequestToSendXOnXOff,
    ];

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "None" => Some(Handshake::None),
            "XOnXOff" => Some(Handshake::XOnXOff),
            "RequestToSend" => Some(Handshake::RequestToSend),
            "RequestToSendXOnXOff" => Some(Handshake::RequestToSendXOnXOff),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Handshake::None => "None",
            Handshake::XOnXOff => "XOnXOff",
            Handshake::RequestToSend => "RequestToSend",
            Handshake::RequestToSendXOnXOff => "RequestToSendXOnXOff",
        }
    }
}

/// Character size on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    #[default]
    Eight,
}

impl DataBits {
    /// Map a bit count onto the supported set; anything else is `None`.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            5 => Some(DataBits::Five),
            6 => Some(DataBits::Six),
            7 => Some(DataBits::Seven),
            8 => Some(DataBits::Eight),
            _ => None,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

macro_rules! impl_display_as_str {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

impl_display_as_str!(Parity, StopBits, Handshake);

impl fmt::Display for DataBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// LinkSettings
// ────────────────────────────────────────────────────────────────────────────

/// Configuration key names consumed per device, paired with their defaults.
pub mod keys {
    pub const DATA_BITS: (&str, &str) = ("data_bits", "8");
    pub const BAUD_RATE: (&str, &str) = ("baud_rate", "115200");
    pub const PARITY: (&str, &str) = ("parity", "None");
    pub const STOP_BITS: (&str, &str) = ("stop_bits", "One");
    pub const HANDSHAKE: (&str, &str) = ("handshake", "None");

    /// All keys in the order they are looked up.
    pub const ALL: [(&str, &str); 5] = [DATA_BITS, BAUD_RATE, PARITY, STOP_BITS, HANDSHAKE];
}

/// Electrical and framing parameters of one serial link.
///
/// Built once per router and never mutated after the device is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSettings {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub handshake: Handshake,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::default(),
            parity: Parity::default(),
            stop_bits: StopBits::default(),
            handshake: Handshake::default(),
        }
    }
}

impl LinkSettings {
    /// Build settings from a key lookup.
    ///
    /// `lookup(key, default)` must return the configured text for `key`, or
    /// `default` when the key is absent.  Values that do not parse are
    /// ignored field by field.
    pub fn from_lookup<F>(mut lookup: F) -> Self
    where
        F: FnMut(&str, &str) -> String,
    {
        let mut settings = Self::default();
        let (key, default) = keys::DATA_BITS;
        settings.set_data_bits(&lookup(key, default));
        let (key, default) = keys::BAUD_RATE;
        settings.set_baud_rate(&lookup(key, default));
        let (key, default) = keys::PARITY;
        settings.set_parity(&lookup(key, default));
        let (key, default) = keys::STOP_BITS;
        settings.set_stop_bits(&lookup(key, default));
        let (key, default) = keys::HANDSHAKE;
        settings.set_handshake(&lookup(key, default));
        settings
    }

    /// Set the baud rate from text.  Zero or non-numeric input is ignored.
    pub fn set_baud_rate(&mut self, text: &str) {
        if let Ok(rate) = text.trim().parse::<u32>()
            && rate > 0
        {
            self.baud_rate = rate;
        }
    }

    /// Set the data bits from text.  Counts outside 5..=8 are ignored.
    pub fn set_data_bits(&mut self, text: &str) {
        if let Some(bits) = text.trim().parse::<u8>().ok().and_then(DataBits::from_bits) {
            self.data_bits = bits;
        }
    }

    pub fn set_parity(&mut self, text: &str) {
        if let Some(parity) = Parity::parse(text) {
            self.parity = parity;
        }
    }

    pub fn set_stop_bits(&mut self, text: &str) {
        if let Some(stop_bits) = StopBits::parse(text) {
            self.stop_bits = stop_bits;
        }
    }

    pub fn set_handshake(&mut self, text: &str) {
        if let Some(handshake) = Handshake::parse(text) {
            self.handshake = handshake;
        }
    }
}

impl fmt::Display for LinkSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "baud rate: {}, data bits: {}, parity: {}, stop bits: {}, handshake: {}",
            self.baud_rate, self.data_bits, self.parity, self.stop_bits, self.handshake
        )
    }
}
