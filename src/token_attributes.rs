//! The 32 bits token metadata word.
//!
//! Bit layout, from least to most significant:
//!
//! ```text
//!  3322 2222 2222 1111 1111 1100 0000 0000
//!  1098 7654 3210 9876 5432 1098 7654 3210
//! -----------------------------------------
//!  bbbb bbbb ffff ffff fFFF FBTT LLLL LLLL
//! -----------------------------------------
//!  L = language id (8 bits)
//!  T = standard token type (2 bits)
//!  B = balanced bracket (1 bit)
//!  F = font style (4 bits)
//!  f = foreground color id (9 bits)
//!  b = background color id (8 bits)
//! ```
use std::fmt;

use crate::themes::FontStyle;

const LANGUAGE_ID_MASK: u32 = 0x0000_00FF;
const TOKEN_TYPE_MASK: u32 = 0x0000_0300;
const BALANCED_BRACKETS_MASK: u32 = 0x0000_0400;
const FONT_STYLE_MASK: u32 = 0x0000_7800;
const FOREGROUND_MASK: u32 = 0x00FF_8000;
const BACKGROUND_MASK: u32 = 0xFF00_0000;

const LANGUAGE_ID_OFFSET: u32 = 0;
const TOKEN_TYPE_OFFSET: u32 = 8;
const BALANCED_BRACKETS_OFFSET: u32 = 10;
const FONT_STYLE_OFFSET: u32 = 11;
const FOREGROUND_OFFSET: u32 = 15;
const BACKGROUND_OFFSET: u32 = 24;

/// The coarse token classification editors use for things like bracket matching
/// or auto closing pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StandardTokenType {
    Other = 0,
    Comment = 1,
    String = 2,
    RegEx = 3,
}

impl StandardTokenType {
    fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            1 => StandardTokenType::Comment,
            2 => StandardTokenType::String,
            3 => StandardTokenType::RegEx,
            _ => StandardTokenType::Other,
        }
    }
}

/// Packed token metadata. Use [`EncodedTokenAttributes::set`] to merge new values in.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EncodedTokenAttributes(pub u32);

impl EncodedTokenAttributes {
    pub fn language_id(self) -> u8 {
        ((self.0 & LANGUAGE_ID_MASK) >> LANGUAGE_ID_OFFSET) as u8
    }

    pub fn token_type(self) -> StandardTokenType {
        StandardTokenType::from_bits((self.0 & TOKEN_TYPE_MASK) >> TOKEN_TYPE_OFFSET)
    }

    pub fn contains_balanced_brackets(self) -> bool {
        self.0 & BALANCED_BRACKETS_MASK != 0
    }

    pub fn font_style(self) -> FontStyle {
        FontStyle::from_bits(((self.0 & FONT_STYLE_MASK) >> FONT_STYLE_OFFSET) as u8)
    }

    pub fn foreground(self) -> u16 {
        ((self.0 & FOREGROUND_MASK) >> FOREGROUND_OFFSET) as u16
    }

    pub fn background(self) -> u16 {
        ((self.0 & BACKGROUND_MASK) >> BACKGROUND_OFFSET) as u16
    }

    /// Overwrites only the fields that are set: a non-zero language id, a token type,
    /// a balanced bracket flag, a font style and non-zero color ids.
    /// Everything else keeps the bits of `self`.
    #[allow(clippy::too_many_arguments)]
    pub fn set(
        self,
        language_id: u8,
        token_type: Option<StandardTokenType>,
        balanced_bracket: Option<bool>,
        font_style: Option<FontStyle>,
        foreground: u16,
        background: u16,
    ) -> Self {
        let language_id = if language_id == 0 {
            self.language_id()
        } else {
            language_id
        };
        let token_type = token_type.unwrap_or_else(|| self.token_type());
        let balanced_bracket = balanced_bracket.unwrap_or_else(|| self.contains_balanced_brackets());
        let font_style = font_style.unwrap_or_else(|| self.font_style());
        let foreground = if foreground == 0 {
            self.foreground()
        } else {
            foreground
        };
        let background = if background == 0 {
            self.background()
        } else {
            background
        };

        Self(
            ((language_id as u32) << LANGUAGE_ID_OFFSET)
                | ((token_type as u32) << TOKEN_TYPE_OFFSET)
                | ((balanced_bracket as u32) << BALANCED_BRACKETS_OFFSET)
                | ((font_style.bits() as u32) << FONT_STYLE_OFFSET)
                | (((foreground as u32) << FOREGROUND_OFFSET) & FOREGROUND_MASK)
                | (((background as u32) << BACKGROUND_OFFSET) & BACKGROUND_MASK),
        )
    }

    /// The 32 bits, most significant first.
    pub fn to_binary_str(self) -> String {
        format!("{:032b}", self.0)
    }
}

impl fmt::Debug for EncodedTokenAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedTokenAttributes")
            .field("language_id", &self.language_id())
            .field("token_type", &self.token_type())
            .field("balanced_bracket", &self.contains_balanced_brackets())
            .field("font_style", &self.font_style().bits())
            .field("foreground", &self.foreground())
            .field("background", &self.background())
            .finish()
    }
}

impl From<EncodedTokenAttributes> for u32 {
    fn from(value: EncodedTokenAttributes) -> Self {
        value.0
    }
}
