mod color;
mod compiled;
mod font_style;
mod raw;
mod selector;
mod trie;

pub use color::{ColorMap, is_valid_hex_color};
pub use compiled::{StyleAttributes, Theme, ThemeProvider};
pub use font_style::FontStyle;
pub use raw::{RawScope, RawTheme, RawThemeColors, RawThemeSetting, RawThemeSettings};
pub use selector::{ParsedThemeRule, parse_theme};
pub use trie::{ThemeTrieElement, ThemeTrieElementRule};
