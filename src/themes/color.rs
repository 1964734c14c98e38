use std::collections::HashMap;

use crate::error::{Error, TintaResult};

/// `#rgb`, `#rgba`, `#rrggbb` or `#rrggbbaa`
pub fn is_valid_hex_color(hex: &str) -> bool {
    let Some(digits) = hex.strip_prefix('#') else {
        return false;
    };
    matches!(digits.len(), 3 | 4 | 6 | 8) && digits.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Assigns a small id to every color used by a theme, which is what token metadata stores.
///
/// Id 0 means "no color". Colors are stored upper-cased so `#fff` and `#FFF` share an id.
/// A color map built from a fixed palette is frozen: asking it for a color missing from the
/// palette is an error instead of allocating a new id. The palette colors get the ids 1 to
/// `palette.len()` in order.
#[derive(Debug, Clone, Default)]
pub struct ColorMap {
    is_frozen: bool,
    last_color_id: u16,
    id_to_color: Vec<String>,
    color_to_id: HashMap<String, u16>,
}

impl ColorMap {
    pub fn new(palette: Option<Vec<String>>) -> Self {
        let mut color_map = Self {
            id_to_color: vec![String::new()],
            ..Default::default()
        };

        if let Some(palette) = palette {
            color_map.is_frozen = true;
            for color in palette {
                let color = color.to_uppercase();
                color_map.last_color_id += 1;
                color_map
                    .color_to_id
                    .insert(color.clone(), color_map.last_color_id);
                color_map.id_to_color.push(color);
            }
        }

        color_map
    }

    /// The id of `color`, allocating one unless frozen. `None` is always id 0.
    pub fn get_id(&mut self, color: Option<&str>) -> TintaResult<u16> {
        let Some(color) = color else {
            return Ok(0);
        };
        self.get_or_insert(color)
            .ok_or_else(|| Error::MissingColor(color.to_uppercase()))
    }

    /// `None` if the color is missing from a frozen palette
    pub(crate) fn get_or_insert(&mut self, color: &str) -> Option<u16> {
        let color = color.to_uppercase();
        if let Some(id) = self.color_to_id.get(&color) {
            return Some(*id);
        }
        if self.is_frozen {
            return None;
        }
        self.last_color_id += 1;
        self.color_to_id.insert(color.clone(), self.last_color_id);
        self.id_to_color.push(color);
        Some(self.last_color_id)
    }

    /// Every color indexed by its id, starting with an empty string for id 0
    pub fn colors(&self) -> &[String] {
        &self.id_to_color
    }

    pub fn color(&self, id: u16) -> Option<&str> {
        match id {
            0 => None,
            _ => self.id_to_color.get(id as usize).map(String::as_str),
        }
    }
}
