//! Cell styling: colors and attribute flags.

use std::sync::Arc;

use bitflags::bitflags;

/// Color of a cell foreground or background.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Color {
    /// Terminal default (scheme-dependent)
    #[default]
    Default,
    /// Palette index 0..=255
    Palette(u8),
    /// 24-bit color
    Rgb(u8, u8, u8),
}

impl Color {
    /// Convert to crossterm color for hosts that render with crossterm
    pub fn to_crossterm(&self) -> crossterm::style::Color {
        match self {
            Color::Default => crossterm::style::Color::Reset,
            Color::Palette(n) => crossterm::style::Color::AnsiValue(*n),
            Color::Rgb(r, g, b) => crossterm::style::Color::Rgb {
                r: *r,
                g: *g,
                b: *b,
            },
        }
    }
}

bitflags! {
    /// Graphic rendition attribute flags
    #[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
    pub struct StyleFlags: u16 {
        const BOLD          = 0b0000_0000_0001;
        const DIM           = 0b0000_0000_0010;
        const ITALIC        = 0b0000_0000_0100;
        const UNDERLINE     = 0b0000_0000_1000;
        const BLINK         = 0b0000_0001_0000;
        const INVERSE       = 0b0000_0010_0000;
        const HIDDEN        = 0b0000_0100_0000;
        const STRIKETHROUGH = 0b0000_1000_0000;
    }
}

/// Current graphic rendition: the style applied to newly written cells.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct TextStyle {
    pub fg: Color,
    pub bg: Color,
    pub flags: StyleFlags,
    /// Hyperlink target set by OSC 8, shared across the cells it spans
    pub link: Option<Arc<str>>,
}

impl TextStyle {
    /// SGR 0: reset colors and flags. The hyperlink survives; only OSC 8
    /// terminates it.
    pub fn reset(&mut self) {
        let link = self.link.take();
        *self = Self::default();
        self.link = link;
    }

    pub fn is_default(&self) -> bool {
        self.fg == Color::Default
            && self.bg == Color::Default
            && self.flags.is_empty()
            && self.link.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_keeps_hyperlink() {
        let mut style = TextStyle {
            fg: Color::Palette(1),
            flags: StyleFlags::BOLD,
            link: Some(Arc::from("https://example.com")),
            ..Default::default()
        };
        style.reset();
        assert_eq!(style.fg, Color::Default);
        assert!(style.flags.is_empty());
        assert!(style.link.is_some());
    }

    #[test]
    fn test_default_is_default() {
        assert!(TextStyle::default().is_default());
        let styled = TextStyle {
            bg: Color::Rgb(1, 2, 3),
            ..Default::default()
        };
        assert!(!styled.is_default());
    }
}
