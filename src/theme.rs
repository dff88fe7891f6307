// Light/dark theme preference

use crate::storage::Storage;
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Storage slot holding `"light"` or `"dark"`
pub const THEME_KEY: &str = "theme";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

/// Colours used to render one theme, as `#rrggbb` strings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub background: &'static str,
    pub background_image: &'static str,
    pub check_circle: &'static str,
    pub item_background: &'static str,
    pub item_text: &'static str,
    pub placeholder_text: &'static str,
    pub footer_text: &'static str,
}

const LIGHT: Palette = Palette {
    background: "#FAFAFA",
    background_image: "bg-mobile-light.jpg",
    check_circle: "#E3E4F1",
    item_background: "#FFFFFF",
    item_text: "#494C6B",
    placeholder_text: "#9495A5",
    footer_text: "#9495A5",
};

const DARK: Palette = Palette {
    background: "#000000",
    background_image: "bg-mobile-dark.jpg",
    check_circle: "#393A4B",
    item_background: "#25273D",
    item_text: "#C8CBE7",
    placeholder_text: "#767992",
    footer_text: "#5B5E7E",
};

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }

    pub fn palette(self) -> &'static Palette {
        match self {
            Theme::Light => &LIGHT,
            Theme::Dark => &DARK,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }
}

impl std::fmt::Display for Theme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            other => Err(format!("unknown theme: {} (expected light or dark)", other)),
        }
    }
}

/// Parse `#rrggbb` into its components
pub fn hex_to_rgb(hex: &str) -> Option<(u8, u8, u8)> {
    let digits = hex.strip_prefix('#')?;
    if digits.len() != 6 {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(digits.get(i..i + 2)?, 16).ok();
    Some((channel(0)?, channel(2)?, channel(4)?))
}

/// The persisted theme choice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThemePreference {
    theme: Theme,
}

impl ThemePreference {
    /// Read the stored theme, using `default` when absent or unrecognised
    pub fn load<S: Storage + ?Sized>(storage: &S, default: Theme) -> Result<Self> {
        let theme = match storage.get(THEME_KEY)? {
            None => default,
            Some(raw) => raw.parse::<Theme>().unwrap_or_else(|e| {
                warn!(key = THEME_KEY, error = %e, "Ignoring malformed persisted theme");
                default
            }),
        };
        debug!(%theme, "Loaded theme preference");
        Ok(Self { theme })
    }

    pub fn theme(&self) -> Theme {
        self.theme
    }

    /// Switch to `theme` and persist it
    pub fn set<S: Storage + ?Sized>(&mut self, storage: &mut S, theme: Theme) -> Result<()> {
        self.theme = theme;
        storage
            .set(THEME_KEY, theme.as_str())
            .context("Failed to persist theme")
    }

    /// Flip between light and dark, persisting the result
    pub fn toggle<S: Storage + ?Sized>(&mut self, storage: &mut S) -> Result<Theme> {
        let next = self.theme.toggled();
        self.set(storage, next)?;
        Ok(next)
    }
}
