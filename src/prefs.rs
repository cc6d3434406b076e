use crate::store::Storage;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

pub const DEFAULT_THEME: &str = "base16-ocean.dark";
pub const DEFAULT_ACCENT: &str = "#3b82f6";

/// Accent colors offered by the picker, in cycling order.
pub const ACCENT_PRESETS: [(&str, &str); 8] = [
    ("Blue", "#3b82f6"),
    ("Purple", "#8b5cf6"),
    ("Pink", "#ec4899"),
    ("Red", "#ef4444"),
    ("Orange", "#f97316"),
    ("Yellow", "#eab308"),
    ("Green", "#22c55e"),
    ("Teal", "#14b8a6"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FontFamily {
    #[default]
    SansSerif,
    Serif,
    Monospace,
}

impl FontFamily {
    pub const ALL: [FontFamily; 3] = [Self::SansSerif, Self::Serif, Self::Monospace];

    pub fn key(self) -> &'static str {
        match self {
            Self::SansSerif => "sans-serif",
            Self::Serif => "serif",
            Self::Monospace => "monospace",
        }
    }

    /// CSS `font-family` value used by the HTML export.
    pub fn css_stack(self) -> &'static str {
        match self {
            Self::SansSerif => {
                "-apple-system, BlinkMacSystemFont, \"Segoe UI\", Helvetica, Arial, sans-serif"
            }
            Self::Serif => "Georgia, \"Times New Roman\", serif",
            Self::Monospace => "\"JetBrains Mono\", Menlo, Consolas, monospace",
        }
    }

    pub fn next(self) -> Self {
        match self {
            Self::SansSerif => Self::Serif,
            Self::Serif => Self::Monospace,
            Self::Monospace => Self::SansSerif,
        }
    }
}

impl fmt::Display for FontFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for FontFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|font| font.key().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown font family: {s}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPreferences {
    pub theme: String,
    pub font: FontFamily,
    /// `#rrggbb`
    pub accent: String,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            theme: DEFAULT_THEME.to_string(),
            font: FontFamily::default(),
            accent: DEFAULT_ACCENT.to_string(),
        }
    }
}

impl UserPreferences {
    pub fn accent_rgb(&self) -> (u8, u8, u8) {
        parse_hex_color(&self.accent)
            .or_else(|| parse_hex_color(DEFAULT_ACCENT))
            .unwrap_or((0x3b, 0x82, 0xf6))
    }
}

/// Parses `#rgb` or `#rrggbb` (the `#` is optional).
pub fn parse_hex_color(input: &str) -> Option<(u8, u8, u8)> {
    let hex = input.trim().trim_start_matches('#');
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let expanded: String = match hex.len() {
        3 => hex.chars().flat_map(|c| [c, c]).collect(),
        6 => hex.to_string(),
        _ => return None,
    };
    let channel = |i: usize| u8::from_str_radix(&expanded[i..i + 2], 16).ok();
    Some((channel(0)?, channel(2)?, channel(4)?))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreferenceChange {
    Theme(String),
    Font(FontFamily),
    Accent(String),
}

type Listener = Box<dyn FnMut(&PreferenceChange)>;

/// Current preferences plus the listeners told about every change.
pub struct Preferences {
    current: UserPreferences,
    listeners: Vec<Listener>,
}

impl Preferences {
    pub fn new(current: UserPreferences) -> Self {
        Self {
            current,
            listeners: Vec::new(),
        }
    }

    /// Reads stored preferences and keeps them persisted on every change.
    pub fn load(storage: &Storage) -> Self {
        let mut prefs = Self::new(UserPreferences {
            theme: storage.load_theme(),
            font: storage.load_font(),
            accent: storage.load_accent_color(),
        });
        prefs.subscribe(persist_to(storage.clone()));
        prefs
    }

    pub fn current(&self) -> &UserPreferences {
        &self.current
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&PreferenceChange) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub fn set_theme(&mut self, name: &str) {
        if self.current.theme == name {
            return;
        }
        self.current.theme = name.to_string();
        self.notify(PreferenceChange::Theme(name.to_string()));
    }

    pub fn set_font(&mut self, font: FontFamily) {
        if self.current.font == font {
            return;
        }
        self.current.font = font;
        self.notify(PreferenceChange::Font(font));
    }

    /// Returns false (and changes nothing) for a malformed color.
    pub fn set_accent(&mut self, hex: &str) -> bool {
        let Some((r, g, b)) = parse_hex_color(hex) else {
            warn!(target: "prefs", color = hex, "invalid_accent_color");
            return false;
        };
        let normalized = format!("#{r:02x}{g:02x}{b:02x}");
        if self.current.accent != normalized {
            self.current.accent = normalized.clone();
            self.notify(PreferenceChange::Accent(normalized));
        }
        true
    }

    pub fn cycle_font(&mut self) -> FontFamily {
        let next = self.current.font.next();
        self.set_font(next);
        next
    }

    /// Moves to the preset after the current accent and returns its name.
    pub fn cycle_accent(&mut self) -> &'static str {
        let idx = ACCENT_PRESETS
            .iter()
            .position(|(_, hex)| hex.eq_ignore_ascii_case(&self.current.accent))
            .map(|i| (i + 1) % ACCENT_PRESETS.len())
            .unwrap_or(0);
        let (name, hex) = ACCENT_PRESETS[idx];
        self.set_accent(hex);
        name
    }

    fn notify(&mut self, change: PreferenceChange) {
        debug!(target: "prefs", ?change, "preference_changed");
        for listener in &mut self.listeners {
            listener(&change);
        }
    }
}

/// Listener writing each change through to the key-value store.
pub fn persist_to(storage: Storage) -> impl FnMut(&PreferenceChange) {
    move |change| {
        match change {
            PreferenceChange::Theme(name) => storage.save_theme(name),
            PreferenceChange::Font(font) => storage.save_font(*font),
            PreferenceChange::Accent(hex) => storage.save_accent_color(hex),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn hex_colors() {
        assert_eq!(parse_hex_color("#3b82f6"), Some((0x3b, 0x82, 0xf6)));
        assert_eq!(parse_hex_color("fff"), Some((255, 255, 255)));
        assert_eq!(parse_hex_color("#12345"), None);
        assert_eq!(parse_hex_color("#gg0000"), None);
    }

    #[test]
    fn font_family_parses_its_keys() {
        for font in FontFamily::ALL {
            assert_eq!(font.key().parse::<FontFamily>(), Ok(font));
        }
        assert!("comic-sans".parse::<FontFamily>().is_err());
    }

    #[test]
    fn listeners_see_every_change() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let mut prefs = Preferences::new(UserPreferences::default());
        prefs.subscribe(move |change| sink.borrow_mut().push(change.clone()));

        prefs.set_theme("InspiredGitHub");
        prefs.set_theme("InspiredGitHub");
        prefs.set_font(FontFamily::Serif);
        assert!(prefs.set_accent("#EC4899"));
        assert!(!prefs.set_accent("pink"));

        assert_eq!(
            *seen.borrow(),
            vec![
                PreferenceChange::Theme("InspiredGitHub".to_string()),
                PreferenceChange::Font(FontFamily::Serif),
                PreferenceChange::Accent("#ec4899".to_string()),
            ]
        );
    }

    #[test]
    fn accent_cycles_through_presets() {
        let mut prefs = Preferences::new(UserPreferences::default());
        assert_eq!(prefs.cycle_accent(), "Purple");
        assert_eq!(prefs.current().accent, "#8b5cf6");
        prefs.set_accent("#000000");
        assert_eq!(prefs.cycle_accent(), "Blue");
    }

    #[test]
    fn changes_are_persisted() {
        let storage = Storage::new(MemoryStore::default());
        let mut prefs = Preferences::load(&storage);
        assert_eq!(prefs.current(), &UserPreferences::default());

        prefs.set_theme("Solarized (dark)");
        prefs.cycle_font();
        prefs.set_accent("#22c55e");

        let reloaded = Preferences::load(&storage);
        assert_eq!(reloaded.current().theme, "Solarized (dark)");
        assert_eq!(reloaded.current().font, FontFamily::Serif);
        assert_eq!(reloaded.current().accent, "#22c55e");
    }
}
