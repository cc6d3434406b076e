use crate::config::Config;
use crate::prefs::UserPreferences;
use crate::render::preview::PreviewStyles;
use anyhow::{Context, Result};
use ratatui::style::{Color, Modifier, Style};
use syntect::highlighting::{FontStyle, Theme, ThemeSet};
use tracing::debug;

pub struct ThemeManager {
    theme_set: ThemeSet,
    theme_names: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct UiPalette {
    pub base_fg: Color,
    pub base_bg: Option<Color>,
    pub accent: Color,
    pub muted: Color,
    pub code_bg: Option<Color>,
    pub border: Color,
}

impl ThemeManager {
    /// Bundled syntect themes plus any `.tmTheme` files in the configured
    /// theme directory.
    pub fn load(config: &Config) -> Result<Self> {
        let mut theme_set = ThemeSet::load_defaults();

        if let Some(dir) = &config.theme_dir {
            if dir.exists() {
                let extra = ThemeSet::load_from_folder(dir)
                    .with_context(|| format!("Failed to load themes from {}", dir.display()))?;
                debug!(target: "theme", dir = %dir.display(), count = extra.themes.len(), "extra_themes_loaded");
                theme_set.themes.extend(extra.themes);
            }
        }

        Ok(Self::from_set(theme_set))
    }

    pub fn from_set(theme_set: ThemeSet) -> Self {
        let mut theme_names: Vec<String> = theme_set.themes.keys().cloned().collect();
        theme_names.sort();
        Self {
            theme_set,
            theme_names,
        }
    }

    pub fn theme_names(&self) -> &[String] {
        &self.theme_names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.theme_set.themes.contains_key(name)
    }

    /// The named theme, or the fallback when it is unknown.
    pub fn get(&self, name: &str) -> Option<&Theme> {
        self.theme_set
            .themes
            .get(name)
            .or_else(|| self.theme_set.themes.get(self.fallback_name()))
            .or_else(|| self.theme_set.themes.values().next())
    }

    /// Palette for the preferred theme with the preferred accent on top.
    pub fn ui_palette(&self, prefs: &UserPreferences) -> UiPalette {
        let (r, g, b) = prefs.accent_rgb();
        let palette = self
            .get(&prefs.theme)
            .map(palette_from_theme)
            .unwrap_or_else(default_palette);
        UiPalette {
            accent: Color::Rgb(r, g, b),
            ..palette
        }
    }

    pub fn fallback_name(&self) -> &str {
        if self.theme_set.themes.contains_key(crate::prefs::DEFAULT_THEME) {
            return crate::prefs::DEFAULT_THEME;
        }
        self.theme_names
            .first()
            .map(|s| s.as_str())
            .unwrap_or(crate::prefs::DEFAULT_THEME)
    }
}

impl UiPalette {
    pub fn base_style(&self) -> Style {
        Style::default()
            .fg(self.base_fg)
            .bg(self.base_bg.unwrap_or(Color::Reset))
    }

    pub fn preview_styles(&self) -> PreviewStyles {
        let base = self.base_style();
        let code_bg = self.code_bg.or_else(|| shade(self.base_bg, -0.08)).or(self.base_bg);
        let accent_bold = Style::default()
            .fg(self.accent)
            .add_modifier(Modifier::BOLD);
        let muted = Style::default().fg(self.muted);
        PreviewStyles {
            base,
            heading: [
                accent_bold.add_modifier(Modifier::UNDERLINED),
                accent_bold,
                accent_bold,
                Style::default().fg(self.base_fg).add_modifier(Modifier::BOLD),
                Style::default().fg(self.base_fg).add_modifier(Modifier::BOLD),
                muted.add_modifier(Modifier::BOLD),
            ],
            link: self.accent,
            inline_code: Style::default()
                .fg(self.accent)
                .bg(code_bg.unwrap_or(Color::Reset)),
            marker: muted,
            rule: muted,
            html: muted.add_modifier(Modifier::ITALIC),
            code_bg,
            code_border: Style::default().fg(self.border),
            code_label: Style::default().fg(self.accent),
            table_border: Style::default().fg(self.border),
            table_header: base.add_modifier(Modifier::BOLD),
        }
    }
}

fn default_palette() -> UiPalette {
    UiPalette {
        base_fg: Color::Gray,
        base_bg: None,
        accent: Color::Cyan,
        muted: Color::DarkGray,
        code_bg: None,
        border: Color::DarkGray,
    }
}

fn palette_from_theme(theme: &Theme) -> UiPalette {
    let settings = &theme.settings;
    let base_fg = settings
        .foreground
        .map(to_ratatui)
        .unwrap_or(Color::Gray);
    let base_bg = settings.background.map(to_ratatui);
    let accent = settings
        .caret
        .or(settings.foreground)
        .map(to_ratatui)
        .unwrap_or(Color::Cyan);
    let muted = settings
        .gutter_foreground
        .or(settings.foreground)
        .map(to_ratatui)
        .unwrap_or(Color::DarkGray);
    let code_bg = settings
        .line_highlight
        .or(settings.background)
        .map(to_ratatui);

    UiPalette {
        base_fg,
        base_bg,
        accent,
        muted,
        code_bg,
        border: muted,
    }
}

fn to_ratatui(color: syntect::highlighting::Color) -> Color {
    Color::Rgb(color.r, color.g, color.b)
}

/// Converts a syntect highlight style; `bg` overrides the theme background.
pub fn highlight_style(style: syntect::highlighting::Style, bg: Option<Color>) -> Style {
    let mut out = Style::default().fg(to_ratatui(style.foreground));
    if let Some(bg) = bg {
        out = out.bg(bg);
    } else if style.background.a > 0 {
        out = out.bg(to_ratatui(style.background));
    }
    if style.font_style.contains(FontStyle::BOLD) {
        out = out.add_modifier(Modifier::BOLD);
    }
    if style.font_style.contains(FontStyle::ITALIC) {
        out = out.add_modifier(Modifier::ITALIC);
    }
    if style.font_style.contains(FontStyle::UNDERLINE) {
        out = out.add_modifier(Modifier::UNDERLINED);
    }
    out
}

fn shade(color: Option<Color>, delta: f32) -> Option<Color> {
    match color {
        Some(Color::Rgb(r, g, b)) => Some(Color::Rgb(
            shade_channel(r, delta),
            shade_channel(g, delta),
            shade_channel(b, delta),
        )),
        _ => None,
    }
}

fn shade_channel(value: u8, delta: f32) -> u8 {
    let v = value as f32 / 255.0;
    ((v + delta).clamp(0.0, 1.0) * 255.0).round() as u8
}
