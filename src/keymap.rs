use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeymapError {
    #[error("empty key chord")]
    EmptyChord,
    #[error("unknown key `{key}` in chord `{chord}`")]
    UnknownKey { chord: String, key: String },
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
}

/// Everything a chord can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Undo,
    Redo,
    Bold,
    Italic,
    Link,
    InlineCode,
    CodeBlock,
    Strikethrough,
    Heading1,
    Heading2,
    Heading3,
    BulletList,
    NumberedList,
    TaskList,
    Quote,
    ToggleFind,
    SelectAll,
    Save,
    Quit,
    CycleView,
    Templates,
    Assist,
    Emoji,
    Table,
    Image,
    CopyAll,
    ExportReadme,
    ExportHtml,
    Themes,
    CycleAccent,
    CycleFont,
    Open,
    Help,
}

const COMMAND_NAMES: &[(&str, Command)] = &[
    ("undo", Command::Undo),
    ("redo", Command::Redo),
    ("bold", Command::Bold),
    ("italic", Command::Italic),
    ("link", Command::Link),
    ("inline-code", Command::InlineCode),
    ("code-block", Command::CodeBlock),
    ("strikethrough", Command::Strikethrough),
    ("heading-1", Command::Heading1),
    ("heading-2", Command::Heading2),
    ("heading-3", Command::Heading3),
    ("bullet-list", Command::BulletList),
    ("numbered-list", Command::NumberedList),
    ("task-list", Command::TaskList),
    ("quote", Command::Quote),
    ("toggle-find", Command::ToggleFind),
    ("select-all", Command::SelectAll),
    ("save", Command::Save),
    ("quit", Command::Quit),
    ("cycle-view", Command::CycleView),
    ("templates", Command::Templates),
    ("assist", Command::Assist),
    ("emoji", Command::Emoji),
    ("table", Command::Table),
    ("image", Command::Image),
    ("copy-all", Command::CopyAll),
    ("export-readme", Command::ExportReadme),
    ("export-html", Command::ExportHtml),
    ("themes", Command::Themes),
    ("cycle-accent", Command::CycleAccent),
    ("cycle-font", Command::CycleFont),
    ("open", Command::Open),
    ("help", Command::Help),
];

impl Command {
    pub fn all() -> impl Iterator<Item = Command> {
        COMMAND_NAMES.iter().map(|(_, cmd)| *cmd)
    }

    pub fn name(self) -> &'static str {
        COMMAND_NAMES
            .iter()
            .find(|(_, cmd)| *cmd == self)
            .map(|(name, _)| *name)
            .unwrap_or("unknown")
    }

    /// `(before, after, default text)` for commands that wrap the selection.
    pub fn wrap_markers(self) -> Option<(&'static str, &'static str, &'static str)> {
        match self {
            Command::Bold => Some(("**", "**", "bold text")),
            Command::Italic => Some(("*", "*", "italic text")),
            Command::Link => Some(("[", "](url)", "link text")),
            Command::InlineCode => Some(("`", "`", "code")),
            Command::CodeBlock => Some(("\n```\n", "\n```\n", "")),
            Command::Strikethrough => Some(("~~", "~~", "text")),
            _ => None,
        }
    }

    /// Prefix inserted at the start of the caret line for block commands.
    pub fn line_prefix(self) -> Option<&'static str> {
        match self {
            Command::Heading1 => Some("# "),
            Command::Heading2 => Some("## "),
            Command::Heading3 => Some("### "),
            Command::BulletList => Some("- "),
            Command::NumberedList => Some("1. "),
            Command::TaskList => Some("- [ ] "),
            Command::Quote => Some("> "),
            _ => None,
        }
    }
}

impl FromStr for Command {
    type Err = KeymapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        COMMAND_NAMES
            .iter()
            .find(|(name, _)| *name == wanted)
            .map(|(_, cmd)| *cmd)
            .ok_or_else(|| KeymapError::UnknownCommand(s.to_string()))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A modifier set plus one key. Letters are stored lowercase with SHIFT made
/// explicit, so `Ctrl+Z` reported as `Z` and as `shift+z` compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Chord {
    modifiers: KeyModifiers,
    code: KeyCode,
}

impl Chord {
    pub fn new(modifiers: KeyModifiers, code: KeyCode) -> Self {
        let mut modifiers =
            modifiers & (KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SHIFT);
        let code = match code {
            KeyCode::Char(c) if c.is_ascii_uppercase() => {
                modifiers |= KeyModifiers::SHIFT;
                KeyCode::Char(c.to_ascii_lowercase())
            }
            other => other,
        };
        Self { modifiers, code }
    }

    pub fn from_event(event: &KeyEvent) -> Self {
        Self::new(event.modifiers, event.code)
    }
}

impl FromStr for Chord {
    type Err = KeymapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s
            .split('+')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        let Some((key, mods)) = parts.split_last() else {
            return Err(KeymapError::EmptyChord);
        };
        let mut modifiers = KeyModifiers::NONE;
        for m in mods {
            modifiers |= match m.to_ascii_lowercase().as_str() {
                "ctrl" | "control" | "mod" | "cmd" => KeyModifiers::CONTROL,
                "shift" => KeyModifiers::SHIFT,
                "alt" | "option" | "meta" => KeyModifiers::ALT,
                _ => {
                    return Err(KeymapError::UnknownKey {
                        chord: s.to_string(),
                        key: m.to_string(),
                    })
                }
            };
        }
        let code = parse_key(key).ok_or_else(|| KeymapError::UnknownKey {
            chord: s.to_string(),
            key: key.to_string(),
        })?;
        Ok(Chord::new(modifiers, code))
    }
}

impl fmt::Display for Chord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (flag, name) in [
            (KeyModifiers::CONTROL, "Ctrl+"),
            (KeyModifiers::ALT, "Alt+"),
            (KeyModifiers::SHIFT, "Shift+"),
        ] {
            if self.modifiers.contains(flag) {
                f.write_str(name)?;
            }
        }
        match self.code {
            KeyCode::Char(' ') => f.write_str("Space"),
            KeyCode::Char(c) => write!(f, "{}", c.to_ascii_uppercase()),
            KeyCode::F(n) => write!(f, "F{n}"),
            KeyCode::PageUp => f.write_str("PgUp"),
            KeyCode::PageDown => f.write_str("PgDn"),
            other => write!(f, "{other:?}"),
        }
    }
}

fn parse_key(key: &str) -> Option<KeyCode> {
    let mut chars = key.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return Some(KeyCode::Char(c));
    }
    let lower = key.to_ascii_lowercase();
    let code = match lower.as_str() {
        "enter" | "return" => KeyCode::Enter,
        "esc" | "escape" => KeyCode::Esc,
        "tab" => KeyCode::Tab,
        "backspace" => KeyCode::Backspace,
        "delete" | "del" => KeyCode::Delete,
        "space" => KeyCode::Char(' '),
        "up" => KeyCode::Up,
        "down" => KeyCode::Down,
        "left" => KeyCode::Left,
        "right" => KeyCode::Right,
        "home" => KeyCode::Home,
        "end" => KeyCode::End,
        "pageup" => KeyCode::PageUp,
        "pagedown" => KeyCode::PageDown,
        _ => {
            let n: u8 = lower.strip_prefix('f')?.parse().ok()?;
            if (1..=12).contains(&n) {
                KeyCode::F(n)
            } else {
                return None;
            }
        }
    };
    Some(code)
}

const DEFAULT_BINDINGS: &[(&str, Command)] = &[
    ("mod+z", Command::Undo),
    ("mod+y", Command::Redo),
    ("mod+shift+z", Command::Redo),
    ("mod+b", Command::Bold),
    ("mod+i", Command::Italic),
    ("mod+k", Command::Link),
    ("mod+e", Command::InlineCode),
    ("mod+shift+c", Command::CodeBlock),
    ("mod+shift+x", Command::Strikethrough),
    ("mod+h", Command::ToggleFind),
    // many terminals report ctrl+h as backspace
    ("mod+f", Command::ToggleFind),
    ("mod+a", Command::SelectAll),
    ("mod+s", Command::Save),
    ("mod+q", Command::Quit),
    ("mod+p", Command::CycleView),
    ("mod+t", Command::Templates),
    ("mod+g", Command::Assist),
    ("mod+j", Command::Emoji),
    ("mod+l", Command::Table),
    ("mod+o", Command::Image),
    ("mod+shift+y", Command::CopyAll),
    ("mod+r", Command::ExportReadme),
    ("mod+shift+r", Command::ExportHtml),
    ("alt+1", Command::Heading1),
    ("alt+2", Command::Heading2),
    ("alt+3", Command::Heading3),
    ("alt+l", Command::BulletList),
    ("alt+n", Command::NumberedList),
    ("alt+t", Command::TaskList),
    ("alt+q", Command::Quote),
    ("f2", Command::Themes),
    ("f3", Command::CycleAccent),
    ("f4", Command::CycleFont),
    ("mod+shift+o", Command::Open),
    ("f1", Command::Help),
];

/// Chord → command table consulted before a key reaches text insertion.
#[derive(Debug, Clone)]
pub struct Keymap {
    bindings: HashMap<Chord, Command>,
}

impl Default for Keymap {
    fn default() -> Self {
        let mut bindings = HashMap::new();
        for (chord, command) in DEFAULT_BINDINGS {
            if let Ok(chord) = chord.parse::<Chord>() {
                bindings.insert(chord, *command);
            }
        }
        Self { bindings }
    }
}

impl Keymap {
    /// Default bindings with `overrides` (`"ctrl+shift+z" = "redo"`) applied on
    /// top. Binding a chord to `"none"` removes it.
    pub fn with_overrides(overrides: &BTreeMap<String, String>) -> Result<Self, KeymapError> {
        let mut keymap = Self::default();
        for (chord, command) in overrides {
            let chord: Chord = chord.parse()?;
            if command.trim().eq_ignore_ascii_case("none") {
                keymap.bindings.remove(&chord);
                continue;
            }
            let command: Command = command.parse()?;
            debug!(target: "keymap", ?chord, %command, "binding_override");
            keymap.bindings.insert(chord, command);
        }
        Ok(keymap)
    }

    /// A matched chord is consumed: the caller must not treat the key as text.
    pub fn dispatch(&self, event: &KeyEvent) -> Option<Command> {
        self.bindings.get(&Chord::from_event(event)).copied()
    }

    /// Every chord bound to `command`, in display order.
    pub fn chords_for(&self, command: Command) -> Vec<Chord> {
        let mut chords: Vec<Chord> = self
            .bindings
            .iter()
            .filter(|(_, cmd)| **cmd == command)
            .map(|(chord, _)| *chord)
            .collect();
        chords.sort_by_key(|chord| chord.to_string());
        chords
    }

    /// `(command, "Ctrl+Shift+Z, Ctrl+Y")` rows for the help popup. Commands
    /// with no chord are listed with an empty binding.
    pub fn help_rows(&self) -> Vec<(Command, String)> {
        Command::all()
            .map(|command| {
                let chords: Vec<String> = self
                    .chords_for(command)
                    .iter()
                    .map(Chord::to_string)
                    .collect();
                (command, chords.join(", "))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn default_table_covers_core_chords() {
        let keymap = Keymap::default();
        let ctrl = KeyModifiers::CONTROL;
        assert_eq!(keymap.dispatch(&key(KeyCode::Char('z'), ctrl)), Some(Command::Undo));
        assert_eq!(keymap.dispatch(&key(KeyCode::Char('y'), ctrl)), Some(Command::Redo));
        assert_eq!(keymap.dispatch(&key(KeyCode::Char('b'), ctrl)), Some(Command::Bold));
        assert_eq!(keymap.dispatch(&key(KeyCode::Char('k'), ctrl)), Some(Command::Link));
        assert_eq!(keymap.dispatch(&key(KeyCode::Char('h'), ctrl)), Some(Command::ToggleFind));
        assert_eq!(keymap.dispatch(&key(KeyCode::Char('b'), KeyModifiers::NONE)), None);
    }

    #[test]
    fn shifted_chord_matches_either_report() {
        let keymap = Keymap::default();
        let uppercase = key(KeyCode::Char('Z'), KeyModifiers::CONTROL);
        let explicit = key(
            KeyCode::Char('z'),
            KeyModifiers::CONTROL | KeyModifiers::SHIFT,
        );
        assert_eq!(keymap.dispatch(&uppercase), Some(Command::Redo));
        assert_eq!(keymap.dispatch(&explicit), Some(Command::Redo));
        assert_eq!(
            keymap.dispatch(&key(KeyCode::Char('C'), KeyModifiers::CONTROL | KeyModifiers::SHIFT)),
            Some(Command::CodeBlock)
        );
    }

    #[test]
    fn parses_chords() {
        let chord: Chord = "ctrl+shift+z".parse().unwrap();
        assert_eq!(
            chord,
            Chord::new(KeyModifiers::CONTROL | KeyModifiers::SHIFT, KeyCode::Char('z'))
        );
        assert_eq!("f5".parse::<Chord>().unwrap(), Chord::new(KeyModifiers::NONE, KeyCode::F(5)));
        assert_eq!("".parse::<Chord>(), Err(KeymapError::EmptyChord));
        assert!(matches!(
            "hyper+x".parse::<Chord>(),
            Err(KeymapError::UnknownKey { .. })
        ));
    }

    #[test]
    fn overrides_replace_and_remove_bindings() {
        let mut overrides = BTreeMap::new();
        overrides.insert("ctrl+u".to_string(), "undo".to_string());
        overrides.insert("ctrl+b".to_string(), "none".to_string());
        let keymap = Keymap::with_overrides(&overrides).unwrap();
        let ctrl = KeyModifiers::CONTROL;
        assert_eq!(keymap.dispatch(&key(KeyCode::Char('u'), ctrl)), Some(Command::Undo));
        assert_eq!(keymap.dispatch(&key(KeyCode::Char('b'), ctrl)), None);
    }

    #[test]
    fn unknown_command_is_reported() {
        let mut overrides = BTreeMap::new();
        overrides.insert("ctrl+u".to_string(), "explode".to_string());
        assert_eq!(
            Keymap::with_overrides(&overrides).unwrap_err(),
            KeymapError::UnknownCommand("explode".to_string())
        );
    }

    #[test]
    fn chords_display_for_help() {
        let chord: Chord = "ctrl+shift+z".parse().unwrap();
        assert_eq!(chord.to_string(), "Ctrl+Shift+Z");
        assert_eq!("f1".parse::<Chord>().unwrap().to_string(), "F1");
        assert_eq!("alt+space".parse::<Chord>().unwrap().to_string(), "Alt+Space");
    }

    #[test]
    fn help_rows_list_every_command_with_its_chords() {
        let keymap = Keymap::default();
        let rows = keymap.help_rows();
        assert_eq!(rows.len(), COMMAND_NAMES.len());
        let redo = rows.iter().find(|(cmd, _)| *cmd == Command::Redo).unwrap();
        assert_eq!(redo.1, "Ctrl+Shift+Z, Ctrl+Y");
        assert_eq!(
            keymap.chords_for(Command::Help),
            vec![Chord::new(KeyModifiers::NONE, KeyCode::F(1))]
        );

        let mut overrides = BTreeMap::new();
        overrides.insert("f1".to_string(), "none".to_string());
        let keymap = Keymap::with_overrides(&overrides).unwrap();
        assert!(keymap.chords_for(Command::Help).is_empty());
    }

    #[test]
    fn command_names_round_trip() {
        for (name, command) in COMMAND_NAMES {
            assert_eq!(name.parse::<Command>().unwrap(), *command);
            assert_eq!(command.name(), *name);
        }
        assert_eq!("TOGGLE_FIND".parse::<Command>().unwrap(), Command::ToggleFind);
    }
}
