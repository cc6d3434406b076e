use std::ops::RangeInclusive;

pub const TABLE_ROWS: RangeInclusive<usize> = 2..=20;
pub const TABLE_COLS: RangeInclusive<usize> = 1..=10;
pub const DEFAULT_TABLE_SIZE: (usize, usize) = (3, 3);

pub struct EmojiCategory {
    pub name: &'static str,
    pub emojis: &'static [&'static str],
}

pub const EMOJI_CATEGORIES: &[EmojiCategory] = &[
    EmojiCategory {
        name: "Smileys",
        emojis: &[
            "😀", "😃", "😄", "😁", "😅", "😂", "🤣", "😊", "😇", "🙂", "🙃", "😉", "😌", "😍",
            "🥰", "😘", "😋", "😛", "😜", "🤪", "🤨", "🧐", "🤓", "😎", "🥸", "🤩",
        ],
    },
    EmojiCategory {
        name: "Gestures",
        emojis: &[
            "👍", "👎", "👌", "✌️", "🤞", "🤟", "🤘", "🤙", "👈", "👉", "👆", "👇", "☝️", "👏",
            "🙌", "👐", "🤲", "🤝", "🙏", "✍️", "💪",
        ],
    },
    EmojiCategory {
        name: "Objects",
        emojis: &[
            "💻", "⌨️", "🖥️", "🖨️", "🖱️", "💾", "💿", "📀", "📱", "☎️", "📞", "📺", "📻", "🎙️",
            "🧭", "⏱️", "⏰", "⌛", "⏳", "📡", "🔋", "🔌", "📦", "🔧", "🛠️", "📝", "📚", "🔒",
        ],
    },
    EmojiCategory {
        name: "Symbols",
        emojis: &[
            "❤️", "🧡", "💛", "💚", "💙", "💜", "🖤", "🤍", "🤎", "💔", "✨", "⭐", "🌟", "💫",
            "✅", "❌", "⚠️", "🔥", "💯", "🎯", "🚀", "⚡", "💡", "🐛", "🎉",
        ],
    },
    EmojiCategory {
        name: "Flags",
        emojis: &["🏁", "🚩", "🎌", "🏴", "🏳️", "🏳️‍🌈", "🏴‍☠️"],
    },
];

/// A GitHub table with a numbered header row and `rows - 1` body rows,
/// surrounded by newlines. Sizes are clamped to the supported ranges.
pub fn table_markdown(rows: usize, cols: usize) -> String {
    let rows = rows.clamp(*TABLE_ROWS.start(), *TABLE_ROWS.end());
    let cols = cols.clamp(*TABLE_COLS.start(), *TABLE_COLS.end());

    let row = |cells: Vec<String>| format!("| {} |\n", cells.join(" | "));
    let mut out = String::from("\n");
    out.push_str(&row((1..=cols).map(|c| format!("Header {c}")).collect()));
    out.push_str(&row(vec!["---".to_string(); cols]));
    for r in 1..rows {
        out.push_str(&row((1..=cols).map(|c| format!("Cell {r}-{c}")).collect()));
    }
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_by_three_table() {
        assert_eq!(
            table_markdown(3, 3),
            "\n| Header 1 | Header 2 | Header 3 |\n\
             | --- | --- | --- |\n\
             | Cell 1-1 | Cell 1-2 | Cell 1-3 |\n\
             | Cell 2-1 | Cell 2-2 | Cell 2-3 |\n\n"
        );
    }

    #[test]
    fn table_size_is_clamped() {
        let tiny = table_markdown(0, 0);
        assert_eq!(tiny, "\n| Header 1 |\n| --- |\n| Cell 1-1 |\n\n");

        let huge = table_markdown(99, 99);
        let lines: Vec<&str> = huge.trim().lines().collect();
        assert_eq!(lines.len(), 21);
        assert_eq!(lines[0].matches("Header").count(), 10);
    }

    #[test]
    fn emoji_categories_are_populated() {
        let names: Vec<_> = EMOJI_CATEGORIES.iter().map(|c| c.name).collect();
        assert_eq!(names, ["Smileys", "Gestures", "Objects", "Symbols", "Flags"]);
        assert!(EMOJI_CATEGORIES.iter().all(|c| !c.emojis.is_empty()));
    }
}
