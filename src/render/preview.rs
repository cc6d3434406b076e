use super::{guarded, markdown_options};
use crate::buffer::normalize_line_endings;
use crate::theme::highlight_style;
use pulldown_cmark::{Alignment, CodeBlockKind, Event, HeadingLevel, Parser, Tag, TagEnd};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use syntect::easy::HighlightLines;
use syntect::highlighting::Theme;
use syntect::parsing::{SyntaxReference, SyntaxSet};
use syntect::util::LinesWithEndings;
use unicode_width::UnicodeWidthStr;

#[derive(Debug, Clone, Copy)]
pub struct PreviewStyles {
    pub base: Style,
    pub heading: [Style; 6],
    pub link: Color,
    pub inline_code: Style,
    pub marker: Style,
    pub rule: Style,
    pub html: Style,
    pub code_bg: Option<Color>,
    pub code_border: Style,
    pub code_label: Style,
    pub table_border: Style,
    pub table_header: Style,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineEntry {
    pub level: u8,
    pub title: String,
    /// Index into `Preview::lines`.
    pub line: usize,
}

pub struct Preview {
    pub lines: Vec<Line<'static>>,
    pub outline: Vec<OutlineEntry>,
}

impl Preview {
    pub fn title(&self) -> Option<&str> {
        self.outline
            .iter()
            .find(|h| h.level == 1)
            .map(|h| h.title.as_str())
    }
}

/// Projects markdown onto styled terminal lines. Never panics; a failing
/// renderer yields a single error line.
pub fn render_lines(
    text: &str,
    styles: &PreviewStyles,
    syntax_set: &SyntaxSet,
    theme: &Theme,
    tab_width: usize,
) -> Preview {
    guarded("preview", || {
        Projector::new(styles, syntax_set, theme, tab_width).run(text)
    })
    .unwrap_or_else(|| Preview {
        lines: vec![Line::from(Span::styled(
            "Error rendering markdown",
            styles.base.fg(Color::Red),
        ))],
        outline: Vec::new(),
    })
}

struct Projector<'a> {
    styles: &'a PreviewStyles,
    syntax_set: &'a SyntaxSet,
    theme: &'a Theme,
    tab_width: usize,
    lines: Vec<Line<'static>>,
    outline: Vec<OutlineEntry>,
    current: Vec<Span<'static>>,
    inline: Inline,
    quote_depth: usize,
    lists: Vec<Option<u64>>,
    item_marker: Option<String>,
    heading: Option<(u8, String)>,
    code: Option<CodeBlock>,
    table: Option<Table>,
}

impl<'a> Projector<'a> {
    fn new(
        styles: &'a PreviewStyles,
        syntax_set: &'a SyntaxSet,
        theme: &'a Theme,
        tab_width: usize,
    ) -> Self {
        Self {
            styles,
            syntax_set,
            theme,
            tab_width: tab_width.max(1),
            lines: Vec::new(),
            outline: Vec::new(),
            current: Vec::new(),
            inline: Inline::default(),
            quote_depth: 0,
            lists: Vec::new(),
            item_marker: None,
            heading: None,
            code: None,
            table: None,
        }
    }

    fn run(mut self, text: &str) -> Preview {
        let text = normalize_line_endings(text);
        for event in Parser::new_ext(&text, markdown_options()) {
            match event {
                Event::Start(tag) => self.start(tag),
                Event::End(tag) => self.end(tag),
                Event::Text(t) => self.text(&t),
                Event::Code(t) => {
                    let style = self.styles.inline_code.patch(self.inline.style(self.styles.link));
                    self.push(&t, style);
                }
                Event::Html(raw) => {
                    for line in raw.lines() {
                        self.push(line, self.styles.html);
                        self.flush();
                    }
                }
                Event::InlineHtml(raw) => self.push(&raw, self.styles.html),
                Event::FootnoteReference(label) => {
                    self.push(&format!("[^{label}]"), self.styles.marker);
                }
                Event::SoftBreak | Event::HardBreak => self.line_break(),
                Event::Rule => {
                    self.flush();
                    self.lines
                        .push(Line::from(Span::styled("─".repeat(40), self.styles.rule)));
                    self.blank();
                }
                Event::TaskListMarker(done) => {
                    let marker = if done { "[x] " } else { "[ ] " };
                    self.push(marker, self.styles.marker);
                }
            }
        }
        self.flush();
        while self.lines.last().is_some_and(|l| l.width() == 0) {
            self.lines.pop();
        }
        Preview {
            lines: self.lines,
            outline: self.outline,
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Heading { level, .. } => {
                self.flush();
                self.heading = Some((heading_depth(level), String::new()));
            }
            Tag::CodeBlock(kind) => {
                self.flush();
                self.code = Some(CodeBlock::new(kind));
            }
            Tag::Table(alignments) => {
                self.flush();
                self.table = Some(Table::new(alignments));
            }
            Tag::TableHead => {
                if let Some(table) = self.table.as_mut() {
                    table.in_head = true;
                }
            }
            Tag::TableCell => {
                if let Some(table) = self.table.as_mut() {
                    table.cell.clear();
                }
            }
            Tag::List(start) => {
                self.flush();
                self.lists.push(start);
            }
            Tag::Item => {
                self.flush();
                self.item_marker = Some(self.next_marker());
            }
            Tag::BlockQuote => {
                self.flush();
                self.quote_depth += 1;
            }
            Tag::Emphasis => self.inline.italic += 1,
            Tag::Strong => self.inline.bold += 1,
            Tag::Strikethrough => self.inline.strike += 1,
            Tag::Link { .. } => self.inline.link += 1,
            Tag::Image { dest_url, .. } => {
                self.push(&format!("[image: {dest_url}] "), self.styles.marker);
            }
            Tag::FootnoteDefinition(label) => {
                self.flush();
                self.push(&format!("[^{label}]: "), self.styles.marker);
            }
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph => {
                if self.table.is_none() {
                    self.flush();
                    if self.lists.is_empty() {
                        self.blank();
                    }
                }
            }
            TagEnd::Heading(_) => self.finish_heading(),
            TagEnd::CodeBlock => {
                if let Some(block) = self.code.take() {
                    self.render_code(&block);
                    self.blank();
                }
            }
            TagEnd::Table => {
                if let Some(table) = self.table.take() {
                    self.render_table(&table);
                    self.blank();
                }
            }
            TagEnd::TableHead => {
                if let Some(table) = self.table.as_mut() {
                    table.end_row();
                    table.in_head = false;
                }
            }
            TagEnd::TableRow => {
                if let Some(table) = self.table.as_mut() {
                    table.end_row();
                }
            }
            TagEnd::TableCell => {
                if let Some(table) = self.table.as_mut() {
                    table.end_cell();
                }
            }
            TagEnd::List(_) => {
                self.flush();
                self.lists.pop();
                if self.lists.is_empty() {
                    self.blank();
                }
            }
            TagEnd::Item => {
                self.flush();
                self.item_marker = None;
            }
            TagEnd::BlockQuote => {
                self.flush();
                self.quote_depth = self.quote_depth.saturating_sub(1);
                self.blank();
            }
            TagEnd::Emphasis => self.inline.italic = self.inline.italic.saturating_sub(1),
            TagEnd::Strong => self.inline.bold = self.inline.bold.saturating_sub(1),
            TagEnd::Strikethrough => self.inline.strike = self.inline.strike.saturating_sub(1),
            TagEnd::Link => self.inline.link = self.inline.link.saturating_sub(1),
            TagEnd::FootnoteDefinition => self.flush(),
            _ => {}
        }
    }

    fn text(&mut self, text: &str) {
        if let Some(block) = self.code.as_mut() {
            block.text.push_str(text);
        } else if let Some((_, title)) = self.heading.as_mut() {
            title.push_str(text);
        } else {
            let style = self.styles.base.patch(self.inline.style(self.styles.link));
            self.push(text, style);
        }
    }

    fn push(&mut self, text: &str, style: Style) {
        let text = expand_tabs(text, self.tab_width);
        if let Some(table) = self.table.as_mut() {
            table.cell.push(Span::styled(text, style));
            return;
        }
        if let Some((_, title)) = self.heading.as_mut() {
            title.push_str(&text);
            return;
        }
        if self.current.is_empty() {
            let prefix = self.prefix();
            if !prefix.is_empty() {
                self.current.push(Span::styled(prefix, self.styles.marker));
            }
        }
        self.current.push(Span::styled(text, style));
    }

    fn line_break(&mut self) {
        if let Some(table) = self.table.as_mut() {
            table.cell.push(Span::raw(" "));
        } else if let Some(block) = self.code.as_mut() {
            block.text.push('\n');
        } else {
            if self.current.is_empty() {
                self.push("", self.styles.base);
            }
            self.flush();
        }
    }

    /// Quote bars, then the list marker on an item's first line or an
    /// indent of the same depth on continuation lines.
    fn prefix(&mut self) -> String {
        let mut prefix = "│ ".repeat(self.quote_depth);
        match self.item_marker.take() {
            Some(marker) => prefix.push_str(&marker),
            None if !self.lists.is_empty() => prefix.push_str(&"  ".repeat(self.lists.len())),
            None => {}
        }
        prefix
    }

    fn next_marker(&mut self) -> String {
        let depth = self.lists.len().max(1);
        let indent = "  ".repeat(depth - 1);
        match self.lists.last_mut() {
            Some(Some(next)) => {
                let n = *next;
                *next += 1;
                format!("{indent}{n}. ")
            }
            _ => format!("{indent}{} ", bullet(depth)),
        }
    }

    fn flush(&mut self) {
        if !self.current.is_empty() {
            self.lines.push(Line::from(std::mem::take(&mut self.current)));
        }
    }

    fn blank(&mut self) {
        if self.lines.last().is_some_and(|l| l.width() > 0) {
            self.lines.push(Line::default());
        }
    }

    fn finish_heading(&mut self) {
        let Some((level, title)) = self.heading.take() else {
            return;
        };
        let title = title.trim().to_string();
        let style = self.styles.heading[usize::from(level.clamp(1, 6)) - 1];
        self.outline.push(OutlineEntry {
            level,
            title: title.clone(),
            line: self.lines.len(),
        });
        let width = UnicodeWidthStr::width(title.as_str());
        self.lines.push(Line::from(Span::styled(title, style)));
        if level <= 2 {
            let rule = if level == 1 { "═" } else { "─" };
            self.lines
                .push(Line::from(Span::styled(rule.repeat(width.clamp(3, 60)), self.styles.rule)));
        }
        self.blank();
    }

    fn render_code(&mut self, block: &CodeBlock) {
        let border = self.styles.code_border;
        let pad = Style::default().bg(self.styles.code_bg.unwrap_or(Color::Reset));
        let label = block.language.as_deref().unwrap_or("code");
        self.lines.push(Line::from(vec![
            Span::styled("╭─ ", border),
            Span::styled(label.to_string(), self.styles.code_label),
        ]));

        let syntax = find_syntax(self.syntax_set, block.language.as_deref());
        let mut highlighter = HighlightLines::new(syntax, self.theme);
        for raw in LinesWithEndings::from(&block.text) {
            let mut spans = vec![Span::styled("│ ", border)];
            match highlighter.highlight_line(raw, self.syntax_set) {
                Ok(ranges) => {
                    for (style, piece) in ranges {
                        let piece = piece.trim_end_matches('\n');
                        if !piece.is_empty() {
                            spans.push(Span::styled(
                                expand_tabs(piece, self.tab_width),
                                highlight_style(style, self.styles.code_bg),
                            ));
                        }
                    }
                }
                Err(_) => spans.push(Span::styled(
                    expand_tabs(raw.trim_end_matches('\n'), self.tab_width),
                    pad,
                )),
            }
            self.lines.push(Line::from(spans));
        }
        self.lines.push(Line::from(Span::styled("╰─", border)));
    }

    fn render_table(&mut self, table: &Table) {
        let columns = table.rows.iter().map(|r| r.cells.len()).max().unwrap_or(0);
        if columns == 0 {
            return;
        }
        let mut widths = vec![0usize; columns];
        for row in &table.rows {
            for (idx, cell) in row.cells.iter().enumerate() {
                widths[idx] = widths[idx].max(cell_width(cell));
            }
        }

        let border = self.styles.table_border;
        self.lines.push(rule_line(&widths, ['┌', '┬', '┐'], border));
        for (idx, row) in table.rows.iter().enumerate() {
            let cell_style = if row.header {
                self.styles.table_header
            } else {
                self.styles.base
            };
            let mut spans = vec![Span::styled("│", border)];
            for (col, width) in widths.iter().enumerate() {
                let empty = Vec::new();
                let cell = row.cells.get(col).unwrap_or(&empty);
                let align = table.alignments.get(col).copied().unwrap_or(Alignment::None);
                let (left, right) = padding(cell_width(cell), *width, align);
                spans.push(Span::styled(" ".repeat(left + 1), cell_style));
                for span in cell {
                    spans.push(Span::styled(span.content.clone(), cell_style.patch(span.style)));
                }
                spans.push(Span::styled(" ".repeat(right + 1), cell_style));
                spans.push(Span::styled("│", border));
            }
            self.lines.push(Line::from(spans));
            if row.header && table.rows.get(idx + 1).is_some_and(|next| !next.header) {
                self.lines.push(rule_line(&widths, ['├', '┼', '┤'], border));
            }
        }
        self.lines.push(rule_line(&widths, ['└', '┴', '┘'], border));
    }
}

#[derive(Default)]
struct Inline {
    bold: u8,
    italic: u8,
    strike: u8,
    link: u8,
}

impl Inline {
    fn style(&self, link: Color) -> Style {
        let mut style = Style::default();
        if self.link > 0 {
            style = style.fg(link).add_modifier(Modifier::UNDERLINED);
        }
        if self.bold > 0 {
            style = style.add_modifier(Modifier::BOLD);
        }
        if self.italic > 0 {
            style = style.add_modifier(Modifier::ITALIC);
        }
        if self.strike > 0 {
            style = style.add_modifier(Modifier::CROSSED_OUT);
        }
        style
    }
}

struct CodeBlock {
    language: Option<String>,
    text: String,
}

impl CodeBlock {
    fn new(kind: CodeBlockKind<'_>) -> Self {
        let language = match kind {
            CodeBlockKind::Fenced(info) => info
                .split_whitespace()
                .next()
                .map(|lang| lang.trim_start_matches("language-").to_string()),
            CodeBlockKind::Indented => None,
        };
        Self {
            language,
            text: String::new(),
        }
    }
}

type Cell = Vec<Span<'static>>;

struct Row {
    cells: Vec<Cell>,
    header: bool,
}

struct Table {
    alignments: Vec<Alignment>,
    rows: Vec<Row>,
    row: Vec<Cell>,
    cell: Cell,
    in_head: bool,
}

impl Table {
    fn new(alignments: Vec<Alignment>) -> Self {
        Self {
            alignments,
            rows: Vec::new(),
            row: Vec::new(),
            cell: Vec::new(),
            in_head: false,
        }
    }

    fn end_cell(&mut self) {
        let cell = trim_cell(std::mem::take(&mut self.cell));
        self.row.push(cell);
    }

    fn end_row(&mut self) {
        if self.row.is_empty() {
            return;
        }
        self.rows.push(Row {
            cells: std::mem::take(&mut self.row),
            header: self.in_head,
        });
    }
}

fn trim_cell(mut cell: Cell) -> Cell {
    if let Some(first) = cell.first_mut() {
        first.content = first.content.trim_start().to_string().into();
    }
    if let Some(last) = cell.last_mut() {
        last.content = last.content.trim_end().to_string().into();
    }
    cell.retain(|span| !span.content.is_empty());
    cell
}

fn cell_width(cell: &Cell) -> usize {
    cell.iter()
        .map(|span| UnicodeWidthStr::width(span.content.as_ref()))
        .sum()
}

fn padding(content: usize, width: usize, align: Alignment) -> (usize, usize) {
    let gap = width.saturating_sub(content);
    match align {
        Alignment::Right => (gap, 0),
        Alignment::Center => (gap / 2, gap - gap / 2),
        _ => (0, gap),
    }
}

fn rule_line(widths: &[usize], joints: [char; 3], style: Style) -> Line<'static> {
    let segments: Vec<String> = widths.iter().map(|w| "─".repeat(w + 2)).collect();
    let line = format!(
        "{}{}{}",
        joints[0],
        segments.join(joints[1].to_string().as_str()),
        joints[2]
    );
    Line::from(Span::styled(line, style))
}

fn find_syntax<'s>(syntax_set: &'s SyntaxSet, lang: Option<&str>) -> &'s SyntaxReference {
    lang.and_then(|lang| {
        syntax_set
            .find_syntax_by_token(lang)
            .or_else(|| syntax_set.find_syntax_by_extension(&lang.to_ascii_lowercase()))
    })
    .unwrap_or_else(|| syntax_set.find_syntax_plain_text())
}

fn heading_depth(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

fn bullet(depth: usize) -> &'static str {
    match depth % 3 {
        1 => "•",
        2 => "◦",
        _ => "▪",
    }
}

fn expand_tabs(text: &str, tab_width: usize) -> String {
    text.replace('\t', &" ".repeat(tab_width))
}

#[cfg(test)]
mod tests {
    use super::*;
    use syntect::highlighting::ThemeSet;

    fn styles() -> PreviewStyles {
        PreviewStyles {
            base: Style::default(),
            heading: [Style::default().add_modifier(Modifier::BOLD); 6],
            link: Color::Blue,
            inline_code: Style::default().fg(Color::Yellow),
            marker: Style::default().fg(Color::DarkGray),
            rule: Style::default(),
            html: Style::default().add_modifier(Modifier::ITALIC),
            code_bg: None,
            code_border: Style::default(),
            code_label: Style::default(),
            table_border: Style::default(),
            table_header: Style::default().add_modifier(Modifier::BOLD),
        }
    }

    fn render(text: &str) -> Preview {
        let syntax_set = SyntaxSet::load_defaults_newlines();
        let themes = ThemeSet::load_defaults();
        let theme = &themes.themes["base16-ocean.dark"];
        render_lines(text, &styles(), &syntax_set, theme, 4)
    }

    fn plain(line: &Line<'_>) -> String {
        line.spans.iter().map(|s| s.content.as_ref()).collect()
    }

    fn plain_lines(preview: &Preview) -> Vec<String> {
        preview.lines.iter().map(plain).collect()
    }

    #[test]
    fn empty_document_has_no_lines() {
        assert!(render("").lines.is_empty());
    }

    #[test]
    fn soft_break_starts_a_new_line() {
        let lines = plain_lines(&render("first\nsecond\n"));
        assert_eq!(lines, vec!["first", "second"]);
    }

    #[test]
    fn raw_html_is_shown_verbatim() {
        let lines = plain_lines(&render("<p align=\"center\">\n  <b>hi</b>\n</p>\n"));
        assert!(lines.iter().any(|l| l == "<p align=\"center\">"));
        assert!(lines.iter().any(|l| l.contains("<b>hi</b>")));
    }

    #[test]
    fn headings_feed_the_outline() {
        let preview = render("# Project\n\nIntro\n\n## Usage\n");
        let titles: Vec<_> = preview
            .outline
            .iter()
            .map(|h| (h.level, h.title.as_str()))
            .collect();
        assert_eq!(titles, vec![(1, "Project"), (2, "Usage")]);
        assert_eq!(plain(&preview.lines[preview.outline[1].line]), "Usage");
        assert_eq!(preview.title(), Some("Project"));
    }

    #[test]
    fn lists_get_markers() {
        let lines = plain_lines(&render("- one\n- two\n\n3. three\n4. four\n\n- [x] done\n"));
        assert!(lines.contains(&"• one".to_string()));
        assert!(lines.contains(&"3. three".to_string()));
        assert!(lines.contains(&"4. four".to_string()));
        assert!(lines.contains(&"• [x] done".to_string()));
    }

    #[test]
    fn blockquotes_are_barred() {
        let lines = plain_lines(&render("> quoted\n> text\n"));
        assert_eq!(lines, vec!["│ quoted", "│ text"]);
    }

    #[test]
    fn code_blocks_are_framed_and_labelled() {
        let lines = plain_lines(&render("```rust\nfn main() {}\n```\n"));
        assert_eq!(lines[0], "╭─ rust");
        assert_eq!(lines[1], "│ fn main() {}");
        assert_eq!(lines[2], "╰─");
    }

    #[test]
    fn table_header_is_bold_and_separated() {
        let preview = render("| Key | Action |\n| --- | --- |\n| a | Add |\n");
        let lines = plain_lines(&preview);
        assert!(lines[0].starts_with('┌'));
        assert!(lines[1].contains(" Key "));
        assert!(lines[2].starts_with('├'));
        assert!(preview.lines[1].spans.iter().any(|span| {
            span.content.contains("Key") && span.style.add_modifier.contains(Modifier::BOLD)
        }));
        let widths: Vec<usize> = lines[..4].iter().map(|l| l.chars().count()).collect();
        assert!(widths.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn bold_survives_inside_table_cells() {
        let preview = render("| Key | Action |\n| --- | --- |\n| **File Operations** | Add |\n");
        let bold = preview.lines.iter().any(|line| {
            line.spans.iter().any(|span| {
                span.content.contains("File Operations")
                    && span.style.add_modifier.contains(Modifier::BOLD)
            })
        });
        assert!(bold);
    }

    #[test]
    fn rules_breaks_and_footnote_refs_render() {
        let lines = plain_lines(&render("one\\\ntwo\n\n---\n\nSee[^1] <kbd>K</kbd>\n\n[^1]: note\n"));
        assert_eq!(lines[0], "one");
        assert_eq!(lines[1], "two");
        assert!(lines.contains(&"─".repeat(40)));
        assert!(lines.iter().any(|l| l.starts_with("See[^1] <kbd>K</kbd>")));
    }

    #[test]
    fn inline_styles_apply() {
        let preview = render("*it* and [link](https://x.dev)\n");
        let spans = &preview.lines[0].spans;
        assert!(spans.iter().any(|s| s.content == "it" && s.style.add_modifier.contains(Modifier::ITALIC)));
        assert!(spans.iter().any(|s| s.content == "link" && s.style.fg == Some(Color::Blue)));
    }
}
