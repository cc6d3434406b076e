use crate::assist::{self, AssistError, AssistJob, Feature, GroqClient, PromptInput};
use crate::buffer;
use crate::config::{Config, ViewMode};
use crate::debounce::Debounce;
use crate::editor::{Editor, FindField, Motion};
use crate::export;
use crate::image::{self, ImageHost, ImageJob, ImgurHost};
use crate::keymap::{Command, Keymap};
use crate::ops;
use crate::prefs::{Preferences, UserPreferences};
use crate::render::preview::{self, Preview, PreviewStyles};
use crate::snippets::{self, EMOJI_CATEGORIES, TABLE_COLS, TABLE_ROWS};
use crate::store::Storage;
use crate::templates::TEMPLATES;
use crate::theme::{self, ThemeManager, UiPalette};
use crate::toast::{Toast, ToastKind};
use anyhow::{Context, Result};
use crossterm::event::{
    self, DisableBracketedPaste, EnableBracketedPaste, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::{execute, ExecutableCommand};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, BorderType, Clear, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::Terminal;
use std::env;
use std::fs;
use std::io::{self, Stdout};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use syntect::easy::HighlightLines;
use syntect::highlighting::Theme;
use syntect::parsing::SyntaxSet;
use tracing::{error, info, warn};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

const EMOJI_COLUMNS: usize = 8;

/// Where the text comes from and where Ctrl+S puts it.
pub enum Document {
    File(PathBuf),
    /// The draft kept in the key-value store, autosaved.
    Draft,
}

impl Document {
    fn label(&self) -> String {
        match self {
            Self::File(path) => path
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("untitled")
                .to_string(),
            Self::Draft => "draft".to_string(),
        }
    }

    fn load(&self, storage: &Storage) -> Result<String> {
        match self {
            Self::File(path) if path.exists() => fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display())),
            Self::File(_) => Ok(String::new()),
            Self::Draft => Ok(storage.load_content()),
        }
    }

    fn export_dir(&self) -> Result<PathBuf> {
        if let Self::File(path) = self {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                return Ok(dir.to_path_buf());
            }
        }
        env::current_dir().context("Could not determine current directory")
    }
}

/// Results of background work, delivered on the UI thread.
enum Job {
    Assist(AssistJob),
    Image(ImageJob),
}

impl From<AssistJob> for Job {
    fn from(job: AssistJob) -> Self {
        Self::Assist(job)
    }
}

impl From<ImageJob> for Job {
    fn from(job: ImageJob) -> Self {
        Self::Image(job)
    }
}

pub fn run_app(document: Document, config: Config, storage: Storage) -> Result<()> {
    let theme_manager = ThemeManager::load(&config)?;
    let keymap = Keymap::with_overrides(&config.keys).context("Invalid [keys] table in config")?;
    let mut app = App::new(document, config, storage, theme_manager, keymap)?;

    let mut terminal = setup_terminal()?;
    let _guard = TerminalGuard;

    let tick_rate = Duration::from_millis(50);

    loop {
        app.tick(Instant::now());

        let size = terminal.size()?;
        let layout = app.layout(size);
        app.ensure_cursor_visible(layout.editor_height, layout.editor_width);
        if layout.preview.is_some() {
            app.sync_preview_scroll(layout.preview_height);
        }

        terminal.draw(|f| ui(f, &mut app, &layout))?;

        if event::poll(tick_rate)? {
            match event::read()? {
                Event::Key(key) if key.kind != KeyEventKind::Release => {
                    if app.handle_key(key, layout.editor_height.max(layout.preview_height)) {
                        break;
                    }
                }
                Event::Paste(text) => app.paste(&text),
                _ => {}
            }
        }
    }

    app.shutdown();
    Ok(())
}

struct TerminalGuard;

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = stdout.execute(DisableBracketedPaste);
        let _ = stdout.execute(LeaveAlternateScreen);
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableBracketedPaste)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Edit,
    ThemePicker,
    TemplatePicker,
    EmojiPicker,
    TableBuilder,
    AssistMenu,
    AssistInput(Feature),
    ApiKeyInput,
    ImagePrompt,
    OpenPrompt,
    Help,
    ConfirmQuit,
}

struct LayoutInfo {
    main: Rect,
    find: Option<Rect>,
    status: Rect,
    editor: Option<Rect>,
    preview: Option<Rect>,
    editor_width: u16,
    editor_height: u16,
    preview_height: u16,
}

struct App {
    document: Document,
    config: Config,
    keymap: Keymap,
    editor: Editor,
    storage: Storage,
    prefs: Preferences,
    theme_manager: ThemeManager,
    fallback_theme: Theme,
    syntax_set: SyntaxSet,
    palette: UiPalette,
    preview_styles: PreviewStyles,
    theme_name: String,
    theme_preview: Option<String>,
    style_generation: u64,
    view: ViewMode,
    mode: Mode,
    toast: Toast,
    autosave: Debounce,
    seen_revision: u64,
    dirty: bool,
    last_saved: Option<u64>,
    edit_scroll: usize,
    edit_hscroll: usize,
    preview_scroll: usize,
    preview: Preview,
    preview_key: Option<(u64, u64)>,
    editor_lines: Vec<Line<'static>>,
    editor_key: Option<(u64, u64)>,
    jobs_tx: Sender<Job>,
    jobs_rx: Receiver<Job>,
    pending_jobs: usize,
    input: String,
    theme_selected: usize,
    template_selected: usize,
    assist_selected: usize,
    help_selected: usize,
    emoji_category: usize,
    emoji_index: usize,
    table_size: (usize, usize),
}

impl App {
    fn new(
        document: Document,
        config: Config,
        storage: Storage,
        theme_manager: ThemeManager,
        keymap: Keymap,
    ) -> Result<Self> {
        let syntax_set = SyntaxSet::load_defaults_newlines();
        let text = document.load(&storage)?;
        let editor = Editor::new(&text, &config.editor_settings());

        let mut prefs = Preferences::load(&storage);
        if !theme_manager.contains(&prefs.current().theme) {
            warn!(target: "app", theme = %prefs.current().theme, "unknown_theme_using_fallback");
            let fallback = theme_manager.fallback_name().to_string();
            prefs.set_theme(&fallback);
        }
        let palette = theme_manager.ui_palette(prefs.current());
        let preview_styles = palette.preview_styles();
        let theme_name = prefs.current().theme.clone();
        let (jobs_tx, jobs_rx) = mpsc::channel();
        let last_saved = storage.last_save_time();

        info!(
            target: "app",
            document = %document.label(),
            chars = editor.buffer().len_chars(),
            "document_opened"
        );

        Ok(Self {
            document,
            view: config.view,
            toast: Toast::new(config.toast_window()),
            autosave: Debounce::new(config.autosave_window()),
            config,
            keymap,
            seen_revision: editor.revision(),
            editor,
            storage,
            prefs,
            theme_manager,
            fallback_theme: Theme::default(),
            syntax_set,
            palette,
            preview_styles,
            theme_name,
            theme_preview: None,
            style_generation: 0,
            mode: Mode::Edit,
            dirty: false,
            last_saved,
            edit_scroll: 0,
            edit_hscroll: 0,
            preview_scroll: 0,
            preview: Preview {
                lines: Vec::new(),
                outline: Vec::new(),
            },
            preview_key: None,
            editor_lines: Vec::new(),
            editor_key: None,
            jobs_tx,
            jobs_rx,
            pending_jobs: 0,
            input: String::new(),
            theme_selected: 0,
            template_selected: 0,
            assist_selected: 0,
            help_selected: 0,
            emoji_category: 0,
            emoji_index: 0,
            table_size: snippets::DEFAULT_TABLE_SIZE,
        })
    }

    fn layout(&self, size: Rect) -> LayoutInfo {
        let find_height = if self.editor.find().visible { 1 } else { 0 };
        let vertical = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(1),
                Constraint::Length(find_height),
                Constraint::Length(1),
            ])
            .split(size);
        let main = vertical[0];
        let find = (find_height > 0).then_some(vertical[1]);
        let status = vertical[2];

        let (editor, preview) = match self.view {
            ViewMode::Editor => (Some(main), None),
            ViewMode::Preview => (None, Some(main)),
            ViewMode::Split => {
                let split = Layout::default()
                    .direction(Direction::Horizontal)
                    .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
                    .split(main);
                (Some(split[0]), Some(split[1]))
            }
        };

        let inner = |r: Option<Rect>, f: fn(Rect) -> u16| {
            r.map(|r| f(r).saturating_sub(2).max(1)).unwrap_or(1)
        };

        LayoutInfo {
            main,
            find,
            status,
            editor,
            preview,
            editor_width: inner(editor, |r| r.width),
            editor_height: inner(editor, |r| r.height),
            preview_height: inner(preview, |r| r.height),
        }
    }

    /// Advances every deadline and applies finished background jobs.
    fn tick(&mut self, now: Instant) {
        self.editor.tick(now);
        while let Ok(job) = self.jobs_rx.try_recv() {
            self.on_job(job, now);
        }
        self.track_changes(now);
        if self.autosave.fire(now) {
            self.autosave();
        }
        self.toast.tick(now);
    }

    fn track_changes(&mut self, now: Instant) {
        let revision = self.editor.revision();
        if revision == self.seen_revision {
            return;
        }
        self.seen_revision = revision;
        self.dirty = true;
        if matches!(self.document, Document::Draft) {
            self.autosave.schedule(now);
        }
    }

    fn autosave(&mut self) {
        if self.storage.save_content(&self.editor.text().to_string()) {
            self.dirty = false;
            self.last_saved = self.storage.last_save_time();
        }
    }

    fn shutdown(&mut self) {
        self.editor.flush_history();
        if self.dirty && matches!(self.document, Document::Draft) {
            self.autosave();
        }
        info!(target: "app", "shutdown");
    }

    fn on_job(&mut self, job: Job, now: Instant) {
        self.pending_jobs = self.pending_jobs.saturating_sub(1);
        match job {
            Job::Assist(job) => match job.result.map(|reply| generated_text(&reply)) {
                Ok(Some(text)) => {
                    self.editor.replace_range(job.target, &text, now);
                    self.toast
                        .info(format!("{} inserted", job.feature.title()), now);
                }
                Ok(None) => self.toast.error("No content was generated", now),
                Err(err) => self.toast.error(err.to_string(), now),
            },
            Job::Image(job) => {
                self.editor
                    .replace_range(job.target, &ops::image_markdown(&job.url), now);
                let message = if job.uploaded {
                    "Image uploaded"
                } else {
                    "Image embedded"
                };
                self.toast.info(message, now);
            }
        }
    }

    fn handle_key(&mut self, key: KeyEvent, page: u16) -> bool {
        let now = Instant::now();
        match self.mode {
            Mode::Edit => return self.handle_edit_key(key, page, now),
            Mode::ThemePicker => self.handle_theme_picker(key, now),
            Mode::TemplatePicker => self.handle_template_picker(key, now),
            Mode::EmojiPicker => self.handle_emoji_picker(key, now),
            Mode::TableBuilder => self.handle_table_builder(key, now),
            Mode::AssistMenu => self.handle_assist_menu(key, now),
            Mode::AssistInput(feature) => self.handle_assist_input(feature, key, now),
            Mode::ApiKeyInput => self.handle_api_key_input(key, now),
            Mode::ImagePrompt => self.handle_image_prompt(key, now),
            Mode::OpenPrompt => self.handle_open_prompt(key, now),
            Mode::Help => self.handle_help(key, page),
            Mode::ConfirmQuit => return self.handle_confirm_quit(key, now),
        }
        false
    }

    /// Returns true when the app should exit.
    fn run_command(&mut self, command: Command, now: Instant) -> bool {
        if self.editor.apply(command, now) {
            return false;
        }
        match command {
            Command::Save => self.save(now),
            Command::Quit => return self.request_quit(),
            Command::CycleView => {
                self.view = self.view.next();
                self.toast.info(format!("View: {}", self.view.label()), now);
            }
            Command::Templates => {
                self.template_selected = 0;
                self.open_popup(Mode::TemplatePicker);
            }
            Command::Assist => {
                self.assist_selected = 0;
                self.open_popup(Mode::AssistMenu);
            }
            Command::Emoji => {
                self.emoji_category = 0;
                self.emoji_index = 0;
                self.open_popup(Mode::EmojiPicker);
            }
            Command::Table => {
                self.table_size = snippets::DEFAULT_TABLE_SIZE;
                self.open_popup(Mode::TableBuilder);
            }
            Command::Image => {
                self.input.clear();
                self.open_popup(Mode::ImagePrompt);
            }
            Command::CopyAll => self.copy_all(now),
            Command::ExportReadme => self.export_readme(now),
            Command::ExportHtml => self.export_html(now),
            Command::Themes => self.open_theme_picker(),
            Command::CycleAccent => {
                let name = self.prefs.cycle_accent();
                self.refresh_styles();
                self.toast.info(format!("Accent: {name}"), now);
            }
            Command::CycleFont => {
                let font = self.prefs.cycle_font();
                self.toast.info(format!("Export font: {font}"), now);
            }
            Command::Open => {
                self.input.clear();
                self.mode = Mode::OpenPrompt;
            }
            Command::Help => {
                self.help_selected = 0;
                self.mode = Mode::Help;
            }
            _ => {}
        }
        false
    }

    fn handle_edit_key(&mut self, key: KeyEvent, page: u16, now: Instant) -> bool {
        if let Some(command) = self.keymap.dispatch(&key) {
            return self.run_command(command, now);
        }
        if self.editor.find().visible {
            self.handle_find_key(key, now);
            return false;
        }
        if self.view == ViewMode::Preview {
            self.scroll_preview(key, page);
            return false;
        }

        let extend = key.modifiers.contains(KeyModifiers::SHIFT);
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let page = page as isize;
        match key.code {
            KeyCode::Left => self.editor.move_cursor(Motion::Left, extend),
            KeyCode::Right => self.editor.move_cursor(Motion::Right, extend),
            KeyCode::Up => self.editor.move_cursor(Motion::Up, extend),
            KeyCode::Down => self.editor.move_cursor(Motion::Down, extend),
            KeyCode::PageUp => self.editor.move_cursor(Motion::Lines(-page), extend),
            KeyCode::PageDown => self.editor.move_cursor(Motion::Lines(page), extend),
            KeyCode::Home if ctrl => self.editor.move_cursor(Motion::DocStart, extend),
            KeyCode::End if ctrl => self.editor.move_cursor(Motion::DocEnd, extend),
            KeyCode::Home => self.editor.move_cursor(Motion::LineStart, extend),
            KeyCode::End => self.editor.move_cursor(Motion::LineEnd, extend),
            KeyCode::Enter => self.editor.insert_text("\n", now),
            KeyCode::Tab => {
                let indent = " ".repeat(self.config.tab_width.max(1));
                self.editor.insert_text(&indent, now);
            }
            KeyCode::Backspace => self.editor.backspace(now),
            KeyCode::Delete => self.editor.delete(now),
            KeyCode::Esc => self.editor.collapse_selection(),
            KeyCode::Char(c) if !key.modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) => {
                let mut utf8 = [0u8; 4];
                self.editor.insert_text(c.encode_utf8(&mut utf8), now);
            }
            _ => {}
        }
        false
    }

    fn scroll_preview(&mut self, key: KeyEvent, page: u16) {
        let page = page as usize;
        match key.code {
            KeyCode::Up => self.preview_scroll = self.preview_scroll.saturating_sub(1),
            KeyCode::Down => self.preview_scroll += 1,
            KeyCode::PageUp => self.preview_scroll = self.preview_scroll.saturating_sub(page),
            KeyCode::PageDown => self.preview_scroll += page,
            KeyCode::Home => self.preview_scroll = 0,
            KeyCode::End => self.preview_scroll = usize::MAX,
            _ => {}
        }
    }

    fn handle_find_key(&mut self, key: KeyEvent, now: Instant) {
        let alt = key.modifiers.contains(KeyModifiers::ALT);
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Esc => self.editor.toggle_find(),
            KeyCode::Tab | KeyCode::BackTab => self.editor.switch_find_field(),
            KeyCode::Char('r') if alt => self.replace_next(now),
            KeyCode::Char('a') if alt => self.replace_all(now),
            KeyCode::Up => self.find_step(false, now),
            KeyCode::Down => self.find_step(true, now),
            KeyCode::Enter if key.modifiers.contains(KeyModifiers::SHIFT) => {
                self.find_step(false, now)
            }
            KeyCode::Enter => match self.editor.find().field {
                FindField::Needle => self.find_step(true, now),
                FindField::Replacement => self.replace_next(now),
            },
            KeyCode::Backspace => self.editor.find_input_pop(),
            KeyCode::Char(c) if !alt && !ctrl => self.editor.find_input_push(c),
            _ => {}
        }
    }

    fn find_step(&mut self, forward: bool, now: Instant) {
        let found = if forward {
            self.editor.find_next()
        } else {
            self.editor.find_prev()
        };
        if !found && !self.editor.find().needle.is_empty() {
            self.toast.info("No matches", now);
        }
    }

    fn replace_next(&mut self, now: Instant) {
        if self.editor.replace_next(now) {
            self.editor.find_next();
        } else {
            self.toast.info("No matches", now);
        }
    }

    fn replace_all(&mut self, now: Instant) {
        match self.editor.replace_all(now) {
            0 => self.toast.info("No matches", now),
            1 => self.toast.info("Replaced 1 match", now),
            n => self.toast.info(format!("Replaced {n} matches"), now),
        }
    }

    fn open_popup(&mut self, mode: Mode) {
        self.editor.capture_selection();
        self.mode = mode;
    }

    fn close_popup(&mut self) {
        self.editor.clear_saved_selection();
        self.input.clear();
        self.mode = Mode::Edit;
    }

    fn open_theme_picker(&mut self) {
        let current = &self.prefs.current().theme;
        self.theme_selected = self
            .theme_manager
            .theme_names()
            .iter()
            .position(|name| name == current)
            .unwrap_or(0);
        self.theme_preview = None;
        self.mode = Mode::ThemePicker;
    }

    fn handle_theme_picker(&mut self, key: KeyEvent, now: Instant) {
        let total = self.theme_manager.theme_names().len();
        if total == 0 {
            self.mode = Mode::Edit;
            return;
        }
        match key.code {
            KeyCode::Esc => {
                self.mode = Mode::Edit;
                if self.theme_preview.take().is_some() {
                    self.refresh_styles();
                }
            }
            KeyCode::Up => {
                if self.theme_selected > 0 {
                    self.theme_selected -= 1;
                    self.preview_theme_selection();
                }
            }
            KeyCode::Down => {
                if self.theme_selected + 1 < total {
                    self.theme_selected += 1;
                    self.preview_theme_selection();
                }
            }
            KeyCode::PageUp => {
                self.theme_selected = self.theme_selected.saturating_sub(10);
                self.preview_theme_selection();
            }
            KeyCode::PageDown => {
                self.theme_selected = (self.theme_selected + 10).min(total - 1);
                self.preview_theme_selection();
            }
            KeyCode::Enter => {
                if let Some(theme) = self.theme_manager.theme_names().get(self.theme_selected) {
                    let theme = theme.clone();
                    self.prefs.set_theme(&theme);
                    self.toast.info(format!("Theme: {theme}"), now);
                }
                self.theme_preview = None;
                self.refresh_styles();
                self.mode = Mode::Edit;
            }
            _ => {}
        }
    }

    fn preview_theme_selection(&mut self) {
        self.theme_preview = self
            .theme_manager
            .theme_names()
            .get(self.theme_selected)
            .cloned();
        self.refresh_styles();
    }

    fn effective_prefs(&self) -> UserPreferences {
        let mut prefs = self.prefs.current().clone();
        if let Some(theme) = &self.theme_preview {
            prefs.theme = theme.clone();
        }
        prefs
    }

    fn refresh_styles(&mut self) {
        let prefs = self.effective_prefs();
        self.palette = self.theme_manager.ui_palette(&prefs);
        self.preview_styles = self.palette.preview_styles();
        self.theme_name = prefs.theme;
        self.style_generation += 1;
    }

    fn handle_template_picker(&mut self, key: KeyEvent, now: Instant) {
        match key.code {
            KeyCode::Esc => self.close_popup(),
            KeyCode::Up => self.template_selected = self.template_selected.saturating_sub(1),
            KeyCode::Down => {
                self.template_selected = (self.template_selected + 1).min(TEMPLATES.len() - 1)
            }
            KeyCode::Enter => {
                if let Some(template) = TEMPLATES.get(self.template_selected) {
                    self.editor.replace_document(template.content, now);
                    self.edit_scroll = 0;
                    self.edit_hscroll = 0;
                    info!(target: "app", template = template.key, "template_loaded");
                    self.toast
                        .info(format!("Loaded template: {}", template.name), now);
                }
                self.close_popup();
            }
            _ => {}
        }
    }

    fn handle_emoji_picker(&mut self, key: KeyEvent, now: Instant) {
        let categories = EMOJI_CATEGORIES.len();
        let count = EMOJI_CATEGORIES[self.emoji_category].emojis.len();
        match key.code {
            KeyCode::Esc => self.close_popup(),
            KeyCode::Tab => {
                self.emoji_category = (self.emoji_category + 1) % categories;
                self.emoji_index = 0;
            }
            KeyCode::BackTab => {
                self.emoji_category = (self.emoji_category + categories - 1) % categories;
                self.emoji_index = 0;
            }
            KeyCode::Left => self.emoji_index = self.emoji_index.saturating_sub(1),
            KeyCode::Right => self.emoji_index = (self.emoji_index + 1).min(count.saturating_sub(1)),
            KeyCode::Up => self.emoji_index = self.emoji_index.saturating_sub(EMOJI_COLUMNS),
            KeyCode::Down => {
                self.emoji_index = (self.emoji_index + EMOJI_COLUMNS).min(count.saturating_sub(1))
            }
            KeyCode::Enter => {
                let category = &EMOJI_CATEGORIES[self.emoji_category];
                if let Some(emoji) = category.emojis.get(self.emoji_index) {
                    self.editor.insert_at_saved(emoji, now);
                }
                self.close_popup();
            }
            _ => {}
        }
    }

    fn handle_table_builder(&mut self, key: KeyEvent, now: Instant) {
        let (rows, cols) = self.table_size;
        match key.code {
            KeyCode::Esc => self.close_popup(),
            KeyCode::Up => self.table_size.0 = rows.saturating_sub(1).max(*TABLE_ROWS.start()),
            KeyCode::Down => self.table_size.0 = (rows + 1).min(*TABLE_ROWS.end()),
            KeyCode::Left => self.table_size.1 = cols.saturating_sub(1).max(*TABLE_COLS.start()),
            KeyCode::Right => self.table_size.1 = (cols + 1).min(*TABLE_COLS.end()),
            KeyCode::Enter => {
                self.editor
                    .insert_block_at_saved(&snippets::table_markdown(rows, cols), now);
                self.toast
                    .info(format!("Inserted {rows}x{cols} table"), now);
                self.close_popup();
            }
            _ => {}
        }
    }

    fn handle_assist_menu(&mut self, key: KeyEvent, now: Instant) {
        match key.code {
            KeyCode::Esc => self.close_popup(),
            KeyCode::Up => self.assist_selected = self.assist_selected.saturating_sub(1),
            KeyCode::Down => {
                self.assist_selected = (self.assist_selected + 1).min(Feature::ALL.len() - 1)
            }
            KeyCode::Tab => {
                self.input.clear();
                self.mode = Mode::ApiKeyInput;
            }
            KeyCode::Enter => {
                let feature = Feature::ALL[self.assist_selected];
                self.input.clear();
                if feature.requires_input() {
                    self.mode = Mode::AssistInput(feature);
                } else {
                    self.start_assist(feature, now);
                }
            }
            _ => {}
        }
    }

    fn handle_assist_input(&mut self, feature: Feature, key: KeyEvent, now: Instant) {
        match key.code {
            KeyCode::Esc => {
                self.input.clear();
                self.mode = Mode::AssistMenu;
            }
            KeyCode::Enter => self.start_assist(feature, now),
            _ => edit_field(&mut self.input, &key),
        }
    }

    /// Validates, then hands the request to a worker. The result lands in the
    /// selection captured when the menu opened.
    fn start_assist(&mut self, feature: Feature, now: Instant) {
        let api_key = self.storage.load_api_key();
        let target = self
            .editor
            .saved_selection()
            .unwrap_or_else(|| self.editor.buffer().selection());
        let selection = self.editor.saved_text();
        let document = self.editor.text().to_string();
        let input = PromptInput {
            user_input: &self.input,
            selection: &selection,
            document: &document,
        };

        let prepared = assist::prepare(feature, api_key.as_deref(), &input, target);
        match prepared {
            Ok(request) => {
                let client = GroqClient::new(api_key.unwrap_or_default(), self.config.assist.clone());
                assist::spawn(client, request, self.jobs_tx.clone());
                self.pending_jobs += 1;
                self.toast.info(format!("{}...", feature.title()), now);
                self.close_popup();
            }
            Err(AssistError::MissingApiKey) => {
                self.toast.error(AssistError::MissingApiKey.to_string(), now);
                self.input.clear();
                self.mode = Mode::ApiKeyInput;
            }
            Err(err @ AssistError::MissingSelection) => {
                self.toast.error(err.to_string(), now);
                self.close_popup();
            }
            Err(err) => self.toast.error(err.to_string(), now),
        }
    }

    fn handle_api_key_input(&mut self, key: KeyEvent, now: Instant) {
        match key.code {
            KeyCode::Esc => {
                self.input.clear();
                self.mode = Mode::AssistMenu;
            }
            KeyCode::Enter => {
                if self.input.trim().is_empty() {
                    self.toast.error("Please enter an API key", now);
                    return;
                }
                if self.storage.save_api_key(&self.input) {
                    self.toast.info("API key saved", now);
                } else {
                    self.toast.error("Failed to save API key", now);
                }
                self.input.clear();
                self.mode = Mode::AssistMenu;
            }
            _ => edit_field(&mut self.input, &key),
        }
    }

    fn handle_image_prompt(&mut self, key: KeyEvent, now: Instant) {
        match key.code {
            KeyCode::Esc => self.close_popup(),
            KeyCode::Enter => self.insert_image(now),
            _ => edit_field(&mut self.input, &key),
        }
    }

    fn insert_image(&mut self, now: Instant) {
        let source = self.input.trim().to_string();
        if source.is_empty() {
            self.toast.error("Please enter an image path or URL", now);
            return;
        }
        if image::is_url(&source) {
            self.editor
                .insert_at_saved(&ops::image_markdown(&source), now);
            self.close_popup();
            return;
        }

        match image::load_image(&expand_home(&source)) {
            Ok(loaded) => {
                let host = self
                    .config
                    .imgur_client_id
                    .as_ref()
                    .map(|id| Box::new(ImgurHost::new(id.clone())) as Box<dyn ImageHost>);
                let message = if host.is_some() {
                    "Uploading image..."
                } else {
                    "Embedding image..."
                };
                let target = self
                    .editor
                    .saved_selection()
                    .unwrap_or_else(|| self.editor.buffer().selection());
                image::spawn_upload(host, loaded, target, self.jobs_tx.clone());
                self.pending_jobs += 1;
                self.toast.info(message, now);
                self.close_popup();
            }
            Err(err) => self.toast.error(err.to_string(), now),
        }
    }

    fn handle_open_prompt(&mut self, key: KeyEvent, now: Instant) {
        match key.code {
            KeyCode::Esc => {
                self.input.clear();
                self.mode = Mode::Edit;
            }
            KeyCode::Enter => {
                let path = self.input.trim().to_string();
                if path.is_empty() {
                    self.toast.error("Please enter a file path", now);
                    return;
                }
                if self.open_document(expand_home(&path), now) {
                    self.input.clear();
                    self.mode = Mode::Edit;
                }
            }
            _ => edit_field(&mut self.input, &key),
        }
    }

    /// Replaces the session with `path`. Unsaved file edits block the switch;
    /// a dirty draft is autosaved first.
    fn open_document(&mut self, path: PathBuf, now: Instant) -> bool {
        self.editor.flush_history();
        if self.dirty {
            if matches!(self.document, Document::File(_)) {
                self.toast.error("Save changes first (Ctrl+S)", now);
                return false;
            }
            self.autosave();
        }

        let document = Document::File(path);
        let text = match document.load(&self.storage) {
            Ok(text) => text,
            Err(err) => {
                error!(target: "app", error = %format!("{err:#}"), "open_failed");
                self.toast.error(format!("Open failed: {err:#}"), now);
                return false;
            }
        };
        self.editor.reset(&text);
        self.document = document;
        self.seen_revision = self.editor.revision();
        self.dirty = false;
        self.autosave.cancel();
        self.edit_scroll = 0;
        self.edit_hscroll = 0;
        self.preview_scroll = 0;

        info!(
            target: "app",
            document = %self.document.label(),
            chars = self.editor.buffer().len_chars(),
            "document_opened"
        );
        self.toast
            .info(format!("Opened {}", self.document.label()), now);
        true
    }

    fn handle_help(&mut self, key: KeyEvent, page: u16) {
        let last = Command::all().count().saturating_sub(1);
        let page = (page as usize).max(1);
        match key.code {
            KeyCode::Esc | KeyCode::Enter => self.mode = Mode::Edit,
            KeyCode::Up => self.help_selected = self.help_selected.saturating_sub(1),
            KeyCode::Down => self.help_selected = (self.help_selected + 1).min(last),
            KeyCode::PageUp => self.help_selected = self.help_selected.saturating_sub(page),
            KeyCode::PageDown => self.help_selected = (self.help_selected + page).min(last),
            _ => {}
        }
    }

    fn handle_confirm_quit(&mut self, key: KeyEvent, now: Instant) -> bool {
        match key.code {
            KeyCode::Char('y') => return true,
            KeyCode::Char('s') => {
                self.save(now);
                if !self.dirty {
                    return true;
                }
                self.mode = Mode::Edit;
            }
            KeyCode::Char('n') | KeyCode::Esc => self.mode = Mode::Edit,
            _ => {}
        }
        false
    }

    fn request_quit(&mut self) -> bool {
        if self.dirty && matches!(self.document, Document::File(_)) {
            self.mode = Mode::ConfirmQuit;
            return false;
        }
        true
    }

    fn save(&mut self, now: Instant) {
        self.editor.flush_history();
        let text = self.editor.text().to_string();
        match &self.document {
            Document::File(path) => match write_document(path, &text) {
                Ok(()) => {
                    self.dirty = false;
                    info!(target: "app", path = %path.display(), "saved");
                    self.toast.info(format!("Saved {}", path.display()), now);
                }
                Err(err) => {
                    error!(target: "app", error = %format!("{err:#}"), "save_failed");
                    self.toast.error(format!("Save failed: {err:#}"), now);
                }
            },
            Document::Draft => {
                self.autosave.cancel();
                if self.storage.save_content(&text) {
                    self.dirty = false;
                    self.last_saved = self.storage.last_save_time();
                    self.toast.info("Draft saved", now);
                } else {
                    self.toast.error("Failed to save draft", now);
                }
            }
        }
    }

    fn copy_all(&mut self, now: Instant) {
        match export::copy_to_clipboard(&self.editor.text().to_string()) {
            Ok(()) => self.toast.info("Copied to clipboard!", now),
            Err(err) => {
                error!(target: "app", error = %format!("{err:#}"), "copy_failed");
                self.toast.error("Failed to copy", now);
            }
        }
    }

    fn export_readme(&mut self, now: Instant) {
        let result = self
            .document
            .export_dir()
            .and_then(|dir| export::write_readme(&dir, &self.editor.text().to_string()));
        self.report_export(result, now);
    }

    fn export_html(&mut self, now: Instant) {
        let prefs = self.prefs.current().clone();
        let result = self
            .document
            .export_dir()
            .and_then(|dir| export::write_html(&dir, &self.editor.text().to_string(), &prefs));
        self.report_export(result, now);
    }

    fn report_export(&mut self, result: Result<PathBuf>, now: Instant) {
        match result {
            Ok(path) => self.toast.info(format!("Exported {}", path.display()), now),
            Err(err) => {
                error!(target: "app", error = %format!("{err:#}"), "export_failed");
                self.toast.error(format!("Export failed: {err:#}"), now);
            }
        }
    }

    fn paste(&mut self, text: &str) {
        let now = Instant::now();
        match self.mode {
            Mode::Edit if self.editor.find().visible => {
                for ch in text.chars().filter(|c| !c.is_control()) {
                    self.editor.find_input_push(ch);
                }
            }
            Mode::Edit if self.view != ViewMode::Preview => {
                self.editor
                    .insert_text(&buffer::normalize_line_endings(text), now);
            }
            Mode::AssistInput(_) | Mode::ApiKeyInput | Mode::ImagePrompt | Mode::OpenPrompt => {
                self.input
                    .extend(text.chars().filter(|c| !c.is_control()));
            }
            _ => {}
        }
    }

    fn ensure_cursor_visible(&mut self, height: u16, width: u16) {
        let (line, _) = self.editor.buffer().line_col();
        self.edit_scroll = scroll_to_show(self.edit_scroll, line, height as usize);
        self.edit_hscroll = scroll_to_show(self.edit_hscroll, self.caret_column(), width as usize);
    }

    /// Display width of the caret's line up to the caret.
    fn caret_column(&self) -> usize {
        let (line, col) = self.editor.buffer().line_col();
        self.editor
            .text()
            .line(line)
            .chars()
            .take(col)
            .map(|ch| UnicodeWidthChar::width(ch).unwrap_or(0))
            .sum()
    }

    /// In split view the preview follows the caret proportionally.
    fn sync_preview_scroll(&mut self, height: u16) {
        let total = self.preview().lines.len();
        let max_scroll = total.saturating_sub(1);
        if self.view == ViewMode::Split {
            let (line, _) = self.editor.buffer().line_col();
            let source_lines = self.editor.text().len_lines().max(1);
            let target = line * total / source_lines;
            self.preview_scroll = target.saturating_sub(height as usize / 2);
        }
        self.preview_scroll = self.preview_scroll.min(max_scroll);
    }

    fn preview(&mut self) -> &Preview {
        let key = (self.editor.revision(), self.style_generation);
        if self.preview_key != Some(key) {
            let text = self.editor.text().to_string();
            let theme = self
                .theme_manager
                .get(&self.theme_name)
                .unwrap_or(&self.fallback_theme);
            self.preview = preview::render_lines(
                &text,
                &self.preview_styles,
                &self.syntax_set,
                theme,
                self.config.tab_width,
            );
            self.preview_key = Some(key);
        }
        &self.preview
    }

    fn ensure_editor_cache(&mut self) {
        let key = (self.editor.revision(), self.style_generation);
        if self.editor_key == Some(key) {
            return;
        }
        self.editor_lines = self.build_editor_cache();
        self.editor_key = Some(key);
    }

    fn build_editor_cache(&self) -> Vec<Line<'static>> {
        let base_style = self.palette.base_style();
        let theme = self
            .theme_manager
            .get(&self.theme_name)
            .unwrap_or(&self.fallback_theme);
        let syntax = self
            .syntax_set
            .find_syntax_by_extension("md")
            .or_else(|| self.syntax_set.find_syntax_by_token("Markdown"))
            .unwrap_or_else(|| self.syntax_set.find_syntax_plain_text());
        let mut highlighter = HighlightLines::new(syntax, theme);

        let mut lines = Vec::new();
        let mut code_fence: Option<&'static str> = None;
        let mut code_highlighter: Option<HighlightLines> = None;

        for line in self.editor.text().lines() {
            let line_str = line.to_string();
            let trimmed = line_str.trim_start();
            let fence = ["```", "~~~"]
                .into_iter()
                .find(|marker| trimmed.starts_with(marker));

            if let Some(marker) = fence {
                if code_fence == Some(marker) {
                    code_fence = None;
                    code_highlighter = None;
                } else if code_fence.is_none() {
                    code_fence = Some(marker);
                    let lang = trimmed[marker.len()..].trim();
                    let syntax = self
                        .syntax_set
                        .find_syntax_by_token(lang)
                        .filter(|_| !lang.is_empty())
                        .unwrap_or_else(|| self.syntax_set.find_syntax_plain_text());
                    code_highlighter = Some(HighlightLines::new(syntax, theme));
                }
                lines.push(self.highlight_line_with(&mut highlighter, &line_str, base_style));
                continue;
            }

            let line_widget = match code_highlighter.as_mut() {
                Some(code) => self.highlight_line_with(code, &line_str, base_style),
                None => self.highlight_line_with(&mut highlighter, &line_str, base_style),
            };
            lines.push(line_widget);
        }
        if lines.is_empty() {
            lines.push(Line::from(Span::styled("", base_style)));
        }
        lines
    }

    fn highlight_line_with(
        &self,
        highlighter: &mut HighlightLines,
        line: &str,
        base_style: Style,
    ) -> Line<'static> {
        let ranges = match highlighter.highlight_line(line, &self.syntax_set) {
            Ok(r) => r,
            Err(_) => vec![(syntect::highlighting::Style::default(), line)],
        };
        let mut spans = Vec::new();
        for (style, text) in ranges {
            let text = text.trim_end_matches(['\n', '\r']);
            if text.is_empty() {
                continue;
            }
            spans.push(Span::styled(
                text.to_string(),
                theme::highlight_style(style, self.palette.base_bg),
            ));
        }
        if spans.is_empty() {
            spans.push(Span::styled("", base_style));
        }
        Line::from(spans)
    }

    /// Visible editor lines with find matches and the selection painted on.
    fn editor_view(&mut self, height: usize) -> Text<'static> {
        self.ensure_editor_cache();
        let matches: Vec<Range<usize>> = if self.editor.find().visible {
            self.editor.matches().to_vec()
        } else {
            Vec::new()
        };
        let selection = self.editor.buffer().selection();
        let match_style = Style::default()
            .fg(self.palette.base_bg.unwrap_or(Color::Black))
            .bg(self.palette.accent);
        let selected_style = Style::default().add_modifier(Modifier::REVERSED);

        let rope = self.editor.text();
        let end = (self.edit_scroll + height)
            .min(self.editor_lines.len())
            .min(rope.len_lines());
        let mut lines = Vec::with_capacity(end.saturating_sub(self.edit_scroll));
        for idx in self.edit_scroll..end {
            let line_start = rope.line_to_char(idx);
            let line_end = line_start + buffer::line_len_chars(rope, idx);
            let local = |r: &Range<usize>| {
                let start = r.start.max(line_start);
                let end = r.end.min(line_end);
                (start < end).then(|| start - line_start..end - line_start)
            };

            let mut line = self.editor_lines[idx].clone();
            let hits: Vec<Range<usize>> = matches.iter().filter_map(local).collect();
            if !hits.is_empty() {
                line = patch_line(&line, &hits, match_style);
            }
            if let Some(range) = local(&selection.range()) {
                line = patch_line(&line, &[range], selected_style);
            }
            if self.edit_hscroll > 0 {
                line = skip_columns(&line, self.edit_hscroll);
            }
            lines.push(line);
        }
        Text::from(lines)
    }

    fn cursor_screen_position(&self, layout: &LayoutInfo) -> Option<(u16, u16)> {
        match self.mode {
            Mode::Edit if self.editor.find().visible => self.find_cursor_position(layout),
            Mode::Edit => self.edit_cursor_screen_position(layout),
            _ => None,
        }
    }

    fn edit_cursor_screen_position(&self, layout: &LayoutInfo) -> Option<(u16, u16)> {
        let editor = layout.editor?;
        let (line, _) = self.editor.buffer().line_col();
        if line < self.edit_scroll {
            return None;
        }
        let visible_line = line - self.edit_scroll;
        if visible_line >= layout.editor_height as usize {
            return None;
        }

        let width = self.caret_column().saturating_sub(self.edit_hscroll);
        let x = editor
            .x
            .saturating_add(1)
            .saturating_add(width.min(layout.editor_width as usize).try_into().ok()?);
        let y = editor
            .y
            .saturating_add(1)
            .saturating_add(visible_line.try_into().ok()?);
        Some((x, y))
    }

    fn find_cursor_position(&self, layout: &LayoutInfo) -> Option<(u16, u16)> {
        let area = layout.find?;
        let find = self.editor.find();
        let mut width = FIND_LABEL.width() + find.needle.width();
        if find.field == FindField::Replacement {
            width += REPLACE_LABEL.width() + find.replacement.width();
        }
        let x = area.x.saturating_add(width.try_into().ok()?);
        Some((x.min(area.right().saturating_sub(1)), area.y))
    }

    fn status_line(&self) -> Line<'static> {
        let muted = Style::default().fg(self.palette.muted);
        let accent = Style::default().fg(self.palette.accent);
        let base = self.palette.base_style();
        let sep = || Span::styled(" | ", muted);

        let mut parts = vec![Span::styled(
            "makeme",
            accent.add_modifier(Modifier::BOLD),
        )];
        parts.push(sep());
        parts.push(Span::styled(self.view.label(), accent));
        parts.push(sep());
        let label = self.document.label();
        let label = if self.dirty { format!("*{label}") } else { label };
        parts.push(Span::styled(label, base));
        if matches!(self.document, Document::Draft) {
            if self.autosave.is_pending() {
                parts.push(Span::styled(" (saving...)", muted));
            } else if let Some(saved) = self.last_saved {
                parts.push(Span::styled(format!(" (saved {})", saved_ago(saved)), muted));
            }
        }
        parts.push(sep());
        let history = self.editor.history();
        let marker = |on: bool| if on { base } else { muted };
        parts.push(Span::styled("↶", marker(history.can_undo())));
        parts.push(Span::raw(" "));
        parts.push(Span::styled("↷", marker(history.can_redo())));
        parts.push(sep());
        let (line, col) = self.editor.buffer().line_col();
        parts.push(Span::styled(format!("Ln {}, Col {}", line + 1, col + 1), muted));
        parts.push(sep());
        parts.push(Span::styled(format!("theme: {}", self.theme_name), muted));
        if self.pending_jobs > 0 {
            parts.push(sep());
            parts.push(Span::styled("working...", accent));
        }
        if let Some((kind, message)) = self.toast.current() {
            let style = match kind {
                ToastKind::Info => accent,
                ToastKind::Error => Style::default().fg(Color::Red),
            };
            parts.push(sep());
            parts.push(Span::styled(message.to_string(), style));
        }
        Line::from(parts)
    }

    fn find_line(&mut self) -> Line<'static> {
        let total = self.editor.match_count();
        let find = self.editor.find();
        let muted = Style::default().fg(self.palette.muted);
        let base = self.palette.base_style();
        let label = |field: FindField| {
            if find.field == field {
                Style::default()
                    .fg(self.palette.accent)
                    .add_modifier(Modifier::BOLD)
            } else {
                muted
            }
        };
        let current = find.current().map(|i| i + 1).unwrap_or(0);
        Line::from(vec![
            Span::styled(FIND_LABEL, label(FindField::Needle)),
            Span::styled(find.needle.clone(), base),
            Span::styled(REPLACE_LABEL, label(FindField::Replacement)),
            Span::styled(find.replacement.clone(), base),
            Span::styled(format!("  {current}/{total}"), muted),
            Span::styled(
                "  Enter next | Tab field | Alt+R replace | Alt+A all | Esc close",
                muted,
            ),
        ])
    }

    fn popup_block(&self, title: impl Into<String>) -> Block<'static> {
        Block::bordered()
            .title(title.into())
            .border_type(BorderType::Rounded)
            .border_style(Style::default().fg(self.palette.border))
            .style(self.palette.base_style())
    }
}

const FIND_LABEL: &str = " Find: ";
const REPLACE_LABEL: &str = "   Replace: ";

fn ui(f: &mut ratatui::Frame, app: &mut App, layout: &LayoutInfo) {
    let base_style = app.palette.base_style();
    let highlight_fg = app.palette.base_bg.unwrap_or(app.palette.base_fg);
    let highlight_style = Style::default().bg(app.palette.accent).fg(highlight_fg);
    let muted = Style::default().fg(app.palette.muted);

    f.render_widget(
        Paragraph::new(app.status_line())
            .style(base_style)
            .block(Block::default().style(base_style)),
        layout.status,
    );

    if let Some(find_area) = layout.find {
        f.render_widget(Paragraph::new(app.find_line()).style(base_style), find_area);
    }

    if let Some(editor_area) = layout.editor {
        let title = if app.dirty {
            format!(" *{} ", app.document.label())
        } else {
            format!(" {} ", app.document.label())
        };
        let editor_paragraph = Paragraph::new(app.editor_view(layout.editor_height as usize))
            .block(app.popup_block(title))
            .style(base_style);
        f.render_widget(editor_paragraph, editor_area);
    }

    if let Some(preview_area) = layout.preview {
        let wrap = app.config.wrap;
        let scroll = app.preview_scroll.min(u16::MAX as usize) as u16;
        let preview = app.preview();
        let title = match preview.title() {
            Some(title) => format!(" Preview: {title} "),
            None => " Preview ".to_string(),
        };
        let lines = preview.lines.clone();
        let mut paragraph = Paragraph::new(Text::from(lines))
            .block(app.popup_block(title))
            .style(base_style)
            .scroll((scroll, 0));
        if wrap {
            paragraph = paragraph.wrap(Wrap { trim: false });
        }
        f.render_widget(paragraph, preview_area);
    }

    match app.mode {
        Mode::Edit => {}
        Mode::ThemePicker => {
            let popup = centered_rect(60, 70, layout.main);
            f.render_widget(Clear, popup);
            let items: Vec<ListItem> = app
                .theme_manager
                .theme_names()
                .iter()
                .map(|name| ListItem::new(name.clone()))
                .collect();
            let mut state = ListState::default();
            state.select(Some(app.theme_selected));
            let list = List::new(items)
                .block(app.popup_block(" Themes "))
                .style(base_style)
                .highlight_style(highlight_style);
            f.render_stateful_widget(list, popup, &mut state);
        }
        Mode::TemplatePicker => {
            let popup = centered_rect(60, 50, layout.main);
            f.render_widget(Clear, popup);
            let items: Vec<ListItem> = TEMPLATES
                .iter()
                .map(|t| {
                    ListItem::new(Text::from(vec![
                        Line::from(Span::styled(t.name, base_style.add_modifier(Modifier::BOLD))),
                        Line::from(Span::styled(format!("  {}", t.description), muted)),
                    ]))
                })
                .collect();
            let mut state = ListState::default();
            state.select(Some(app.template_selected));
            let list = List::new(items)
                .block(app.popup_block(" Templates (replaces the document) "))
                .style(base_style)
                .highlight_style(highlight_style);
            f.render_stateful_widget(list, popup, &mut state);
        }
        Mode::AssistMenu => {
            let popup = centered_rect(60, 60, layout.main);
            f.render_widget(Clear, popup);
            let items: Vec<ListItem> = Feature::ALL
                .iter()
                .map(|feature| {
                    ListItem::new(Text::from(vec![
                        Line::from(format!("{} {}", feature.icon(), feature.title())),
                        Line::from(Span::styled(format!("   {}", feature.description()), muted)),
                    ]))
                })
                .collect();
            let mut state = ListState::default();
            state.select(Some(app.assist_selected));
            let key_state = if app.storage.load_api_key().is_some() {
                "set"
            } else {
                "missing"
            };
            let list = List::new(items)
                .block(app.popup_block(format!(" AI Assist | API key {key_state} (Tab) ")))
                .style(base_style)
                .highlight_style(highlight_style);
            f.render_stateful_widget(list, popup, &mut state);
        }
        Mode::AssistInput(feature) => {
            let prompt = feature.input_placeholder().unwrap_or_default();
            input_popup(f, app, layout, feature.title(), prompt, app.input.clone());
        }
        Mode::ApiKeyInput => {
            let masked = "*".repeat(app.input.chars().count());
            input_popup(
                f,
                app,
                layout,
                "API Key",
                "Groq API key, stored locally",
                masked,
            );
        }
        Mode::ImagePrompt => {
            input_popup(
                f,
                app,
                layout,
                "Insert Image",
                "Image file path or URL",
                app.input.clone(),
            );
        }
        Mode::EmojiPicker => {
            let popup = centered_rect(50, 50, layout.main);
            f.render_widget(Clear, popup);
            let mut lines = Vec::new();
            let tabs: Vec<Span> = EMOJI_CATEGORIES
                .iter()
                .enumerate()
                .flat_map(|(i, category)| {
                    let style = if i == app.emoji_category {
                        highlight_style
                    } else {
                        muted
                    };
                    [Span::styled(format!(" {} ", category.name), style), Span::raw(" ")]
                })
                .collect();
            lines.push(Line::from(tabs));
            lines.push(Line::default());
            let emojis = EMOJI_CATEGORIES[app.emoji_category].emojis;
            for (row, chunk) in emojis.chunks(EMOJI_COLUMNS).enumerate() {
                let spans: Vec<Span> = chunk
                    .iter()
                    .enumerate()
                    .map(|(col, emoji)| {
                        let style = if row * EMOJI_COLUMNS + col == app.emoji_index {
                            highlight_style
                        } else {
                            base_style
                        };
                        Span::styled(format!(" {emoji} "), style)
                    })
                    .collect();
                lines.push(Line::from(spans));
            }
            lines.push(Line::default());
            lines.push(Line::from(Span::styled(
                "Tab category | arrows move | Enter insert | Esc cancel",
                muted,
            )));
            f.render_widget(
                Paragraph::new(lines).block(app.popup_block(" Emoji ")),
                popup,
            );
        }
        Mode::TableBuilder => {
            let popup = centered_rect(40, 50, layout.main);
            f.render_widget(Clear, popup);
            let (rows, cols) = app.table_size;
            let mut lines = vec![
                Line::from(format!("Rows: {rows}   (Up/Down)")),
                Line::from(format!("Columns: {cols}   (Left/Right)")),
                Line::default(),
            ];
            for row in 0..rows {
                let cell = if row == 0 { "▣ " } else { "□ " };
                lines.push(Line::from(Span::styled(
                    cell.repeat(cols),
                    Style::default().fg(app.palette.accent),
                )));
            }
            lines.push(Line::default());
            lines.push(Line::from(Span::styled("Enter insert | Esc cancel", muted)));
            f.render_widget(
                Paragraph::new(lines).block(app.popup_block(" Table ")),
                popup,
            );
        }
        Mode::OpenPrompt => {
            input_popup(
                f,
                app,
                layout,
                "Open File",
                "Markdown file to edit",
                app.input.clone(),
            );
        }
        Mode::Help => {
            let popup = centered_rect(60, 70, layout.main);
            f.render_widget(Clear, popup);
            let items: Vec<ListItem> = app
                .keymap
                .help_rows()
                .into_iter()
                .map(|(command, chords)| {
                    let chords = if chords.is_empty() {
                        "unbound".to_string()
                    } else {
                        chords
                    };
                    ListItem::new(Line::from(vec![
                        Span::styled(format!("{:<16}", command.name()), base_style),
                        Span::styled(chords, muted),
                    ]))
                })
                .collect();
            let mut state = ListState::default();
            state.select(Some(app.help_selected));
            let list = List::new(items)
                .block(app.popup_block(" Keys | Esc close "))
                .style(base_style)
                .highlight_style(highlight_style);
            f.render_stateful_widget(list, popup, &mut state);
        }
        Mode::ConfirmQuit => {
            let popup = centered_rect(50, 20, layout.main);
            f.render_widget(Clear, popup);
            let lines = vec![
                Line::from("There are unsaved changes."),
                Line::default(),
                Line::from(Span::styled(
                    "[s] save and quit   [y] quit without saving   [n] cancel",
                    muted,
                )),
            ];
            f.render_widget(
                Paragraph::new(lines)
                    .wrap(Wrap { trim: true })
                    .block(app.popup_block(" Quit ")),
                popup,
            );
        }
    }

    if let Some((x, y)) = app.cursor_screen_position(layout) {
        f.set_cursor(x, y);
    }
}

fn input_popup(
    f: &mut ratatui::Frame,
    app: &App,
    layout: &LayoutInfo,
    title: &str,
    prompt: &str,
    value: String,
) {
    let popup = centered_rect(60, 25, layout.main);
    f.render_widget(Clear, popup);
    let muted = Style::default().fg(app.palette.muted);
    let value_width = value.width();
    let lines = vec![
        Line::from(Span::styled(prompt.to_string(), muted)),
        Line::default(),
        Line::from(vec![
            Span::styled("> ", Style::default().fg(app.palette.accent)),
            Span::raw(value),
        ]),
        Line::default(),
        Line::from(Span::styled("Enter confirm | Esc back", muted)),
    ];
    f.render_widget(
        Paragraph::new(lines).block(app.popup_block(format!(" {title} "))),
        popup,
    );
    let x = popup
        .x
        .saturating_add(3)
        .saturating_add(value_width.min(u16::MAX as usize) as u16)
        .min(popup.right().saturating_sub(2));
    f.set_cursor(x, popup.y.saturating_add(3));
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

/// Re-styles the chars of `line` that fall in `ranges` (line-relative char
/// offsets), splitting spans as needed.
fn patch_line(line: &Line<'static>, ranges: &[Range<usize>], patch: Style) -> Line<'static> {
    let mut spans = Vec::new();
    let mut col = 0usize;
    for span in &line.spans {
        let mut segment = String::new();
        let mut inside = false;
        for ch in span.content.chars() {
            let hit = ranges.iter().any(|r| r.contains(&col));
            if hit != inside && !segment.is_empty() {
                let style = if inside { span.style.patch(patch) } else { span.style };
                spans.push(Span::styled(std::mem::take(&mut segment), style));
            }
            inside = hit;
            segment.push(ch);
            col += 1;
        }
        if !segment.is_empty() {
            let style = if inside { span.style.patch(patch) } else { span.style };
            spans.push(Span::styled(segment, style));
        }
    }
    Line::from(spans)
}

/// The smallest move of `offset` that keeps `pos` inside a window of `span`.
fn scroll_to_show(offset: usize, pos: usize, span: usize) -> usize {
    let span = span.max(1);
    if pos < offset {
        pos
    } else if pos >= offset + span {
        pos + 1 - span
    } else {
        offset
    }
}

/// Drops the first `cols` display columns. A wide char split by the edge
/// leaves blanks for its visible half.
fn skip_columns(line: &Line<'static>, cols: usize) -> Line<'static> {
    let mut skipped = 0usize;
    let mut spans = Vec::with_capacity(line.spans.len());
    for span in &line.spans {
        if skipped >= cols {
            spans.push(span.clone());
            continue;
        }
        let mut kept = String::new();
        for ch in span.content.chars() {
            if skipped >= cols {
                kept.push(ch);
                continue;
            }
            skipped += UnicodeWidthChar::width(ch).unwrap_or(0);
            if skipped > cols {
                kept.extend(std::iter::repeat(' ').take(skipped - cols));
            }
        }
        if !kept.is_empty() {
            spans.push(Span::styled(kept, span.style));
        }
    }
    Line::from(spans)
}

/// Assist replies go in with the editor's line endings; blank replies are
/// rejected.
fn generated_text(reply: &str) -> Option<String> {
    if reply.trim().is_empty() {
        return None;
    }
    Some(buffer::normalize_line_endings(reply).into_owned())
}

/// Single-line text field editing for the popups.
fn edit_field(field: &mut String, key: &KeyEvent) {
    match key.code {
        KeyCode::Backspace => {
            field.pop();
        }
        KeyCode::Char(c) if !key.modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) => {
            field.push(c);
        }
        _ => {}
    }
}

/// Coarse age of a millisecond epoch timestamp.
fn saved_ago(saved_ms: u64) -> String {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(saved_ms);
    let secs = now_ms.saturating_sub(saved_ms) / 1000;
    match secs {
        0..=4 => "just now".to_string(),
        5..=59 => format!("{secs}s ago"),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86400),
    }
}

fn expand_home(input: &str) -> PathBuf {
    if let Some(rest) = input.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(input)
}

fn write_document(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_splits_spans_at_range_edges() {
        let line = Line::from(vec![Span::raw("hello "), Span::raw("world")]);
        let patched = patch_line(&line, &[4..8], Style::default().add_modifier(Modifier::REVERSED));
        let parts: Vec<(&str, bool)> = patched
            .spans
            .iter()
            .map(|s| (s.content.as_ref(), s.style.add_modifier.contains(Modifier::REVERSED)))
            .collect();
        assert_eq!(
            parts,
            vec![("hell", false), ("o ", true), ("wo", true), ("rld", false)]
        );
    }

    #[test]
    fn patch_without_ranges_keeps_text() {
        let line = Line::from("plain");
        let patched = patch_line(&line, &[], Style::default());
        assert_eq!(patched.spans.len(), 1);
        assert_eq!(patched.spans[0].content, "plain");
    }

    #[test]
    fn scroll_follows_the_caret_both_ways() {
        assert_eq!(scroll_to_show(0, 10, 80), 0);
        // caret past the right edge of an 80-column pane
        assert_eq!(scroll_to_show(0, 120, 80), 41);
        assert_eq!(scroll_to_show(41, 100, 80), 41);
        assert_eq!(scroll_to_show(41, 10, 80), 10);
        // end-of-line caret sits one past the last char and must stay visible
        assert_eq!(scroll_to_show(0, 80, 80), 1);
        assert_eq!(scroll_to_show(5, 7, 0), 7);
    }

    #[test]
    fn skipped_columns_keep_styles() {
        let bold = Style::default().add_modifier(Modifier::BOLD);
        let line = Line::from(vec![Span::raw("abc"), Span::styled("defg", bold)]);
        let shifted = skip_columns(&line, 4);
        let parts: Vec<(&str, Style)> = shifted
            .spans
            .iter()
            .map(|s| (s.content.as_ref(), s.style))
            .collect();
        assert_eq!(parts, vec![("efg", bold)]);
        assert_eq!(skip_columns(&line, 0).width(), 7);
        assert_eq!(skip_columns(&line, 9).width(), 0);
    }

    #[test]
    fn skipped_wide_char_leaves_blank() {
        let line = Line::from("日本語");
        let shifted = skip_columns(&line, 1);
        assert_eq!(shifted.spans[0].content, " 本語");
        assert_eq!(shifted.width(), 5);
    }

    #[test]
    fn assist_reply_uses_editor_line_endings() {
        assert_eq!(
            generated_text("## Usage\r\n\r\nRun it.\r\n").as_deref(),
            Some("## Usage\n\nRun it.\n")
        );
        assert_eq!(generated_text(" \r\n\t"), None);
    }

    #[test]
    fn save_age_is_coarse() {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        assert_eq!(saved_ago(now_ms), "just now");
        assert_eq!(saved_ago(now_ms - 90_000), "1m ago");
        assert_eq!(saved_ago(now_ms + 5_000), "just now");
    }

    #[test]
    fn home_is_expanded() {
        assert_eq!(expand_home("./logo.png"), PathBuf::from("./logo.png"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/logo.png"), home.join("logo.png"));
        }
    }

    #[test]
    fn edit_field_ignores_chords() {
        let mut field = String::from("ab");
        edit_field(&mut field, &KeyEvent::new(KeyCode::Char('c'), KeyModifiers::NONE));
        edit_field(&mut field, &KeyEvent::new(KeyCode::Char('x'), KeyModifiers::CONTROL));
        assert_eq!(field, "abc");
        edit_field(&mut field, &KeyEvent::new(KeyCode::Backspace, KeyModifiers::NONE));
        assert_eq!(field, "ab");
    }

    #[test]
    fn document_labels_and_export_dirs() {
        let doc = Document::File(PathBuf::from("docs/README.md"));
        assert_eq!(doc.label(), "README.md");
        assert_eq!(doc.export_dir().unwrap(), PathBuf::from("docs"));
        assert_eq!(Document::Draft.label(), "draft");
    }

    #[test]
    fn missing_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(crate::store::MemoryStore::default());
        let doc = Document::File(dir.path().join("NEW.md"));
        assert_eq!(doc.load(&storage).unwrap(), "");

        storage.save_content("# Draft\n");
        assert_eq!(Document::Draft.load(&storage).unwrap(), "# Draft\n");
    }

    #[test]
    fn write_document_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("README.md");
        write_document(&path, "# Hi\n").unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "# Hi\n");
    }
}
