use std::fmt;
use std::io::{self, Write};

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use crossterm::{
    cursor,
    event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal::{Clear, ClearType},
};
use folio_core::{Action, FitMode, RasterImage};
use png::{BitDepth, ColorType, Encoder};

pub mod compose;

pub use compose::{composite, crop, place, Placement, TerminalArea};

pub struct KittyRenderer<W: Write> {
    writer: W,
    image_id: u32,
    placement_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawParams {
    pub columns: u32,
    pub rows: u32,
}

impl DrawParams {
    pub fn clamped(columns: u32, rows: u32) -> Self {
        Self {
            columns: columns.max(1),
            rows: rows.max(1),
        }
    }
}

impl<W: Write> KittyRenderer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            image_id: 1,
            placement_id: 1,
        }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Transmits `image` as PNG and places it at the cursor, replacing the
    /// previous placement.
    pub fn draw(&mut self, image: &RasterImage, params: DrawParams) -> Result<()> {
        let mut buffer = Vec::new();
        let mut encoder = Encoder::new(&mut buffer, image.width, image.height);
        encoder.set_color(ColorType::Rgba);
        encoder.set_depth(BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&image.pixels)?;
        writer.finish()?;

        let encoded = BASE64.encode(&buffer);
        let mut chunks = encoded.as_bytes().chunks(4096).peekable();
        let mut first = true;

        while let Some(chunk) = chunks.next() {
            let more = u8::from(chunks.peek().is_some());
            if first {
                write!(
                    self.writer,
                    "\u{1b}_Ga=T,f=100,C=1,q=2,i={},p={},c={},r={},s={},v={},z=-1,m={}",
                    self.image_id,
                    self.placement_id,
                    params.columns,
                    params.rows,
                    image.width,
                    image.height,
                    more
                )?;
                first = false;
            } else {
                write!(self.writer, "\u{1b}_Gm={},q=2", more)?;
            }
            if !chunk.is_empty() {
                self.writer.write_all(b";")?;
                self.writer.write_all(chunk)?;
            }
            write!(self.writer, "\u{1b}\\")?;
        }

        self.writer.flush()?;
        Ok(())
    }

    /// Removes the page image, e.g. while a load failure is shown.
    pub fn delete_image(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}_Ga=d,d=I,i={},q=2\u{1b}\\", self.image_id)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn begin_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026h")?;
        Ok(())
    }

    /// Ends a synchronized update; the terminal paints everything buffered since
    /// [`Self::begin_sync_update`] at once.
    pub fn end_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026l")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn clear_all(&mut self) -> Result<()> {
        crossterm::execute!(
            &mut self.writer,
            Clear(ClearType::All),
            cursor::MoveTo(0, 0)
        )?;
        Ok(())
    }
}

/// Text fields the status line can edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Search,
    Page,
    Zoom,
}

impl Field {
    fn prompt(self) -> &'static str {
        match self {
            Field::Search => "/",
            Field::Page => "page: ",
            Field::Zoom => "zoom %: ",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Action(Action),
    BeginEntry { field: Field },
    EntryChanged { field: Field, text: String },
    /// Enter or Tab: the field loses focus and its text is applied.
    EntryCommit { field: Field, text: String },
    EntryCancel { field: Field },
    Download,
    Retry,
    Quit,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Normal,
    Entry(Field),
}

#[derive(Debug, Default)]
pub struct EventMapper {
    pending_count: Option<usize>,
    pending_digits: String,
    mode: InputMode,
    buffer: String,
}

impl EventMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode(&mut self, mode: InputMode) {
        if self.mode != mode {
            self.reset_count();
            self.buffer.clear();
            self.mode = mode;
        }
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        let Event::Key(key) = event else {
            return UiEvent::None;
        };
        if key.kind == KeyEventKind::Release {
            return UiEvent::None;
        }
        match self.mode {
            InputMode::Normal => self.map_key_normal(key),
            InputMode::Entry(field) => self.map_key_entry(field, key),
        }
    }

    fn map_key_normal(&mut self, KeyEvent { code, modifiers, .. }: KeyEvent) -> UiEvent {
        let plain = modifiers.is_empty() || modifiers == KeyModifiers::SHIFT;
        if !plain {
            self.reset_count();
            return UiEvent::None;
        }
        match code {
            KeyCode::Char(c) if c.is_ascii_digit() => {
                if let Some(digit) = c.to_digit(10) {
                    self.push_digit(digit as usize);
                }
                UiEvent::None
            }
            KeyCode::Char('j') | KeyCode::Down | KeyCode::PageDown | KeyCode::Char(' ') => {
                let count = self.take_count();
                UiEvent::Action(Action::NextPage { count })
            }
            KeyCode::Char('k') | KeyCode::Up | KeyCode::PageUp => {
                let count = self.take_count();
                UiEvent::Action(Action::PrevPage { count })
            }
            KeyCode::Char('G') | KeyCode::End => {
                let page = self.pending_count.take().map(|p| p as i64).unwrap_or(i64::MAX);
                self.reset_count();
                UiEvent::Action(Action::SetPage { page })
            }
            KeyCode::Home => self.action(Action::SetPage { page: 1 }),
            KeyCode::Char('+') | KeyCode::Char('=') => self.action(Action::ZoomIn),
            KeyCode::Char('-') => self.action(Action::ZoomOut),
            KeyCode::Char('f') => self.action(Action::ToggleFitMode),
            KeyCode::Char('w') => self.action(Action::FitToWidth),
            KeyCode::Char('p') => self.action(Action::FitToPage),
            KeyCode::Char('n') => self.action(Action::NextMatch),
            KeyCode::Char('N') => self.action(Action::PrevMatch),
            KeyCode::Esc => self.action(Action::ClearSearch),
            KeyCode::Char('/') => self.begin_entry(Field::Search),
            KeyCode::Char('g') => self.begin_entry(Field::Page),
            KeyCode::Char('z') => self.begin_entry(Field::Zoom),
            KeyCode::Char('o') => {
                self.reset_count();
                UiEvent::Download
            }
            KeyCode::Char('r') => {
                self.reset_count();
                UiEvent::Retry
            }
            KeyCode::Char('q') => {
                self.reset_count();
                UiEvent::Quit
            }
            _ => {
                self.reset_count();
                UiEvent::None
            }
        }
    }

    fn map_key_entry(&mut self, field: Field, KeyEvent { code, modifiers, .. }: KeyEvent) -> UiEvent {
        match code {
            KeyCode::Esc => {
                self.set_mode(InputMode::Normal);
                UiEvent::EntryCancel { field }
            }
            KeyCode::Enter | KeyCode::Tab => {
                let text = std::mem::take(&mut self.buffer);
                self.set_mode(InputMode::Normal);
                UiEvent::EntryCommit { field, text }
            }
            KeyCode::Backspace => {
                self.buffer.pop();
                UiEvent::EntryChanged {
                    field,
                    text: self.buffer.clone(),
                }
            }
            KeyCode::Char(c) if modifiers.is_empty() || modifiers == KeyModifiers::SHIFT => {
                self.buffer.push(c);
                UiEvent::EntryChanged {
                    field,
                    text: self.buffer.clone(),
                }
            }
            _ => UiEvent::None,
        }
    }

    fn action(&mut self, action: Action) -> UiEvent {
        self.reset_count();
        UiEvent::Action(action)
    }

    fn begin_entry(&mut self, field: Field) -> UiEvent {
        self.set_mode(InputMode::Entry(field));
        UiEvent::BeginEntry { field }
    }

    fn push_digit(&mut self, digit: usize) {
        let current = self.pending_count.unwrap_or(0);
        let next = current.saturating_mul(10).saturating_add(digit);
        self.pending_count = Some(next);
        if let Some(c) = char::from_digit(digit as u32, 10) {
            self.pending_digits.push(c);
        }
    }

    fn take_count(&mut self) -> usize {
        let count = self
            .pending_count
            .take()
            .filter(|&count| count > 0)
            .unwrap_or(1);
        self.pending_digits.clear();
        count
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }

    /// What the user is typing: a count prefix, or the prompt and text of
    /// the field being edited.
    pub fn pending_input(&self) -> Option<String> {
        if let InputMode::Entry(field) = self.mode {
            return Some(format!("{}{}", field.prompt(), self.buffer));
        }
        if self.pending_digits.is_empty() {
            None
        } else {
            Some(self.pending_digits.clone())
        }
    }
}

/// One-line summary shown under the page.
#[derive(Debug, Clone, Copy)]
pub struct StatusLine<'a> {
    pub label: &'a str,
    pub current_page: usize,
    pub page_count: usize,
    pub zoom_percent: u32,
    pub fit_mode: FitMode,
    pub search_term: &'a str,
    pub results_counter: &'a str,
    pub match_count: usize,
    pub error: Option<&'a str>,
    pub pending_input: Option<&'a str>,
}

impl fmt::Display for StatusLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | page {}/{} | {}%",
            self.label, self.current_page, self.page_count, self.zoom_percent
        )?;
        if self.fit_mode != FitMode::None {
            write!(f, " | {}", self.fit_mode.label())?;
        }
        if !self.search_term.is_empty() {
            if self.match_count == 0 {
                write!(f, " | /{} (no matches)", self.search_term)?;
            } else {
                write!(f, " | /{} ({})", self.search_term, self.results_counter)?;
            }
        }
        if let Some(error) = self.error {
            write!(f, " | error: {error}")?;
        }
        if let Some(pending) = self.pending_input.filter(|s| !s.is_empty()) {
            write!(f, " | {pending}")?;
        }
        Ok(())
    }
}

pub fn write_status_line<W: Write>(writer: &mut W, label: &str) -> io::Result<()> {
    write!(writer, "{}", label)?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyEventState;

    #[test]
    fn kitty_draw_emits_protocol() {
        let mut renderer = KittyRenderer::new(Vec::new());
        let image = RasterImage {
            width: 1,
            height: 1,
            pixels: vec![255, 0, 0, 255],
        };

        renderer.draw(&image, DrawParams::clamped(10, 5)).unwrap();
        let output = renderer.writer;
        assert_eq!(output[0], 0x1b);
        assert_eq!(output[1], b'_');
        assert_eq!(output[2], b'G');
        let text = String::from_utf8_lossy(&output);
        assert!(text.contains("c=10,r=5,s=1,v=1"));
        assert!(text.ends_with("\u{1b}\\"));
    }

    fn key_event(code: KeyCode) -> Event {
        key_event_with_modifiers(code, KeyModifiers::NONE)
    }

    fn key_event_with_modifiers(code: KeyCode, modifiers: KeyModifiers) -> Event {
        Event::Key(KeyEvent {
            code,
            modifiers,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        })
    }

    fn type_text(mapper: &mut EventMapper, text: &str) {
        for c in text.chars() {
            mapper.map_event(key_event(KeyCode::Char(c)));
        }
    }

    #[test]
    fn event_mapper_uses_numeric_prefix_for_next_page() {
        let mut mapper = EventMapper::new();
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('1'))), UiEvent::None);
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('2'))), UiEvent::None);
        assert_eq!(mapper.pending_input().as_deref(), Some("12"));

        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('j'))),
            UiEvent::Action(Action::NextPage { count: 12 })
        );
        assert!(mapper.pending_input().is_none());
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('k'))),
            UiEvent::Action(Action::PrevPage { count: 1 })
        );
    }

    #[test]
    fn event_mapper_drops_prefix_on_other_keys() {
        let mut mapper = EventMapper::new();
        mapper.map_event(key_event(KeyCode::Char('4')));
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('+'))),
            UiEvent::Action(Action::ZoomIn)
        );
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('j'))),
            UiEvent::Action(Action::NextPage { count: 1 })
        );
    }

    #[test]
    fn event_mapper_count_before_capital_g_jumps_to_page() {
        let mut mapper = EventMapper::new();
        type_text(&mut mapper, "7");
        assert_eq!(
            mapper.map_event(key_event_with_modifiers(
                KeyCode::Char('G'),
                KeyModifiers::SHIFT
            )),
            UiEvent::Action(Action::SetPage { page: 7 })
        );
        assert_eq!(
            mapper.map_event(key_event(KeyCode::End)),
            UiEvent::Action(Action::SetPage { page: i64::MAX })
        );
    }

    #[test]
    fn event_mapper_maps_view_shortcuts() {
        let mut mapper = EventMapper::new();
        let cases = [
            ('-', Action::ZoomOut),
            ('f', Action::ToggleFitMode),
            ('w', Action::FitToWidth),
            ('p', Action::FitToPage),
            ('n', Action::NextMatch),
        ];
        for (key, action) in cases {
            assert_eq!(
                mapper.map_event(key_event(KeyCode::Char(key))),
                UiEvent::Action(action)
            );
        }
        assert_eq!(
            mapper.map_event(key_event_with_modifiers(
                KeyCode::Char('N'),
                KeyModifiers::SHIFT
            )),
            UiEvent::Action(Action::PrevMatch)
        );
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Esc)),
            UiEvent::Action(Action::ClearSearch)
        );
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('o'))), UiEvent::Download);
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('r'))), UiEvent::Retry);
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('q'))), UiEvent::Quit);
    }

    #[test]
    fn event_mapper_ignores_control_chords() {
        let mut mapper = EventMapper::new();
        assert_eq!(
            mapper.map_event(key_event_with_modifiers(
                KeyCode::Char('j'),
                KeyModifiers::CONTROL
            )),
            UiEvent::None
        );
    }

    #[test]
    fn slash_collects_search_text_until_enter() {
        let mut mapper = EventMapper::new();
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('/'))),
            UiEvent::BeginEntry {
                field: Field::Search
            }
        );
        assert_eq!(mapper.pending_input().as_deref(), Some("/"));

        type_text(&mut mapper, "tokx");
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Backspace)),
            UiEvent::EntryChanged {
                field: Field::Search,
                text: "tok".to_string()
            }
        );
        type_text(&mut mapper, "yo");
        assert_eq!(mapper.pending_input().as_deref(), Some("/tokyo"));

        assert_eq!(
            mapper.map_event(key_event(KeyCode::Enter)),
            UiEvent::EntryCommit {
                field: Field::Search,
                text: "tokyo".to_string()
            }
        );
        assert_eq!(mapper.mode(), InputMode::Normal);
        assert!(mapper.pending_input().is_none());
    }

    #[test]
    fn tab_commits_and_escape_cancels_fields() {
        let mut mapper = EventMapper::new();
        mapper.map_event(key_event(KeyCode::Char('g')));
        type_text(&mut mapper, "12");
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Tab)),
            UiEvent::EntryCommit {
                field: Field::Page,
                text: "12".to_string()
            }
        );

        mapper.map_event(key_event(KeyCode::Char('z')));
        assert_eq!(mapper.pending_input().as_deref(), Some("zoom %: "));
        type_text(&mut mapper, "150");
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Esc)),
            UiEvent::EntryCancel { field: Field::Zoom }
        );
        assert!(mapper.pending_input().is_none());
    }

    #[test]
    fn letters_typed_into_a_field_are_not_shortcuts() {
        let mut mapper = EventMapper::new();
        mapper.map_event(key_event(KeyCode::Char('/')));
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('q'))),
            UiEvent::EntryChanged {
                field: Field::Search,
                text: "q".to_string()
            }
        );
    }

    fn status() -> StatusLine<'static> {
        StatusLine {
            label: "atlas.pdf",
            current_page: 2,
            page_count: 6,
            zoom_percent: 125,
            fit_mode: FitMode::None,
            search_term: "",
            results_counter: "0/0",
            match_count: 0,
            error: None,
            pending_input: None,
        }
    }

    #[test]
    fn status_line_shows_position_and_zoom() {
        assert_eq!(status().to_string(), "atlas.pdf | page 2/6 | 125%");
    }

    #[test]
    fn status_line_shows_search_results_and_errors() {
        let line = StatusLine {
            fit_mode: FitMode::Width,
            search_term: "tokyo",
            results_counter: "1/2",
            match_count: 2,
            error: Some("cannot display page 2"),
            ..status()
        };
        assert_eq!(
            line.to_string(),
            "atlas.pdf | page 2/6 | 125% | fit width | /tokyo (1/2) | error: cannot display page 2"
        );

        let empty = StatusLine {
            search_term: "osaka",
            ..status()
        };
        assert!(empty.to_string().ends_with("/osaka (no matches)"));
    }
}
