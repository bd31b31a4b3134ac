use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Parser;
use crossterm::cursor;
use crossterm::event::{self, Event};
use crossterm::style::{Attribute, Print, SetAttribute};
use crossterm::terminal::{self, Clear, ClearType};
use directories::ProjectDirs;
use folio_core::{
    Action, ContainerBudget, DocumentLocation, FileStateStore, StateStore, Viewer, ViewerConfig,
    ViewerStatus,
};
use folio_render::PdfiumOpener;
use folio_tty::{
    composite, crop, place, write_status_line, EventMapper, Field, KittyRenderer, StatusLine,
    TerminalArea, UiEvent,
};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "folio", version, about = "kitty-native document viewer")]
struct Args {
    /// Page to open the document on (1-based)
    #[arg(short = 'p', long = "page")]
    page: Option<i64>,

    /// Initial zoom in percent
    #[arg(short = 'z', long = "zoom")]
    zoom: Option<i64>,

    /// Device pixel ratio used for rasterization
    #[arg(long = "dpr")]
    dpr: Option<f32>,

    /// Configuration file; defaults to config.toml in the platform config dir
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Path or file:// URL of the document to open
    source: String,
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, cursor::Show);
    }
}

enum LoopAction {
    Continue,
    RedrawStatus,
    Redraw,
    Quit,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "folio", "folio")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| project_dirs.config_dir().join("config.toml"));
    let mut config = ViewerConfig::load(&config_path)?;
    if let Some(dpr) = args.dpr {
        config.device_pixel_ratio = dpr;
    }

    let state_dir = project_dirs.data_local_dir().join("state");
    let store: Arc<dyn StateStore> = Arc::new(FileStateStore::new(state_dir)?);
    let opener = Arc::new(PdfiumOpener::new()?);
    let mut viewer = Viewer::new(opener, config).with_store(store);

    let location = DocumentLocation::parse(&args.source)?;
    if let Some(container) = terminal_container(viewer.config().device_pixel_ratio) {
        viewer.set_container(container);
    }
    match viewer.open(location).await {
        Ok(()) => {
            if let Some(page) = args.page {
                viewer.apply(Action::SetPage { page })?;
            }
            if let Some(percent) = args.zoom {
                viewer.apply(Action::SetZoom { percent })?;
            }
        }
        Err(err) => warn!(error = ?err, "initial load failed"),
    }

    let _raw = RawModeGuard::new()?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, cursor::Hide)?;
    let mut renderer = KittyRenderer::new(stdout);
    let mut event_mapper = EventMapper::new();
    let mut dirty = true;

    renderer.clear_all()?;

    loop {
        if dirty {
            if let Err(err) = viewer.refresh().await {
                warn!(error = ?err, "refresh failed");
            }
            let pending = event_mapper.pending_input();
            redraw(&mut renderer, &viewer, pending.as_deref())?;
            dirty = false;
        }

        if !event::poll(Duration::from_millis(100))? {
            continue;
        }
        let ev = event::read()?;
        if let Event::Resize(..) = ev {
            if let Some(container) = terminal_container(viewer.config().device_pixel_ratio) {
                viewer.set_container(container);
            }
            renderer.clear_all()?;
            dirty = true;
            continue;
        }

        let ui_event = event_mapper.map_event(ev);
        match handle_event(ui_event, &mut viewer).await? {
            LoopAction::Redraw => dirty = true,
            LoopAction::RedrawStatus => {
                let pending = event_mapper.pending_input();
                draw_status(&mut renderer, &viewer, pending.as_deref())?;
            }
            LoopAction::Continue => {}
            LoopAction::Quit => break,
        }
    }

    renderer.clear_all()?;

    if let Err(err) = viewer.persist() {
        warn!(error = ?err, "failed to persist view state");
    }
    Ok(())
}

async fn handle_event(event: UiEvent, viewer: &mut Viewer) -> Result<LoopAction> {
    let ready = matches!(viewer.status(), ViewerStatus::Ready);
    match event {
        UiEvent::Action(action) if ready => {
            viewer.apply(action)?;
            Ok(LoopAction::Redraw)
        }
        UiEvent::BeginEntry { .. } | UiEvent::EntryChanged { .. } | UiEvent::EntryCancel { .. } => {
            Ok(LoopAction::RedrawStatus)
        }
        UiEvent::EntryCommit { field, text } if ready => {
            match field {
                Field::Search => {
                    let hits = viewer.search(&text).await?;
                    info!(query = %text, hits, "search finished");
                }
                Field::Page => {
                    viewer.commit_page_field(&text)?;
                }
                Field::Zoom => {
                    viewer.commit_zoom_field(&text)?;
                }
            }
            Ok(LoopAction::Redraw)
        }
        UiEvent::Download => {
            match viewer.download_target().and_then(|l| l.download_target()) {
                Some(path) => {
                    if let Err(err) = open::that(path) {
                        warn!(?err, path = %path.display(), "failed to hand document to the system viewer");
                    }
                }
                None => warn!("document has no original file to open"),
            }
            Ok(LoopAction::Continue)
        }
        UiEvent::Retry if matches!(viewer.status(), ViewerStatus::Failed { .. }) => {
            if let Err(err) = viewer.retry().await {
                warn!(error = ?err, "retry failed");
            }
            Ok(LoopAction::Redraw)
        }
        UiEvent::Quit => Ok(LoopAction::Quit),
        _ => Ok(LoopAction::RedrawStatus),
    }
}

fn terminal_area() -> Result<TerminalArea> {
    let window = terminal::window_size()?;
    Ok(TerminalArea {
        columns: u32::from(window.columns),
        rows: u32::from(window.rows),
        pixel_width: u32::from(window.width),
        pixel_height: u32::from(window.height),
    })
}

/// The pixel area above the status line, in css pixels.
fn terminal_container(device_pixel_ratio: f32) -> Option<ContainerBudget> {
    let area = terminal_area().ok()?;
    if area.pixel_width == 0 || area.pixel_height == 0 || area.rows < 2 {
        return None;
    }
    let row_height = area.pixel_height as f32 / area.rows as f32;
    Some(ContainerBudget {
        width: area.pixel_width as f32 / device_pixel_ratio,
        height: (area.pixel_height as f32 - row_height) / device_pixel_ratio,
    })
}

fn redraw(
    renderer: &mut KittyRenderer<io::Stdout>,
    viewer: &Viewer,
    pending_input: Option<&str>,
) -> Result<()> {
    let area = terminal_area()?;
    renderer.begin_sync_update()?;

    match viewer.status() {
        ViewerStatus::Failed { message } => {
            renderer.delete_image()?;
            renderer.clear_all()?;
            let label = viewer
                .location()
                .map(|l| l.to_string())
                .unwrap_or_default();
            let writer = renderer.writer();
            print_line(writer, 1, &format!("Could not open {label}"))?;
            print_line(writer, 2, message)?;
            print_inverted(writer, 4, " r: retry   q: quit ")?;
        }
        ViewerStatus::Loading | ViewerStatus::Empty => {
            renderer.delete_image()?;
            renderer.clear_all()?;
            print_line(renderer.writer(), 1, "Loading...")?;
        }
        ViewerStatus::Ready => {
            let surface = viewer.surface();
            if !surface.is_blank() {
                let overlay = viewer.overlay_layer();
                let image = composite(surface.image(), overlay.as_ref());
                let placement = place(image.width, image.height, area);
                let visible = crop(
                    &image,
                    placement.crop_x,
                    placement.crop_y,
                    placement.crop_width,
                    placement.crop_height,
                );
                {
                    let writer = renderer.writer();
                    crossterm::execute!(
                        writer,
                        cursor::MoveTo(placement.start_col as u16, placement.start_row as u16)
                    )?;
                }
                renderer.draw(&visible, placement.params)?;
            } else if viewer.page_error().is_some() {
                renderer.delete_image()?;
            }
            draw_status(renderer, viewer, pending_input)?;
        }
    }

    renderer.end_sync_update()?;
    Ok(())
}

fn draw_status(
    renderer: &mut KittyRenderer<io::Stdout>,
    viewer: &Viewer,
    pending_input: Option<&str>,
) -> Result<()> {
    let Some(state) = viewer.state() else {
        return Ok(());
    };
    let label = viewer.location().map(|l| l.label()).unwrap_or_default();
    let counter = viewer.results_counter();
    let status = StatusLine {
        label: &label,
        current_page: state.current_page(),
        page_count: viewer.page_count(),
        zoom_percent: state.zoom_percent(),
        fit_mode: state.fit_mode(),
        search_term: state.search_term(),
        results_counter: &counter,
        match_count: state.search_matches().len(),
        error: viewer.page_error(),
        pending_input,
    }
    .to_string();

    let window = terminal::window_size()?;
    let status_row = window.rows.saturating_sub(1);
    let columns = usize::from(window.columns);
    let writer = renderer.writer();
    crossterm::execute!(
        writer,
        cursor::MoveTo(0, status_row),
        Clear(ClearType::CurrentLine)
    )?;
    write_status_line(writer, &truncate(&status, columns))?;
    Ok(())
}

fn print_line(writer: &mut impl Write, row: u16, content: &str) -> Result<()> {
    crossterm::execute!(writer, cursor::MoveTo(2, row), Print(content))?;
    Ok(())
}

fn print_inverted(writer: &mut impl Write, row: u16, content: &str) -> Result<()> {
    crossterm::execute!(
        writer,
        cursor::MoveTo(2, row),
        SetAttribute(Attribute::Reverse),
        Print(content),
        SetAttribute(Attribute::Reset)
    )?;
    Ok(())
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    if width <= 3 {
        return text.chars().take(width).collect();
    }
    let mut truncated: String = text.chars().take(width - 3).collect();
    truncated.push_str("...");
    truncated
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "folio.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Console output would scribble over the raw-mode screen.
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
