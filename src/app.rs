//! Interactive viewer: one carve tick per redraw, keyboard commands applied
//! between ticks.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, error, info, warn};
use wgpu::{self, SurfaceError};
use winit::{
    application::ApplicationHandler,
    event::{ElementState, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{Key, ModifiersState, NamedKey},
    window::{Window, WindowAttributes},
};

use crate::carve::{CarveSession, CarveState, CarveStats, Dimensions, GpuSeamEngine};
use crate::config::Configuration;
use crate::display::{DisplayOptions, DisplayPass};
use crate::error::CarveError;
use crate::events::{CarveCommand, DebugView, TickInput};
use crate::export;
use crate::gpu::GpuContext;
use crate::loader::{DecodeResult, LoaderMsg, spawn_loader};

const SHIFT_STEP_MULTIPLIER: i64 = 10;

/// Translate a key press into a command. `output` is where `Ctrl+S` saves.
pub fn command_for_key(
    key: &Key,
    modifiers: ModifiersState,
    step: u32,
    output: &Path,
) -> Option<CarveCommand> {
    let step = if modifiers.shift_key() {
        i64::from(step) * SHIFT_STEP_MULTIPLIER
    } else {
        i64::from(step)
    };
    let adjust = |width, height| Some(CarveCommand::AdjustTarget { width, height });
    match key {
        Key::Named(NamedKey::ArrowLeft) => adjust(-step, 0),
        Key::Named(NamedKey::ArrowRight) => adjust(step, 0),
        Key::Named(NamedKey::ArrowDown) => adjust(0, -step),
        Key::Named(NamedKey::ArrowUp) => adjust(0, step),
        Key::Named(NamedKey::Enter) => Some(CarveCommand::Carve),
        Key::Named(NamedKey::Escape) => Some(CarveCommand::Quit),
        Key::Character(text) => match text.to_lowercase().as_str() {
            "s" if modifiers.control_key() => Some(CarveCommand::Save(output.to_path_buf())),
            "s" => Some(CarveCommand::ToggleSeam),
            "r" => Some(CarveCommand::Reset),
            "e" => Some(CarveCommand::CycleView),
            "v" => Some(CarveCommand::ToggleVsync),
            "q" => Some(CarveCommand::Quit),
            _ => None,
        },
        _ => None,
    }
}

/// Window title: file, sizes, carve state, timing and the last message.
fn status_line(
    name: Option<&str>,
    sizes: Option<(Dimensions, Dimensions, Dimensions)>,
    state: CarveState,
    stats: &CarveStats,
    message: Option<&str>,
) -> String {
    let mut title = String::from("seam-carver");
    if let Some(name) = name {
        title.push_str(" | ");
        title.push_str(name);
    }
    match sizes {
        Some((original, current, target)) => {
            title.push_str(&format!(" | {original} -> {current} (target {target})"));
        }
        None => title.push_str(" | drop an image to begin"),
    }
    if state == CarveState::Carving {
        title.push_str(" | carving");
    }
    if stats.seams() > 0 {
        title.push_str(&format!(
            " | {} seams, gpu {:.1} ms",
            stats.seams(),
            stats.gpu_time.as_secs_f64() * 1000.0
        ));
        if let Some(avg) = stats.average_seam_time() {
            title.push_str(&format!(", {:.3} ms/seam", avg.as_secs_f64() * 1000.0));
        }
        if let Some(history) = stats.history_summary() {
            title.push_str(&format!(
                " (tick min {:.2} / max {:.2} / last {:.2} ms)",
                history.min_ms, history.max_ms, history.last_ms
            ));
        }
    }
    if let Some(message) = message {
        title.push_str(" | ");
        title.push_str(message);
    }
    title
}

fn present_mode(vsync: bool) -> wgpu::PresentMode {
    if vsync {
        wgpu::PresentMode::AutoVsync
    } else {
        wgpu::PresentMode::AutoNoVsync
    }
}

struct CarveApp {
    cfg: Configuration,
    output: PathBuf,
    initial: Option<PathBuf>,
    window: Option<Arc<Window>>,
    surface: Option<wgpu::Surface<'static>>,
    surface_config: Option<wgpu::SurfaceConfiguration>,
    session: Option<CarveSession<GpuSeamEngine>>,
    display: Option<DisplayPass>,
    view: DebugView,
    show_seam: bool,
    vsync: bool,
    modifiers: ModifiersState,
    /// Commands gathered since the last tick; drained every tick.
    commands: Vec<CarveCommand>,
    to_loader: Sender<LoaderMsg>,
    from_loader: Receiver<DecodeResult>,
    decodes_pending: usize,
    image_name: Option<String>,
    message: Option<String>,
    last_tick: Instant,
    fatal: Option<anyhow::Error>,
}

impl CarveApp {
    fn new(
        cfg: Configuration,
        initial: Option<PathBuf>,
        output: PathBuf,
        to_loader: Sender<LoaderMsg>,
        from_loader: Receiver<DecodeResult>,
    ) -> Self {
        Self {
            show_seam: cfg.show_seam,
            vsync: cfg.vsync,
            cfg,
            output,
            initial,
            window: None,
            surface: None,
            surface_config: None,
            session: None,
            display: None,
            view: DebugView::default(),
            modifiers: ModifiersState::empty(),
            commands: Vec::new(),
            to_loader,
            from_loader,
            decodes_pending: 0,
            image_name: None,
            message: None,
            last_tick: Instant::now(),
            fatal: None,
        }
    }

    fn ensure_window(&mut self, event_loop: &ActiveEventLoop) -> Option<Arc<Window>> {
        if let Some(window) = self.window.as_ref() {
            return Some(window.clone());
        }

        let attrs = WindowAttributes::default()
            .with_title("seam-carver")
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.cfg.window_width,
                self.cfg.window_height,
            ));
        match event_loop.create_window(attrs) {
            Ok(window) => {
                let window = Arc::new(window);
                self.window = Some(window.clone());
                Some(window)
            }
            Err(err) => {
                error!(error = %err, "failed to create window");
                None
            }
        }
    }

    fn init_gpu(&mut self, window: Arc<Window>) -> Result<()> {
        let instance = wgpu::Instance::default();
        let surface = instance
            .create_surface(window.clone())
            .context("failed to create surface")?;
        let gpu = Arc::new(GpuContext::new(instance, Some(&surface))?);

        let caps = surface.get_capabilities(&gpu.adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|fmt| fmt.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or_else(|| anyhow!("surface reports no formats"))?;

        let size = window.inner_size();
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: present_mode(self.vsync),
            alpha_mode: caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&gpu.device, &config);
        info!(
            width = config.width,
            height = config.height,
            format = ?config.format,
            "surface configured",
        );

        let engine = GpuSeamEngine::new(gpu.clone(), self.cfg.max_image_size, self.cfg.gpu_timing)?;
        let display = DisplayPass::new(&gpu.device, format, &engine);

        self.surface = Some(surface);
        self.surface_config = Some(config);
        self.display = Some(display);
        self.session = Some(CarveSession::new(
            engine,
            self.cfg.timing_history_capacity(),
        ));
        if let Some(path) = self.initial.take() {
            self.commands.push(CarveCommand::Load(path));
        }
        Ok(())
    }

    fn handle_resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        let (Some(surface), Some(config), Some(session)) = (
            self.surface.as_ref(),
            self.surface_config.as_mut(),
            self.session.as_ref(),
        ) else {
            return;
        };
        config.width = new_size.width.max(1);
        config.height = new_size.height.max(1);
        surface.configure(&session.engine().gpu().device, config);
        debug!(width = config.width, height = config.height, "surface resized");
        self.request_redraw();
    }

    fn set_vsync(&mut self, vsync: bool) {
        self.vsync = vsync;
        let (Some(surface), Some(config), Some(session)) = (
            self.surface.as_ref(),
            self.surface_config.as_mut(),
            self.session.as_ref(),
        ) else {
            return;
        };
        config.present_mode = present_mode(vsync);
        surface.configure(&session.engine().gpu().device, config);
        info!(vsync, "present mode changed");
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!(error = ?err, "fatal gpu error");
        self.fatal = Some(err);
        event_loop.exit();
    }

    /// Route a session error: GPU failures end the run, anything else is
    /// shown to the user and carving continues.
    fn report(&mut self, event_loop: &ActiveEventLoop, err: CarveError) {
        match err {
            CarveError::Gpu(err) => self.fail(event_loop, err),
            other => {
                warn!(error = %other, "request failed");
                self.message = Some(other.to_string());
            }
        }
    }

    fn apply(&mut self, event_loop: &ActiveEventLoop, command: CarveCommand) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let carving = session.state() == CarveState::Carving;
        let result = match command {
            CarveCommand::AdjustTarget { .. } | CarveCommand::Carve if carving => {
                debug!(?command, "ignored while carving");
                Ok(())
            }
            CarveCommand::Load(path) => {
                info!(path = %path.display(), "loading");
                if self.to_loader.send(LoaderMsg::Decode(path)).is_ok() {
                    self.decodes_pending += 1;
                }
                Ok(())
            }
            CarveCommand::Save(path) => session
                .snapshot()
                .and_then(|image| export::save(&image, &path, self.cfg.jpeg_quality))
                .map(|()| self.message = Some(format!("saved {}", path.display()))),
            CarveCommand::AdjustTarget { width, height } => {
                session.adjust_target(width, height).map(drop)
            }
            CarveCommand::Carve => session.start_carve(),
            CarveCommand::Reset => session.reset(),
            CarveCommand::ToggleSeam => {
                self.show_seam = !self.show_seam;
                Ok(())
            }
            CarveCommand::CycleView => {
                self.view = self.view.next();
                Ok(())
            }
            CarveCommand::ToggleVsync => {
                self.set_vsync(!self.vsync);
                Ok(())
            }
            CarveCommand::Quit => {
                info!("quit requested");
                event_loop.exit();
                Ok(())
            }
        };
        if let Err(err) = result {
            self.report(event_loop, err);
        }
    }

    fn receive_decoded(&mut self, event_loop: &ActiveEventLoop) {
        while let Ok(result) = self.from_loader.try_recv() {
            self.decodes_pending = self.decodes_pending.saturating_sub(1);
            let Some(session) = self.session.as_mut() else {
                return;
            };
            let loaded = result.and_then(|decoded| {
                session.load(&decoded.image)?;
                Ok(decoded.name)
            });
            match loaded {
                Ok(name) => {
                    self.image_name = Some(name);
                    self.message = None;
                }
                Err(err) => self.report(event_loop, err),
            }
        }
    }

    fn tick(&mut self, event_loop: &ActiveEventLoop) {
        self.receive_decoded(event_loop);

        let mut commands = std::mem::take(&mut self.commands);
        for command in commands.drain(..) {
            self.apply(event_loop, command);
        }
        self.commands = commands;

        let now = Instant::now();
        let elapsed = now - self.last_tick;
        self.last_tick = now;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Err(err) = session.tick(TickInput { elapsed }) {
            self.report(event_loop, err);
        }
    }

    fn update_title(&self) {
        let (Some(window), Some(session)) = (self.window.as_ref(), self.session.as_ref()) else {
            return;
        };
        let sizes = session
            .original_size()
            .zip(session.current_size())
            .zip(session.target_size())
            .map(|((original, current), target)| (original, current, target));
        window.set_title(&status_line(
            self.image_name.as_deref(),
            sizes,
            session.state(),
            session.stats(),
            self.message.as_deref(),
        ));
    }

    fn draw(&mut self, event_loop: &ActiveEventLoop) {
        if let (DebugView::Energy, Some(session)) = (self.view, self.session.as_mut()) {
            if let Some(size) = session.current_size() {
                session.engine_mut().sync_energy(size);
            }
        }

        let (Some(surface), Some(config), Some(session), Some(display), Some(window)) = (
            self.surface.as_ref(),
            self.surface_config.as_ref(),
            self.session.as_ref(),
            self.display.as_ref(),
            self.window.as_ref(),
        ) else {
            return;
        };
        let gpu = session.engine().gpu();

        let frame = match surface.get_current_texture() {
            Ok(frame) => frame,
            Err(SurfaceError::Outdated) | Err(SurfaceError::Lost) => {
                info!("surface lost; reconfiguring");
                let size = window.inner_size();
                self.handle_resize(size);
                return;
            }
            Err(SurfaceError::OutOfMemory) => {
                self.fail(event_loop, anyhow!("surface out of memory"));
                return;
            }
            Err(SurfaceError::Timeout) => {
                warn!("surface acquisition timed out");
                return;
            }
            Err(SurfaceError::Other) => {
                warn!("surface reported an unknown error; retrying");
                let size = window.inner_size();
                self.handle_resize(size);
                return;
            }
        };

        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("display-encoder"),
            });
        display.draw(
            &gpu.queue,
            &mut encoder,
            &view,
            Dimensions::new(config.width, config.height),
            session.current_size(),
            session.engine(),
            DisplayOptions {
                view: self.view,
                show_seam: self.show_seam,
                energy_scale: self.cfg.energy_display_scale,
            },
        );
        gpu.queue.submit(std::iter::once(encoder.finish()));
        window.pre_present_notify();
        frame.present();
    }

    fn request_redraw(&self) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }

    fn busy(&self) -> bool {
        self.decodes_pending > 0
            || !self.commands.is_empty()
            || self
                .session
                .as_ref()
                .is_some_and(|session| session.state() == CarveState::Carving)
    }
}

impl ApplicationHandler for CarveApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let Some(window) = self.ensure_window(event_loop) else {
            event_loop.exit();
            return;
        };

        if self.session.is_none() {
            if let Err(err) = self.init_gpu(window) {
                self.fail(event_loop, err);
                return;
            }
        }

        self.request_redraw();
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        let Some(window) = self.window.as_ref() else {
            return;
        };
        if window.id() != window_id {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("window close requested");
                event_loop.exit();
            }
            WindowEvent::Resized(new_size) => {
                self.handle_resize(new_size);
            }
            WindowEvent::ModifiersChanged(modifiers) => {
                self.modifiers = modifiers.state();
            }
            WindowEvent::KeyboardInput { event, .. } if event.state == ElementState::Pressed => {
                let step = self.cfg.target_step;
                if let Some(command) =
                    command_for_key(&event.logical_key, self.modifiers, step, &self.output)
                {
                    debug!(?command, "key command");
                    self.commands.push(command);
                    self.request_redraw();
                }
            }
            WindowEvent::DroppedFile(path) => {
                self.commands.push(CarveCommand::Load(path));
                self.request_redraw();
            }
            WindowEvent::RedrawRequested => {
                self.tick(event_loop);
                self.update_title();
                self.draw(event_loop);
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if self.busy() {
            self.request_redraw();
        }
    }
}

/// Open the viewer window and run until it is closed.
pub fn run_view(cfg: Configuration, image: Option<PathBuf>, output: PathBuf) -> Result<()> {
    let event_loop = EventLoop::new().context("failed to build event loop")?;

    let (to_loader, loader_rx) = unbounded();
    let (loader_tx, from_loader) = unbounded();
    let loader = spawn_loader(loader_rx, loader_tx);

    let mut app = CarveApp::new(cfg, image, output, to_loader.clone(), from_loader);
    let run_result = event_loop.run_app(&mut app);

    let _ = to_loader.send(LoaderMsg::Quit);
    if loader.join().is_err() {
        warn!("loader thread panicked");
    }
    run_result.context("event loop failed")?;
    match app.fatal.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
