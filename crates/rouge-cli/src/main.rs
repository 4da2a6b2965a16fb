//! Demo driver: opens a window, mounts a try-on session, and drives its
//! tick from the winit event loop. Press `r` to retry after a failed
//! startup.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use rouge_engine::capture::camera::CameraCaptureFactory;
use rouge_engine::capture::{still_from_path, StillCaptureFactory};
use rouge_engine::detector::face_mesh::FaceMeshFactory;
use rouge_engine::geometry::lip_topology;
use rouge_engine::render::WindowRenderFactory;
use rouge_engine::{CaptureMode, EngineConfig, Frame, Session, SessionDeps, SessionPhase};

use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

#[derive(Parser)]
#[command(name = "rouge", about = "Virtual lipstick try-on")]
struct Cli {
    /// Engine configuration TOML; defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Continuous live try-on from the camera.
    Mirror,
    /// Try-on over a still image; captures one camera frame when no
    /// image file is given.
    Selfie { image: Option<PathBuf> },
}

struct App {
    config: EngineConfig,
    mode: CaptureMode,
    still: Option<Frame>,
    window: Option<Arc<Window>>,
    session: Option<Session>,
}

impl App {
    fn logical_size(window: &Window) -> ((f32, f32), f64) {
        let size = window.inner_size();
        let scale = window.scale_factor();
        (
            (
                size.width as f32 / scale as f32,
                size.height as f32 / scale as f32,
            ),
            scale,
        )
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attributes = Window::default_attributes().with_title("rouge");
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                log::error!("window creation failed: {e}");
                event_loop.exit();
                return;
            }
        };

        let (logical, scale) = Self::logical_size(&window);
        let capture: Box<dyn rouge_engine::CaptureFactory> = match &self.still {
            Some(frame) => Box::new(StillCaptureFactory::new(frame.clone())),
            None => Box::new(CameraCaptureFactory::new(self.config.capture.clone())),
        };
        let deps = SessionDeps {
            capture,
            detector: Box::new(FaceMeshFactory),
            renderer: Box::new(WindowRenderFactory::new(
                Arc::clone(&window),
                logical,
                scale,
                self.config.effect.clone(),
                lip_topology().vertex_capacity(),
            )),
        };
        self.session = Some(Session::start(self.config.clone(), self.mode, deps));
        window.request_redraw();
        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                if let Some(session) = &mut self.session {
                    session.teardown();
                }
                event_loop.exit();
            }
            WindowEvent::Resized(_) | WindowEvent::ScaleFactorChanged { .. } => {
                if let (Some(session), Some(window)) = (&mut self.session, &self.window) {
                    let (logical, scale) = Self::logical_size(window);
                    session.resize(logical, scale);
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::KeyR)
                {
                    if let Some(session) = &mut self.session {
                        if matches!(session.phase(), SessionPhase::Failed(_)) {
                            log::info!("retrying session startup");
                            session.retry();
                        }
                    }
                }
            }
            WindowEvent::RedrawRequested => {
                if let Some(session) = &mut self.session {
                    if let SessionPhase::Failed(e) = session.tick() {
                        if e.is_retryable() {
                            log::error!("session failed: {e} (press 'r' to retry)");
                        } else {
                            log::error!("session failed fatally: {e}");
                            session.teardown();
                            event_loop.exit();
                            return;
                        }
                    }
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    let (mode, still) = match &cli.cmd {
        Commands::Mirror => (CaptureMode::Mirror, None),
        Commands::Selfie { image: Some(path) } => {
            (CaptureMode::Selfie, Some(still_from_path(path)?))
        }
        Commands::Selfie { image: None } => (CaptureMode::Selfie, None),
    };

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);
    let mut app = App {
        config,
        mode,
        still,
        window: None,
        session: None,
    };
    event_loop.run_app(&mut app)?;
    Ok(())
}
