use std::sync::Arc;
use std::time::Instant;

use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowAttributes, WindowId};

use phalanx::{
    BASIC_SHADER, Color, GpuConfig, LoggingConfig, MaterialDescriptor, Mesh, ModelId, Quat,
    Renderer, SamplerSettings, TEXTURED_SHADER, Transform, Vec3, checkerboard, init_logging,
};

const GRID: u32 = 5;
const SPACING: f32 = 1.6;

struct Scene {
    window: Arc<Window>,
    renderer: Renderer,
    cubes: ModelId,
    start_time: Instant,
}

impl Scene {
    fn new(window: Arc<Window>) -> phalanx::Result<Self> {
        let size = window.inner_size();
        let mut renderer =
            Renderer::create_blocking(window.clone(), size.width, size.height, GpuConfig::default())?;
        renderer.set_clear_color(Color::from_hex(0x1a1a26));

        let pixels = checkerboard(64, 8, Color::WHITE, Color::rgb(0.2, 0.4, 0.8));
        let checker =
            renderer.create_texture_rgba("checker", &pixels, 64, 64, SamplerSettings::default())?;
        let textured = renderer
            .create_material(MaterialDescriptor::new(TEXTURED_SHADER).diffuse_texture(checker))?;
        let cube = renderer.create_mesh("cube", &Mesh::cube())?;
        let cubes = renderer.create_model("cubes", cube, textured, GRID * GRID)?;
        renderer.add(cubes)?;

        let plain = renderer
            .create_material(MaterialDescriptor::new(BASIC_SHADER).diffuse_color(Color::RED))?;
        let sphere = renderer.create_mesh("sphere", &Mesh::sphere(32, 16))?;
        let ball = renderer.create_model("ball", sphere, plain, 1)?;
        renderer.transform(
            ball,
            Transform::from_position(Vec3::new(0.0, 2.5, 0.0))
                .uniform_scale(1.5)
                .matrix(),
            0,
        )?;
        renderer.add(ball)?;

        Ok(Self {
            window,
            renderer,
            cubes,
            start_time: Instant::now(),
        })
    }

    fn frame(&mut self) -> phalanx::Result<()> {
        let time = self.start_time.elapsed().as_secs_f32();

        let offset = (GRID - 1) as f32 * SPACING * 0.5;
        for i in 0..GRID * GRID {
            let (x, z) = ((i % GRID) as f32, (i / GRID) as f32);
            let position = Vec3::new(x * SPACING - offset, 0.0, z * SPACING - offset);
            let spin = Quat::from_rotation_y(time + i as f32 * 0.3);
            let matrix = Transform::from_position(position).rotation(spin).matrix();
            self.renderer.transform(self.cubes, matrix, i)?;
        }

        self.renderer
            .camera_mut()
            .orbit(Vec3::ZERO, 12.0, 6.0, time * 0.25);
        self.renderer.render()
    }
}

#[derive(Default)]
struct App {
    scene: Option<Scene>,
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.scene.is_some() {
            return;
        }
        let attrs = WindowAttributes::default()
            .with_title("phalanx")
            .with_inner_size(winit::dpi::LogicalSize::new(1280, 720));
        let window = match event_loop.create_window(attrs) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                log::error!("failed to create window: {err}");
                event_loop.exit();
                return;
            }
        };

        match Scene::new(window) {
            Ok(scene) => {
                scene.window.request_redraw();
                self.scene = Some(scene);
            }
            Err(err) => {
                log::error!("failed to set up scene: {err}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(scene) = &mut self.scene else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                scene.renderer.dispose();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Err(err) = scene.renderer.resize(size.width, size.height) {
                    log::error!("resize failed: {err}");
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(err) = scene.frame() {
                    log::error!("frame failed: {err}");
                    scene.renderer.dispose();
                    event_loop.exit();
                    return;
                }
                scene.window.request_redraw();
            }
            _ => {}
        }
    }
}

fn main() -> Result<(), winit::error::EventLoopError> {
    init_logging(LoggingConfig::default());

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::default();
    event_loop.run_app(&mut app)
}
