use std::{sync::Arc, time::Instant};

use anyhow::{anyhow, Result};
use dbgtext::{
    context::gpu::{RenderTarget, WgpuContext},
    Rect, TextConfig, TextDrawer,
};
use wgpu::{
    DeviceDescriptor, Instance, LoadOp, Operations, RenderPassColorAttachment,
    RenderPassDescriptor, RequestAdapterOptions, StoreOp, Surface, SurfaceConfiguration,
    TextureUsages, TextureViewDescriptor,
};
use winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

struct Gpu {
    window: Arc<Window>,
    surface: Surface<'static>,
    surface_config: SurfaceConfiguration,
    drawer: TextDrawer<WgpuContext>,
}

impl Gpu {
    fn new(window: Arc<Window>, text_config: TextConfig) -> Result<Self> {
        let instance = Instance::default();
        let surface = instance.create_surface(window.clone())?;

        let (adapter, device, queue) = pollster::block_on(async {
            let adapter = instance
                .request_adapter(&RequestAdapterOptions {
                    compatible_surface: Some(&surface),
                    ..Default::default()
                })
                .await
                .ok_or(anyhow!("No suitable adapter found."))?;

            let (device, queue) = adapter
                .request_device(&DeviceDescriptor::default(), None)
                .await?;

            Ok::<(wgpu::Adapter, wgpu::Device, wgpu::Queue), anyhow::Error>((
                adapter, device, queue,
            ))
        })?;

        let size = window.inner_size();
        let surface_config = SurfaceConfiguration {
            usage: TextureUsages::RENDER_ATTACHMENT,
            format: *surface
                .get_capabilities(&adapter)
                .formats
                .first()
                .ok_or(anyhow!("No formats found."))?,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            desired_maximum_frame_latency: 2,
            alpha_mode: wgpu::CompositeAlphaMode::Auto,
            view_formats: vec![],
        };
        surface.configure(&device, &surface_config);

        let mut drawer = TextDrawer::new(WgpuContext::new(device, queue), text_config);
        drawer.load()?;

        Ok(Self {
            window,
            surface,
            surface_config,
            drawer,
        })
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.surface_config.width = width;
        self.surface_config.height = height;
        self.surface
            .configure(self.drawer.context().device(), &self.surface_config);
    }

    fn clear(&self, view: &wgpu::TextureView) {
        let context = self.drawer.context();
        let mut encoder = context
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("clear encoder"),
            });
        encoder.begin_render_pass(&RenderPassDescriptor {
            label: Some("clear pass"),
            color_attachments: &[Some(RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: Operations {
                    load: LoadOp::Clear(wgpu::Color {
                        r: 0.05,
                        g: 0.06,
                        b: 0.09,
                        a: 1.0,
                    }),
                    store: StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        context.queue().submit(Some(encoder.finish()));
    }

    fn render(&mut self, fps: f32) -> Result<()> {
        let frame = self.surface.get_current_texture()?;
        let view = frame.texture.create_view(&TextureViewDescriptor::default());
        self.clear(&view);

        self.drawer.context_mut().set_target(RenderTarget {
            view,
            format: self.surface_config.format,
            depth: None,
        });

        let (width, height) = (self.surface_config.width, self.surface_config.height);
        let drawn = self.draw_overlay(width, height, fps);
        self.drawer.context_mut().take_target();
        frame.present();
        drawn
    }

    fn draw_overlay(&mut self, width: u32, height: u32, fps: f32) -> Result<()> {
        let drawer = &mut self.drawer;
        drawer.begin(width, height)?;
        let lines = overlay_lines(drawer, width, height, fps);
        // end even after a failed line, or the next begin is refused
        let ended = drawer.end();
        lines?;
        ended?;
        Ok(())
    }
}

fn overlay_lines(
    drawer: &mut TextDrawer<WgpuContext>,
    width: u32,
    height: u32,
    fps: f32,
) -> dbgtext::Result<()> {
    drawer.foreground_color = [1.0, 1.0, 1.0, 1.0];
    drawer.draw_text_line("dbgtext hello")?;
    drawer.draw_formatted_text_line(format_args!("{fps:.1} fps"))?;
    drawer.draw_formatted_text_line(format_args!("{width}x{height}"))?;
    drawer.draw_text(
        "centered",
        Rect::new(0.0, 0.0, width as f32, height as f32),
        [1.0, 0.8, 0.2, 1.0],
        true,
    )
}

struct App {
    text_config: TextConfig,
    gpu: Option<Gpu>,
    frames: u32,
    since: Instant,
    fps: f32,
}

impl App {
    fn new(text_config: TextConfig) -> Self {
        Self {
            text_config,
            gpu: None,
            frames: 0,
            since: Instant::now(),
            fps: 0.0,
        }
    }

    fn tick(&mut self) {
        self.frames += 1;
        let elapsed = self.since.elapsed().as_secs_f32();
        if elapsed >= 1.0 {
            self.fps = self.frames as f32 / elapsed;
            self.frames = 0;
            self.since = Instant::now();
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.gpu.is_some() {
            return;
        }

        let attributes = Window::default_attributes()
            .with_title("hello-text")
            .with_inner_size(LogicalSize::new(800.0, 600.0));
        let gpu = event_loop
            .create_window(attributes)
            .map_err(anyhow::Error::from)
            .and_then(|window| Gpu::new(Arc::new(window), self.text_config.clone()));

        match gpu {
            Ok(gpu) => {
                gpu.window.request_redraw();
                self.gpu = Some(gpu);
            }
            Err(err) => {
                log::error!("failed to start: {err:#}");
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                if let Some(gpu) = &mut self.gpu {
                    gpu.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                self.tick();
                let fps = self.fps;
                if let Some(gpu) = &mut self.gpu {
                    if let Err(err) = gpu.render(fps) {
                        log::warn!("frame dropped: {err:#}");
                    }
                    gpu.window.request_redraw();
                }
            }
            _ => {}
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let text_config = match std::env::args().nth(1) {
        Some(descriptor) => TextConfig::from_descriptor_file(descriptor)?,
        None => TextConfig::default(),
    };

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);
    let mut app = App::new(text_config);
    event_loop.run_app(&mut app)?;
    Ok(())
}
