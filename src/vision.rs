use std::time::{Duration, Instant};

use anyhow::Result;
use embedded_graphics::{
    mono_font::{ascii::FONT_10X20, MonoTextStyle},
    pixelcolor::Rgb888,
    prelude::*,
    text::Text,
};
use image::{Rgb, RgbImage};
use nokhwa::{
    pixel_format::RgbFormat,
    utils::{CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution},
    Camera,
};
use pixels::{Pixels, SurfaceTexture};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{debug, error, info, warn};
use winit::{
    dpi::LogicalSize,
    event::{ElementState, Event, VirtualKeyCode, WindowEvent},
    event_loop::{ControlFlow, EventLoop},
    window::WindowBuilder,
};

use crate::{
    compositor::{composite, overlay_placement},
    detector::FaceDetector,
    error::AppError,
    scheduler::SuggestionScheduler,
    store::ImageStore,
    types::FaceRect,
};

const WINDOW_TITLE: &str = "My Spirit Animal (Probably Not)";
const NO_FACE_TEXT: &str = "No face detected...";
const FACE_BOX_COLOR: [u8; 3] = [0, 0, 255];
const FACE_BOX_THICKNESS: u32 = 2;
const STATUS_COLOR: [u8; 3] = [255, 0, 0];

/// Camera and timing parameters for the preview loop
pub struct VisionConfig {
    pub camera_index: u32,
    /// Requested capture size, 0 keeps the camera default
    pub frame_width: u32,
    pub frame_height: u32,
    pub display_duration: Duration,
    pub seed: Option<u64>,
}

pub struct VisionPipeline {
    detector: Box<dyn FaceDetector>,
    scheduler: SuggestionScheduler,
    store: ImageStore,
    rng: StdRng,
    camera: Camera,
    frame_width: u32,
    frame_height: u32,
}

impl VisionPipeline {
    pub fn new(cfg: VisionConfig, store: ImageStore, detector: Box<dyn FaceDetector>) -> Result<Self> {
        let camera = open_camera(&cfg)?;
        let camera_format = camera.camera_format();
        let rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let scheduler = SuggestionScheduler::new(store.labels(), cfg.display_duration);

        Ok(Self {
            detector,
            scheduler,
            store,
            rng,
            camera,
            frame_width: camera_format.width(),
            frame_height: camera_format.height(),
        })
    }

    pub fn run(mut self) -> Result<()> {
        info!("entering preview loop, press Q to quit");
        let event_loop = EventLoop::new();
        let initial_size = LogicalSize::new(self.frame_width as f64, self.frame_height as f64);
        let window = WindowBuilder::new()
            .with_title(WINDOW_TITLE)
            .with_inner_size(initial_size)
            .build(&event_loop)
            .map_err(|e| AppError::Window(format!("could not create window: {e}")))?;

        let size = window.inner_size();
        let surface_texture = SurfaceTexture::new(size.width, size.height, &window);
        let mut pixels = Pixels::new(self.frame_width, self.frame_height, surface_texture)
            .map_err(|e| AppError::Window(format!("could not create pixel buffer: {e}")))?;

        event_loop.run(move |event, _, control_flow| {
            *control_flow = ControlFlow::Poll;
            match event {
                Event::WindowEvent { event, .. } => match event {
                    WindowEvent::CloseRequested => *control_flow = ControlFlow::Exit,
                    WindowEvent::KeyboardInput { input, .. } => {
                        if let (Some(VirtualKeyCode::Q | VirtualKeyCode::Escape), ElementState::Pressed) =
                            (input.virtual_keycode, input.state)
                        {
                            *control_flow = ControlFlow::Exit;
                        }
                    }
                    WindowEvent::Resized(size) => {
                        if let Err(err) = pixels.resize_surface(size.width, size.height) {
                            error!(?err, "failed to resize surface");
                            *control_flow = ControlFlow::ExitWithCode(1);
                        }
                    }
                    WindowEvent::ScaleFactorChanged { new_inner_size, .. } => {
                        if let Err(err) =
                            pixels.resize_surface(new_inner_size.width, new_inner_size.height)
                        {
                            error!(?err, "failed to rescale surface");
                            *control_flow = ControlFlow::ExitWithCode(1);
                        }
                    }
                    _ => {}
                },
                Event::MainEventsCleared => match self.next_frame() {
                    Ok(mut frame) => {
                        if frame.dimensions() != (self.frame_width, self.frame_height) {
                            let (width, height) = frame.dimensions();
                            warn!(
                                "camera delivers {width}x{height}, expected {}x{}; resizing buffer",
                                self.frame_width, self.frame_height
                            );
                            if let Err(err) = pixels.resize_buffer(width, height) {
                                error!(?err, "failed to resize pixel buffer");
                                *control_flow = ControlFlow::ExitWithCode(1);
                                return;
                            }
                            self.frame_width = width;
                            self.frame_height = height;
                        }
                        process_frame(
                            &mut frame,
                            self.detector.as_ref(),
                            &mut self.scheduler,
                            &self.store,
                            Instant::now(),
                            &mut self.rng,
                        );
                        if copy_to_pixels(&frame, pixels.frame_mut()) {
                            window.request_redraw();
                        } else {
                            warn!(
                                "frame {}x{} does not fit the pixel buffer",
                                frame.width(),
                                frame.height()
                            );
                        }
                    }
                    Err(err) => {
                        error!("{err}, exiting");
                        *control_flow = ControlFlow::ExitWithCode(1);
                    }
                },
                Event::RedrawRequested(_) => {
                    if let Err(err) = pixels.render() {
                        error!(?err, "render failed");
                        *control_flow = ControlFlow::ExitWithCode(1);
                    }
                }
                Event::LoopDestroyed => {
                    if let Err(err) = self.camera.stop_stream() {
                        warn!(?err, "failed to stop camera stream");
                    }
                    println!("Exited the program.");
                }
                _ => {}
            }
        });
        #[allow(unreachable_code)]
        Ok(())
    }

    /// Blocks until the camera delivers the next frame.
    fn next_frame(&mut self) -> Result<RgbImage, AppError> {
        let buffer = self
            .camera
            .frame()
            .map_err(|e| AppError::FrameRead(e.to_string()))?;
        buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| AppError::FrameRead(e.to_string()))
    }
}

/// Copies an RGB frame into an RGBA surface buffer. Returns false when the
/// buffer is not exactly the frame's size.
fn copy_to_pixels(frame: &RgbImage, target: &mut [u8]) -> bool {
    if target.len() != frame.width() as usize * frame.height() as usize * 4 {
        return false;
    }
    for (src, dst) in frame.pixels().zip(target.chunks_exact_mut(4)) {
        dst[0] = src[0];
        dst[1] = src[1];
        dst[2] = src[2];
        dst[3] = 0xFF;
    }
    true
}

fn open_camera(cfg: &VisionConfig) -> Result<Camera> {
    let requested = if cfg.frame_width > 0 && cfg.frame_height > 0 {
        let fmt = CameraFormat::new(
            Resolution::new(cfg.frame_width, cfg.frame_height),
            FrameFormat::MJPEG,
            30,
        );
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::Exact(fmt))
    } else {
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate)
    };
    let mut camera = Camera::new(CameraIndex::Index(cfg.camera_index), requested)
        .map_err(|e| AppError::CameraUnavailable(e.to_string()))?;
    camera
        .open_stream()
        .map_err(|e| AppError::CameraUnavailable(e.to_string()))?;
    let format = camera.camera_format();
    info!(
        index = cfg.camera_index,
        width = format.width(),
        height = format.height(),
        "webcam initialized"
    );
    Ok(camera)
}

/// Everything that happens to a captured frame before it is shown: mirror,
/// detect, advance the scheduler, then box each face and float the current
/// image above it. Returns the faces found this frame.
pub fn process_frame<R: Rng>(
    frame: &mut RgbImage,
    detector: &dyn FaceDetector,
    scheduler: &mut SuggestionScheduler,
    store: &ImageStore,
    now: Instant,
    rng: &mut R,
) -> Vec<FaceRect> {
    image::imageops::flip_horizontal_in_place(frame);

    let faces = match detector.detect(frame) {
        Ok(faces) => faces,
        Err(err) => {
            warn!(?err, "face detection failed, skipping frame");
            Vec::new()
        }
    };
    debug!(faces = faces.len(), "frame processed");
    scheduler.update(now, !faces.is_empty(), rng);

    let current = scheduler.current_label().and_then(|label| store.get(label));

    // later faces paint over earlier ones
    for face in &faces {
        draw_rect(frame, face, FACE_BOX_COLOR, FACE_BOX_THICKNESS);
        let Some(image) = current else {
            continue;
        };
        if let Some(placement) = overlay_placement(*face, image.pixels.dimensions()) {
            debug!(
                label = %image.label,
                x = placement.x,
                y = placement.y,
                width = placement.width,
                height = placement.height,
                "overlay placed"
            );
            composite(frame, Some(&image.pixels), placement.x, placement.y, placement.scale);
        }
    }

    if faces.is_empty() && scheduler.current_label().is_none() {
        draw_text(frame, NO_FACE_TEXT, (50, 50), STATUS_COLOR);
    }
    faces
}

fn draw_rect(frame: &mut RgbImage, rect: &FaceRect, color: [u8; 3], thickness: u32) {
    for inset in 0..thickness as i32 {
        let x1 = rect.x as i32 + inset;
        let y1 = rect.y as i32 + inset;
        let x2 = (rect.x + rect.width) as i32 - inset;
        let y2 = (rect.y + rect.height) as i32 - inset;
        if x2 < x1 || y2 < y1 {
            break;
        }
        for x in x1..=x2 {
            set_pixel_safe(frame, x, y1, color);
            set_pixel_safe(frame, x, y2, color);
        }
        for y in y1..=y2 {
            set_pixel_safe(frame, x1, y, color);
            set_pixel_safe(frame, x2, y, color);
        }
    }
}

fn set_pixel_safe(frame: &mut RgbImage, x: i32, y: i32, color: [u8; 3]) {
    if x >= 0 && y >= 0 && x < frame.width() as i32 && y < frame.height() as i32 {
        frame.put_pixel(x as u32, y as u32, Rgb(color));
    }
}

fn draw_text(frame: &mut RgbImage, text: &str, pos: (i32, i32), color: [u8; 3]) {
    let style = MonoTextStyle::new(&FONT_10X20, Rgb888::new(color[0], color[1], color[2]));
    let mut target = ImageDrawTarget::new(frame);
    let _ = Text::new(text, Point::new(pos.0, pos.1), style).draw(&mut target);
}

struct ImageDrawTarget<'a> {
    image: &'a mut RgbImage,
}

impl<'a> ImageDrawTarget<'a> {
    fn new(image: &'a mut RgbImage) -> Self {
        Self { image }
    }
}

impl OriginDimensions for ImageDrawTarget<'_> {
    fn size(&self) -> Size {
        Size::new(self.image.width(), self.image.height())
    }
}

impl DrawTarget for ImageDrawTarget<'_> {
    type Color = Rgb888;
    type Error = core::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        let width = self.image.width() as i32;
        let height = self.image.height() as i32;
        for Pixel(coord, color) in pixels {
            if coord.x < 0 || coord.y < 0 || coord.x >= width || coord.y >= height {
                continue;
            }
            let pixel = self.image.get_pixel_mut(coord.x as u32, coord.y as u32);
            *pixel = Rgb([color.r(), color.g(), color.b()]);
        }
        Ok(())
    }
}
