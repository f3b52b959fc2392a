//! A headless device that records every call.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::color::Color;
use crate::error::{RenderError, Result};
use crate::image::Image;
use crate::renderer::BlendMode;

use super::device::{
    ClearFlags, GraphicsDevice, Program, StencilMode, TextureHandle, TextureOptions, Topology,
};

/// One call made on a [`RecordingDevice`].
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    InitPrograms,
    UploadIndices(usize),
    SetViewport(u32, u32),
    UseProgram(Program),
    SetBlendMode(BlendMode),
    SetScissor(Option<[u32; 4]>),
    SetStencil(StencilMode),
    CreateTexture {
        handle: TextureHandle,
        width: u32,
        height: u32,
        options: TextureOptions,
    },
    UpdateTexture(TextureHandle),
    BindTexture(usize, TextureHandle),
    DeleteTexture(TextureHandle),
    /// Uploaded vertex data, as floats.
    UploadVertices(Vec<f32>),
    DrawIndexed(Topology, usize),
    DrawArrays(Topology, usize),
    Clear(Color, ClearFlags),
    EndFrame,
    ReadPixels,
}

impl DeviceCall {
    pub fn is_draw(&self) -> bool {
        matches!(self, DeviceCall::DrawIndexed(..) | DeviceCall::DrawArrays(..))
    }
}

/// Shared view of a recording device's call log.
pub type CallLog = Rc<RefCell<Vec<DeviceCall>>>;

/// A device with no GPU behind it.
///
/// Every call is appended to a log that stays readable after the device has
/// been moved into a renderer. `read_pixels` returns a blank frame.
pub struct RecordingDevice {
    log: CallLog,
    max_units: usize,
    width: u32,
    height: u32,
    next_texture: u64,
    lost: Rc<Cell<bool>>,
}

impl RecordingDevice {
    pub fn new(max_units: usize) -> Self {
        Self {
            log: Rc::new(RefCell::new(Vec::new())),
            max_units,
            width: 1,
            height: 1,
            next_texture: 0,
            lost: Rc::new(Cell::new(false)),
        }
    }

    pub fn log(&self) -> CallLog {
        Rc::clone(&self.log)
    }

    /// Handle that simulates the device dropping its context.
    pub fn loss_switch(&self) -> Rc<Cell<bool>> {
        Rc::clone(&self.lost)
    }

    fn record(&self, call: DeviceCall) {
        self.log.borrow_mut().push(call);
    }
}

impl Default for RecordingDevice {
    fn default() -> Self {
        Self::new(16)
    }
}

impl GraphicsDevice for RecordingDevice {
    fn max_texture_units(&self) -> usize {
        self.max_units
    }

    fn is_lost(&self) -> bool {
        self.lost.get()
    }

    fn init_programs(&mut self) -> Result<()> {
        // a fresh context starts numbering textures again
        self.next_texture = 0;
        self.lost.set(false);
        self.record(DeviceCall::InitPrograms);
        Ok(())
    }

    fn upload_indices(&mut self, indices: &[u16]) -> Result<()> {
        self.record(DeviceCall::UploadIndices(indices.len()));
        Ok(())
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.record(DeviceCall::SetViewport(width, height));
    }

    fn use_program(&mut self, program: Program) {
        self.record(DeviceCall::UseProgram(program));
    }

    fn set_blend_mode(&mut self, mode: BlendMode) {
        self.record(DeviceCall::SetBlendMode(mode));
    }

    fn set_scissor(&mut self, rect: Option<[u32; 4]>) {
        self.record(DeviceCall::SetScissor(rect));
    }

    fn set_stencil(&mut self, mode: StencilMode) {
        self.record(DeviceCall::SetStencil(mode));
    }

    fn create_texture(&mut self, image: &Image, options: TextureOptions) -> Result<TextureHandle> {
        let handle = TextureHandle(self.next_texture);
        self.next_texture += 1;
        self.record(DeviceCall::CreateTexture {
            handle,
            width: image.width(),
            height: image.height(),
            options,
        });
        Ok(handle)
    }

    fn update_texture(&mut self, texture: TextureHandle, _image: &Image) -> Result<()> {
        self.record(DeviceCall::UpdateTexture(texture));
        Ok(())
    }

    fn bind_texture(&mut self, unit: usize, texture: TextureHandle) {
        self.record(DeviceCall::BindTexture(unit, texture));
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        self.record(DeviceCall::DeleteTexture(texture));
    }

    fn upload_vertices(&mut self, data: &[u8]) {
        let floats = data
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        self.record(DeviceCall::UploadVertices(floats));
    }

    fn draw_indexed(&mut self, topology: Topology, index_count: usize) {
        self.record(DeviceCall::DrawIndexed(topology, index_count));
    }

    fn draw_arrays(&mut self, topology: Topology, vertex_count: usize) {
        self.record(DeviceCall::DrawArrays(topology, vertex_count));
    }

    fn clear(&mut self, color: Color, flags: ClearFlags) {
        self.record(DeviceCall::Clear(color, flags));
    }

    fn end_frame(&mut self) -> Result<()> {
        self.record(DeviceCall::EndFrame);
        Ok(())
    }

    fn read_pixels(&mut self) -> Result<Image> {
        self.record(DeviceCall::ReadPixels);
        if self.is_lost() {
            return Err(RenderError::ContextLost);
        }
        Image::new(self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_outlives_move() {
        let device = RecordingDevice::new(4);
        let log = device.log();
        let mut boxed: Box<dyn GraphicsDevice> = Box::new(device);
        boxed.use_program(Program::Quad);
        boxed.draw_indexed(Topology::TriangleList, 6);
        assert_eq!(
            *log.borrow(),
            vec![
                DeviceCall::UseProgram(Program::Quad),
                DeviceCall::DrawIndexed(Topology::TriangleList, 6)
            ]
        );
    }

    #[test]
    fn test_vertices_are_recorded_as_floats() {
        let mut device = RecordingDevice::new(4);
        let log = device.log();
        let data: Vec<f32> = vec![1.0, 2.5, -3.0];
        device.upload_vertices(bytemuck::cast_slice(&data));
        assert_eq!(log.borrow()[0], DeviceCall::UploadVertices(data));
    }

    #[test]
    fn test_init_programs_restarts_texture_handles() {
        let mut device = RecordingDevice::new(4);
        let image = Image::new(2, 2).unwrap();
        let first = device.create_texture(&image, TextureOptions::default()).unwrap();
        device.init_programs().unwrap();
        let again = device.create_texture(&image, TextureOptions::default()).unwrap();
        assert_eq!(first, again);
    }
}
