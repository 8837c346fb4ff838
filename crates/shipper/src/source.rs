use transport::Pose;

/// A staged frame: CPU-visible BGRA plus the metadata the transports
/// carry alongside it.
pub struct SourcedFrame<'a> {
    pub pixels: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub pose: Pose,
    pub target_timestamp_ns: u64,
}

/// Where rendered frames come from. The production driver reads a staged
/// texture back from the GPU; development builds synthesise one.
pub trait FrameSource {
    fn next_frame(&mut self, frame_number: u64) -> anyhow::Result<SourcedFrame<'_>>;
}

/// Synthesised BGRA gradient that shifts each frame, so every frame's
/// bytes are distinguishable on the far side.
pub struct GradientSource {
    width: u32,
    height: u32,
    buffer: Vec<u8>,
}

impl GradientSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            buffer: vec![0u8; (width * height * 4) as usize],
        }
    }
}

impl FrameSource for GradientSource {
    fn next_frame(&mut self, frame_number: u64) -> anyhow::Result<SourcedFrame<'_>> {
        let width = self.width as usize;
        for y in 0..self.height as usize {
            for x in 0..width {
                let idx = (y * width + x) * 4;
                self.buffer[idx] = (x as u64 + frame_number * 10) as u8;
                self.buffer[idx + 1] = (y as u64 + frame_number * 5) as u8;
                self.buffer[idx + 2] = (frame_number * 20) as u8;
                self.buffer[idx + 3] = 255;
            }
        }

        let mut pose: Pose = [[0.0; 4]; 3];
        pose[0][0] = 1.0;
        pose[1][1] = 1.0;
        pose[2][2] = 1.0;

        Ok(SourcedFrame {
            pixels: &self.buffer,
            width: self.width,
            height: self.height,
            stride: self.width * 4,
            pose,
            target_timestamp_ns: frame_number.wrapping_mul(11_111_111),
        })
    }
}
