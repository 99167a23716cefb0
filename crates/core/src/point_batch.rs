/// One frame of coloured points, index-aligned positions and colours.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointBatch {
    pub positions: Vec<[f32; 3]>,
    pub colors: Vec<[f32; 4]>,
}

impl PointBatch {
    pub fn new(positions: Vec<[f32; 3]>, colors: Vec<[f32; 4]>) -> Self {
        Self { positions, colors }
    }

    /// Builds a batch from 8-bit RGBA colours, normalized to `0..=1`.
    pub fn from_rgba8(positions: Vec<[f32; 3]>, colors: &[[u8; 4]]) -> Self {
        let colors = colors.iter().map(|c| rgba8_to_f32(*c)).collect();
        Self { positions, colors }
    }

    /// Every point gets the same colour.
    pub fn uniform(positions: Vec<[f32; 3]>, color: [f32; 4]) -> Self {
        let colors = vec![color; positions.len()];
        Self { positions, colors }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// False for an empty batch or when positions and colours disagree in
    /// length. Either case means there is nothing to reconstruct.
    pub fn is_usable(&self) -> bool {
        !self.positions.is_empty() && self.positions.len() == self.colors.len()
    }
}

pub fn rgba8_to_f32(color: [u8; 4]) -> [f32; 4] {
    [
        color[0] as f32 / 255.0,
        color[1] as f32 / 255.0,
        color[2] as f32 / 255.0,
        color[3] as f32 / 255.0,
    ]
}
