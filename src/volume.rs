use ndarray::Array3;

/// A decoded N-dimensional image volume with its geometric metadata.
///
/// Voxel data is stored depth-major, `(slices, rows, columns)`. Spacing,
/// origin and direction follow the patient coordinate system of the source
/// series; the external decoder is responsible for filling them in.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageVolume {
    pub data: Array3<f32>,
    /// Physical distance between voxel centres, in mm, per axis.
    pub spacing: [f64; 3],
    /// Physical position of the first voxel, in mm.
    pub origin: [f64; 3],
    /// Row-major direction cosines of the volume axes.
    pub direction: [[f64; 3]; 3],
}

impl ImageVolume {
    pub fn new(data: Array3<f32>, spacing: [f64; 3], origin: [f64; 3]) -> Self {
        ImageVolume {
            data,
            spacing,
            origin,
            direction: IDENTITY_DIRECTION,
        }
    }

    /// Volume extent as `(slices, rows, columns)`.
    pub fn size(&self) -> [usize; 3] {
        let (slices, rows, columns) = self.data.dim();
        [slices, rows, columns]
    }
}

pub const IDENTITY_DIRECTION: [[f64; 3]; 3] =
    [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
