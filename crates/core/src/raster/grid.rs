//! Main Raster type

use crate::crs::Crs;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, RasterElement};
use ndarray::{Array2, ArrayView2, ArrayViewMut2};

/// A georeferenced 2D raster grid.
///
/// `Raster<T>` stores values of type `T` in a 2D grid with associated
/// geographic metadata (transform and CRS). Tiles of the global elevation
/// model and their label grids are both carried in this type.
#[derive(Debug, Clone)]
pub struct Raster<T: RasterElement> {
    /// Raster data stored in row-major order (row, col)
    data: Array2<T>,
    /// Affine transformation
    transform: GeoTransform,
    /// Coordinate reference system
    crs: Option<Crs>,
    /// No-data value
    nodata: Option<T>,
}

impl<T: RasterElement> Raster<T> {
    /// Create a new raster filled with zeros
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            data: Array2::zeros((rows, cols)),
            transform: GeoTransform::default(),
            crs: None,
            nodata: None,
        }
    }

    /// Create a new raster filled with a specific value
    pub fn filled(rows: usize, cols: usize, value: T) -> Self {
        Self {
            data: Array2::from_elem((rows, cols), value),
            transform: GeoTransform::default(),
            crs: None,
            nodata: None,
        }
    }

    /// Create a raster from existing row-major data
    pub fn from_vec(data: Vec<T>, rows: usize, cols: usize) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::InvalidDimensions {
                width: cols,
                height: rows,
            });
        }

        let array = Array2::from_shape_vec((rows, cols), data)
            .map_err(|e| Error::Other(e.to_string()))?;

        Ok(Self {
            data: array,
            transform: GeoTransform::default(),
            crs: None,
            nodata: None,
        })
    }

    /// Create a raster with the same metadata but a different element type,
    /// zero-filled. Used to allocate a tile's label grid next to its
    /// elevation grid.
    pub fn with_same_meta<U: RasterElement>(&self, rows: usize, cols: usize) -> Raster<U> {
        Raster {
            data: Array2::zeros((rows, cols)),
            transform: self.transform,
            crs: self.crs.clone(),
            nodata: None,
        }
    }

    // Dimensions

    /// Number of rows
    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    /// Number of columns
    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    /// Dimensions as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Total number of cells
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the raster is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    // Data access

    /// Get value at (row, col)
    pub fn get(&self, row: usize, col: usize) -> Result<T> {
        self.data
            .get((row, col))
            .copied()
            .ok_or(Error::IndexOutOfBounds {
                row,
                col,
                rows: self.rows(),
                cols: self.cols(),
            })
    }

    /// Set value at (row, col)
    pub fn set(&mut self, row: usize, col: usize, value: T) -> Result<()> {
        if row >= self.rows() || col >= self.cols() {
            return Err(Error::IndexOutOfBounds {
                row,
                col,
                rows: self.rows(),
                cols: self.cols(),
            });
        }
        self.data[(row, col)] = value;
        Ok(())
    }

    /// Get a view of the underlying data
    pub fn view(&self) -> ArrayView2<'_, T> {
        self.data.view()
    }

    /// Get a mutable view of the underlying data
    pub fn view_mut(&mut self) -> ArrayViewMut2<'_, T> {
        self.data.view_mut()
    }

    /// Get a reference to the underlying array
    pub fn data(&self) -> &Array2<T> {
        &self.data
    }

    /// Get a mutable reference to the underlying array
    pub fn data_mut(&mut self) -> &mut Array2<T> {
        &mut self.data
    }

    /// Consume the raster and return the underlying array
    pub fn into_array(self) -> Array2<T> {
        self.data
    }

    // Perimeter extraction. The engine ships these four arrays (for both
    // elevations and labels) to the producer after the tile flood; only the
    // perimeter ever crosses a tile boundary.

    /// The first row, copied
    pub fn top_row(&self) -> Vec<T> {
        self.data.row(0).to_vec()
    }

    /// The last row, copied
    pub fn bottom_row(&self) -> Vec<T> {
        self.data.row(self.rows() - 1).to_vec()
    }

    /// The first column, copied
    pub fn left_column(&self) -> Vec<T> {
        self.data.column(0).to_vec()
    }

    /// The last column, copied
    pub fn right_column(&self) -> Vec<T> {
        self.data.column(self.cols() - 1).to_vec()
    }

    // Metadata

    /// Get the geotransform
    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    /// Set the geotransform
    pub fn set_transform(&mut self, transform: GeoTransform) {
        self.transform = transform;
    }

    /// Get the CRS
    pub fn crs(&self) -> Option<&Crs> {
        self.crs.as_ref()
    }

    /// Set the CRS
    pub fn set_crs(&mut self, crs: Option<Crs>) {
        self.crs = crs;
    }

    /// Get the no-data value
    pub fn nodata(&self) -> Option<T> {
        self.nodata
    }

    /// Set the no-data value
    pub fn set_nodata(&mut self, nodata: Option<T>) {
        self.nodata = nodata;
    }

    /// Check if a value is no-data
    pub fn is_nodata(&self, value: T) -> bool {
        value.is_nodata(self.nodata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raster_creation() {
        let raster: Raster<f32> = Raster::new(100, 200);
        assert_eq!(raster.rows(), 100);
        assert_eq!(raster.cols(), 200);
        assert_eq!(raster.shape(), (100, 200));
    }

    #[test]
    fn test_raster_access() {
        let mut raster: Raster<f32> = Raster::new(10, 10);
        raster.set(5, 5, 42.0).unwrap();
        assert_eq!(raster.get(5, 5).unwrap(), 42.0);
        assert!(raster.get(10, 0).is_err());
    }

    #[test]
    fn test_from_vec_rejects_bad_length() {
        assert!(Raster::<u8>::from_vec(vec![1, 2, 3], 2, 2).is_err());
    }

    #[test]
    fn test_perimeter_extraction() {
        let raster = Raster::from_vec(
            vec![
                1, 2, 3, //
                4, 5, 6, //
                7, 8, 9,
            ],
            3,
            3,
        )
        .unwrap();

        assert_eq!(raster.top_row(), vec![1, 2, 3]);
        assert_eq!(raster.bottom_row(), vec![7, 8, 9]);
        assert_eq!(raster.left_column(), vec![1, 4, 7]);
        assert_eq!(raster.right_column(), vec![3, 6, 9]);
    }

    #[test]
    fn test_with_same_meta_keeps_transform() {
        let mut raster: Raster<f64> = Raster::new(4, 4);
        raster.set_transform(GeoTransform::new(10.0, 20.0, 1.0, -1.0));
        let labels: Raster<u32> = raster.with_same_meta(4, 4);
        assert_eq!(labels.transform(), raster.transform());
        assert_eq!(labels.get(0, 0).unwrap(), 0);
    }
}
