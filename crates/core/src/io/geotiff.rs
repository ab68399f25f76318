//! Native GeoTIFF reading and writing
//!
//! Uses the `tiff` crate. Reads decode the full image and slice out the
//! requested window; writes are dtype-faithful (one TIFF colortype per
//! supported element type) and carry the ModelPixelScale/ModelTiepoint
//! tags so the georeferencing survives the round trip.

use crate::error::{Error, Result};
use crate::raster::{GeoTransform, Raster, RasterElement};
use std::fs::File;
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype;
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

/// The element type of an elevation raster, as probed from its file.
///
/// One kind is fixed per run; every tile must decode to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElevKind {
    U8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
}

impl ElevKind {
    pub fn name(&self) -> &'static str {
        match self {
            ElevKind::U8 => "u8",
            ElevKind::U16 => "u16",
            ElevKind::I16 => "i16",
            ElevKind::U32 => "u32",
            ElevKind::I32 => "i32",
            ElevKind::F32 => "f32",
            ElevKind::F64 => "f64",
        }
    }
}

/// What a dimension/dtype probe learned about a raster file.
#[derive(Debug, Clone, Copy)]
pub struct RasterProbe {
    pub width: usize,
    pub height: usize,
    pub kind: ElevKind,
    pub transform: GeoTransform,
}

fn tiff_err(e: tiff::TiffError) -> Error {
    Error::Tiff(e.to_string())
}

/// Probe a raster file for its dimensions, element kind and geotransform.
pub fn probe(path: &Path) -> Result<RasterProbe> {
    let file = File::open(path)?;
    let mut decoder = Decoder::new(file).map_err(tiff_err)?;

    let (width, height) = decoder.dimensions().map_err(tiff_err)?;

    // SampleFormat 5 and 6 are complex integer / complex IEEE
    if let Ok(format) = decoder.get_tag_u64(Tag::SampleFormat) {
        if format == 5 || format == 6 {
            return Err(Error::ComplexDataType);
        }
    }

    let kind = match decoder.read_image().map_err(tiff_err)? {
        DecodingResult::U8(_) => ElevKind::U8,
        DecodingResult::U16(_) => ElevKind::U16,
        DecodingResult::U32(_) => ElevKind::U32,
        DecodingResult::I16(_) => ElevKind::I16,
        DecodingResult::I32(_) => ElevKind::I32,
        DecodingResult::F32(_) => ElevKind::F32,
        DecodingResult::F64(_) => ElevKind::F64,
        _ => return Err(Error::UnsupportedDataType("TIFF pixel format".to_string())),
    };

    let transform = read_geotransform(&mut decoder).unwrap_or_default();

    Ok(RasterProbe {
        width: width as usize,
        height: height as usize,
        kind,
        transform,
    })
}

fn cast_buffer<S, T>(buf: Vec<S>) -> Vec<T>
where
    S: num_traits::ToPrimitive + num_traits::NumCast + Copy,
    T: RasterElement,
{
    buf.iter()
        .map(|&v| num_traits::cast(v).unwrap_or(T::default_nodata()))
        .collect()
}

fn decode_samples<T: RasterElement>(result: DecodingResult) -> Result<Vec<T>> {
    let data = match result {
        DecodingResult::U8(buf) => cast_buffer(buf),
        DecodingResult::U16(buf) => cast_buffer(buf),
        DecodingResult::U32(buf) => cast_buffer(buf),
        DecodingResult::I8(buf) => cast_buffer(buf),
        DecodingResult::I16(buf) => cast_buffer(buf),
        DecodingResult::I32(buf) => cast_buffer(buf),
        DecodingResult::F32(buf) => cast_buffer(buf),
        DecodingResult::F64(buf) => cast_buffer(buf),
        _ => {
            return Err(Error::UnsupportedDataType(
                "TIFF pixel format".to_string(),
            ))
        }
    };
    Ok(data)
}

/// Read an entire raster file.
pub fn read_geotiff<T, P>(path: P) -> Result<Raster<T>>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::open(path.as_ref())?;
    let mut decoder = Decoder::new(file).map_err(tiff_err)?;

    let (width, height) = decoder.dimensions().map_err(tiff_err)?;
    let rows = height as usize;
    let cols = width as usize;

    let data: Vec<T> = decode_samples(decoder.read_image().map_err(tiff_err)?)?;
    if data.len() != rows * cols {
        return Err(Error::InvalidDimensions {
            width: cols,
            height: rows,
        });
    }

    let mut raster = Raster::from_vec(data, rows, cols)?;
    if let Ok(transform) = read_geotransform(&mut decoder) {
        raster.set_transform(transform);
    }
    Ok(raster)
}

/// Read a `width x height` window whose upper-left pixel is `(x, y)`.
///
/// The returned raster carries the geotransform of the window, not of the
/// whole file, so it can be written out as a standalone tile. A window
/// extending past the file is a fatal dimension mismatch.
pub fn read_window<T, P>(path: P, x: usize, y: usize, width: usize, height: usize) -> Result<Raster<T>>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let file = File::open(path)?;
    let mut decoder = Decoder::new(file).map_err(tiff_err)?;

    let (file_w, file_h) = decoder.dimensions().map_err(tiff_err)?;
    let file_w = file_w as usize;
    let file_h = file_h as usize;

    if x + width > file_w {
        return Err(Error::TileSizeMismatch {
            path: path.to_path_buf(),
            axis: "width",
            found: file_w,
            expected: x + width,
        });
    }
    if y + height > file_h {
        return Err(Error::TileSizeMismatch {
            path: path.to_path_buf(),
            axis: "height",
            found: file_h,
            expected: y + height,
        });
    }

    let full: Vec<T> = decode_samples(decoder.read_image().map_err(tiff_err)?)?;
    if full.len() != file_w * file_h {
        return Err(Error::InvalidDimensions {
            width: file_w,
            height: file_h,
        });
    }

    let mut data = Vec::with_capacity(width * height);
    for r in 0..height {
        let start = (y + r) * file_w + x;
        data.extend_from_slice(&full[start..start + width]);
    }

    let mut raster = Raster::from_vec(data, height, width)?;
    let base = read_geotransform(&mut decoder).unwrap_or_default();
    raster.set_transform(base.window(x, y));
    Ok(raster)
}

/// Attempt to read a GeoTransform from TIFF tags
fn read_geotransform<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
) -> Result<GeoTransform> {
    let scale = decoder
        .get_tag_f64_vec(Tag::ModelPixelScaleTag)
        .map_err(|_| Error::Tiff("no pixel scale tag".into()))?;

    let tiepoint = decoder
        .get_tag_f64_vec(Tag::ModelTiepointTag)
        .map_err(|_| Error::Tiff("no tiepoint tag".into()))?;

    if scale.len() >= 2 && tiepoint.len() >= 6 {
        // tiepoint: [I, J, K, X, Y, Z]; scale: [ScaleX, ScaleY, ScaleZ].
        // ScaleY is positive for north-up rasters; a negative ScaleY marks
        // a south-up (vertically flipped) raster.
        let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
        let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
        let pixel_width = scale[0];
        let pixel_height = -scale[1];

        return Ok(GeoTransform::new(origin_x, origin_y, pixel_width, pixel_height));
    }

    Err(Error::Tiff("cannot determine geotransform".into()))
}

/// A raster element type that has a faithful TIFF encoding.
///
/// Each implementation binds the element to its grayscale TIFF colortype so
/// written tiles decode back to the same dtype they were read as.
pub trait TiffElement: RasterElement {
    fn encode_gray(
        file: File,
        width: u32,
        height: u32,
        transform: &GeoTransform,
        data: &[Self],
    ) -> Result<()>;
}

macro_rules! impl_tiff_element {
    ($t:ty, $color:ty) => {
        impl TiffElement for $t {
            fn encode_gray(
                file: File,
                width: u32,
                height: u32,
                transform: &GeoTransform,
                data: &[Self],
            ) -> Result<()> {
                let mut encoder = TiffEncoder::new(file).map_err(tiff_err)?;
                let mut image = encoder
                    .new_image::<$color>(width, height)
                    .map_err(tiff_err)?;

                let scale = [transform.pixel_width, -transform.pixel_height, 0.0];
                image
                    .encoder()
                    .write_tag(Tag::ModelPixelScaleTag, &scale[..])
                    .map_err(tiff_err)?;

                let tiepoint = [0.0, 0.0, 0.0, transform.origin_x, transform.origin_y, 0.0];
                image
                    .encoder()
                    .write_tag(Tag::ModelTiepointTag, &tiepoint[..])
                    .map_err(tiff_err)?;

                image.write_data(data).map_err(tiff_err)?;
                Ok(())
            }
        }
    };
}

impl_tiff_element!(u8, colortype::Gray8);
impl_tiff_element!(u16, colortype::Gray16);
impl_tiff_element!(u32, colortype::Gray32);
impl_tiff_element!(i16, colortype::GrayI16);
impl_tiff_element!(i32, colortype::GrayI32);
impl_tiff_element!(f32, colortype::Gray32Float);
impl_tiff_element!(f64, colortype::Gray64Float);

/// Write a raster to a GeoTIFF file, preserving its element type and
/// georeferencing.
pub fn write_geotiff<T, P>(raster: &Raster<T>, path: P) -> Result<()>
where
    T: TiffElement,
    P: AsRef<Path>,
{
    let file = File::create(path.as_ref())?;
    let (rows, cols) = raster.shape();
    let data: Vec<T> = raster.data().iter().copied().collect();
    T::encode_gray(file, cols as u32, rows as u32, raster.transform(), &data)
}
