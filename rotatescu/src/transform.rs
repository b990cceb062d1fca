//! Transformations applied to each retrieved instance
//! before it is stored back as part of the derived series.
use dicom_core::{DataElement, DicomValue, PrimitiveValue, Tag};
use dicom_dictionary_std::tags;
use irym_dimse::{Dataset, DatasetExt};
use snafu::{ensure, OptionExt, Snafu};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// Missing or invalid attribute {name}
    MissingAttribute { name: &'static str },
    /// Instance has no pixel data
    MissingPixelData,
    /// Encapsulated pixel data cannot be transformed
    EncapsulatedPixelData,
    /// Pixel data is not a primitive value
    InvalidPixelData,
    /// Unsupported bits allocated {bits_allocated}
    UnsupportedBitsAllocated { bits_allocated: u16 },
    /// Planar configuration {value} is not supported
    UnsupportedPlanarConfiguration { value: u16 },
    /// Pixel data is too short: expected {expected} bytes, found {found}
    ShortPixelData { expected: usize, found: usize },
    /// Image of {rows}x{columns} with {samples_per_pixel} sample(s) and {frames} frame(s) has no pixels
    EmptyImage {
        rows: usize,
        columns: usize,
        samples_per_pixel: usize,
        frames: usize,
    },
    /// Image dimensions exceed the addressable size
    ImageTooLarge,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A pure transformation of a data set.
///
/// Implementations produce a new data set
/// and leave the given one untouched.
pub trait Transform {
    fn transform(&self, instance: &Dataset) -> Result<Dataset>;
}

impl<F> Transform for F
where
    F: Fn(&Dataset) -> Result<Dataset>,
{
    fn transform(&self, instance: &Dataset) -> Result<Dataset> {
        self(instance)
    }
}

/// The identity transform.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Identity;

impl Transform for Identity {
    fn transform(&self, instance: &Dataset) -> Result<Dataset> {
        Ok(instance.clone())
    }
}

/// Direction of a quarter turn.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Direction {
    Clockwise,
    #[default]
    CounterClockwise,
}

/// Rotation of native pixel data by a quarter turn.
///
/// Any number of frames and samples per pixel is supported,
/// as long as _Bits Allocated_ is a multiple of 8.
/// _Rows_ and _Columns_ are swapped in the output.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Rotate90 {
    pub direction: Direction,
}

impl Rotate90 {
    pub fn new(direction: Direction) -> Self {
        Rotate90 { direction }
    }
}

impl Transform for Rotate90 {
    fn transform(&self, instance: &Dataset) -> Result<Dataset> {
        let rows = required(instance, tags::ROWS, "Rows")? as usize;
        let columns = required(instance, tags::COLUMNS, "Columns")? as usize;
        let bits_allocated = required(instance, tags::BITS_ALLOCATED, "BitsAllocated")?;
        let samples_per_pixel = instance.uint16(tags::SAMPLES_PER_PIXEL).unwrap_or(1) as usize;
        let planar_configuration = instance.uint16(tags::PLANAR_CONFIGURATION).unwrap_or(0);
        let frames = instance
            .text(tags::NUMBER_OF_FRAMES)
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(1);

        ensure!(
            rows > 0 && columns > 0 && samples_per_pixel > 0 && frames > 0,
            EmptyImageSnafu {
                rows,
                columns,
                samples_per_pixel,
                frames,
            }
        );
        ensure!(
            bits_allocated > 0 && bits_allocated % 8 == 0,
            UnsupportedBitsAllocatedSnafu { bits_allocated }
        );
        ensure!(
            planar_configuration <= 1,
            UnsupportedPlanarConfigurationSnafu {
                value: planar_configuration
            }
        );

        let element = instance
            .get(tags::PIXEL_DATA)
            .context(MissingPixelDataSnafu)?;
        let pixels = match element.value() {
            DicomValue::Primitive(value) => value.to_bytes(),
            DicomValue::PixelSequence(_) => return EncapsulatedPixelDataSnafu.fail(),
            DicomValue::Sequence(_) => return InvalidPixelDataSnafu.fail(),
        };

        let sample_len = bits_allocated as usize / 8;
        let layout = if planar_configuration == 1 && samples_per_pixel > 1 {
            // one plane per sample, each rotated on its own
            Layout {
                rows,
                columns,
                unit: sample_len,
                planes: samples_per_pixel,
            }
        } else {
            Layout {
                rows,
                columns,
                unit: sample_len * samples_per_pixel,
                planes: 1,
            }
        };
        let plane_len = layout.plane_len().context(ImageTooLargeSnafu)?;
        let expected = plane_len
            .checked_mul(layout.planes)
            .and_then(|frame_len| frame_len.checked_mul(frames))
            .context(ImageTooLargeSnafu)?;
        ensure!(
            pixels.len() >= expected,
            ShortPixelDataSnafu {
                expected,
                found: pixels.len()
            }
        );

        let mut out = Vec::with_capacity(pixels.len());
        for plane in pixels[..expected].chunks_exact(plane_len) {
            layout.rotate_into(plane, self.direction, &mut out);
        }
        // keep the padding byte, if any
        out.extend_from_slice(&pixels[expected..]);

        let mut rotated = instance.clone();
        rotated.put_uint16(tags::ROWS, columns as u16);
        rotated.put_uint16(tags::COLUMNS, rows as u16);
        rotated.put(DataElement::new(
            tags::PIXEL_DATA,
            element.vr(),
            PrimitiveValue::from(out),
        ));
        Ok(rotated)
    }
}

fn required(instance: &Dataset, tag: Tag, name: &'static str) -> Result<u16> {
    instance.uint16(tag).context(MissingAttributeSnafu { name })
}

/// The shape of one plane of pixel data.
#[derive(Debug, Clone, Copy)]
struct Layout {
    rows: usize,
    columns: usize,
    /// bytes per addressable unit
    unit: usize,
    planes: usize,
}

impl Layout {
    fn plane_len(&self) -> Option<usize> {
        self.rows
            .checked_mul(self.columns)?
            .checked_mul(self.unit)
    }

    /// Rotate a single plane, appending the result to `out`.
    /// The output has `columns` rows of `rows` units each.
    fn rotate_into(&self, plane: &[u8], direction: Direction, out: &mut Vec<u8>) {
        let Layout {
            rows,
            columns,
            unit,
            ..
        } = *self;
        for r in 0..columns {
            for c in 0..rows {
                let (src_row, src_col) = match direction {
                    Direction::Clockwise => (rows - 1 - c, r),
                    Direction::CounterClockwise => (c, columns - 1 - r),
                };
                let start = (src_row * columns + src_col) * unit;
                out.extend_from_slice(&plane[start..start + unit]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use dicom_core::VR;
    use matches::assert_matches;
    use rstest::rstest;

    use super::*;

    fn image(rows: u16, columns: u16, bits: u16, samples: u16, pixels: Vec<u8>) -> Dataset {
        let mut obj = Dataset::new_empty();
        obj.put_text(tags::SOP_INSTANCE_UID, VR::UI, "1.2.3.4.1");
        obj.put_uint16(tags::ROWS, rows);
        obj.put_uint16(tags::COLUMNS, columns);
        obj.put_uint16(tags::BITS_ALLOCATED, bits);
        obj.put_uint16(tags::SAMPLES_PER_PIXEL, samples);
        obj.put(DataElement::new(
            tags::PIXEL_DATA,
            if bits > 8 { VR::OW } else { VR::OB },
            PrimitiveValue::from(pixels),
        ));
        obj
    }

    fn pixels(obj: &Dataset) -> Vec<u8> {
        obj.element(tags::PIXEL_DATA)
            .unwrap()
            .to_bytes()
            .unwrap()
            .to_vec()
    }

    //  1 2 3
    //  4 5 6
    #[rstest]
    #[case(Direction::Clockwise, vec![4, 1, 5, 2, 6, 3])]
    #[case(Direction::CounterClockwise, vec![3, 6, 2, 5, 1, 4])]
    fn rotates_a_quarter_turn(#[case] direction: Direction, #[case] expected: Vec<u8>) {
        let original = image(2, 3, 8, 1, vec![1, 2, 3, 4, 5, 6]);
        let rotated = Rotate90::new(direction).transform(&original).unwrap();
        assert_eq!(rotated.uint16(tags::ROWS), Some(3));
        assert_eq!(rotated.uint16(tags::COLUMNS), Some(2));
        assert_eq!(pixels(&rotated), expected);
        // the input is left as it was
        assert_eq!(pixels(&original), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(original.uint16(tags::ROWS), Some(2));
    }

    #[test]
    fn four_turns_restore_the_image() {
        let original = image(2, 3, 16, 1, (0..12).collect());
        let rotate = Rotate90::new(Direction::Clockwise);
        let mut current = original.clone();
        for _ in 0..4 {
            current = rotate.transform(&current).unwrap();
        }
        assert_eq!(pixels(&current), pixels(&original));
        assert_eq!(current.uint16(tags::ROWS), Some(2));
    }

    #[test]
    fn wide_samples_move_together() {
        // 16-bit RGB, 1 row of 2 pixels
        let data: Vec<u8> = (0..12).collect();
        let original = image(1, 2, 16, 3, data);
        let rotated = Rotate90::new(Direction::Clockwise)
            .transform(&original)
            .unwrap();
        assert_eq!(pixels(&rotated), (0..12).collect::<Vec<u8>>());

        let rotated = Rotate90::new(Direction::CounterClockwise)
            .transform(&original)
            .unwrap();
        let mut expected: Vec<u8> = (6..12).collect();
        expected.extend(0..6);
        assert_eq!(pixels(&rotated), expected);
    }

    #[test]
    fn planes_rotate_separately() {
        // 2x1, planar RGB
        let mut original = image(2, 1, 8, 3, vec![1, 2, 10, 20, 100, 200]);
        original.put_uint16(tags::PLANAR_CONFIGURATION, 1);
        let rotated = Rotate90::new(Direction::Clockwise)
            .transform(&original)
            .unwrap();
        assert_eq!(pixels(&rotated), vec![2, 1, 20, 10, 200, 100]);
    }

    #[test]
    fn every_frame_is_rotated() {
        let mut original = image(1, 2, 8, 1, vec![1, 2, 3, 4]);
        original.put_text(tags::NUMBER_OF_FRAMES, VR::IS, "2");
        let rotated = Rotate90::new(Direction::Clockwise)
            .transform(&original)
            .unwrap();
        assert_eq!(pixels(&rotated), vec![1, 2, 3, 4]);

        let rotated = Rotate90::new(Direction::CounterClockwise)
            .transform(&original)
            .unwrap();
        assert_eq!(pixels(&rotated), vec![2, 1, 4, 3]);
    }

    #[test]
    fn unsupported_images_are_refused() {
        let rotate = Rotate90::default();

        let obj = image(1, 8, 1, 1, vec![0xFF]);
        assert_matches!(
            rotate.transform(&obj),
            Err(Error::UnsupportedBitsAllocated { bits_allocated: 1 })
        );

        let obj = image(2, 2, 8, 1, vec![1, 2, 3]);
        assert_matches!(
            rotate.transform(&obj),
            Err(Error::ShortPixelData {
                expected: 4,
                found: 3
            })
        );

        let mut obj = image(2, 2, 8, 1, vec![1, 2, 3, 4]);
        obj.remove_element(tags::PIXEL_DATA);
        assert_matches!(rotate.transform(&obj), Err(Error::MissingPixelData));

        let mut obj = image(2, 2, 8, 1, vec![1, 2, 3, 4]);
        obj.remove_element(tags::ROWS);
        assert_matches!(
            rotate.transform(&obj),
            Err(Error::MissingAttribute { name: "Rows" })
        );
    }

    #[rstest]
    #[case(tags::ROWS)]
    #[case(tags::COLUMNS)]
    #[case(tags::SAMPLES_PER_PIXEL)]
    fn images_without_pixels_are_refused(#[case] tag: Tag) {
        let mut obj = image(2, 2, 8, 1, vec![1, 2, 3, 4]);
        obj.put_uint16(tag, 0);
        assert_matches!(
            Rotate90::new(Direction::Clockwise).transform(&obj),
            Err(Error::EmptyImage { .. })
        );

        let mut obj = image(2, 2, 8, 1, vec![1, 2, 3, 4]);
        obj.put_text(tags::NUMBER_OF_FRAMES, VR::IS, "0");
        assert_matches!(
            Rotate90::default().transform(&obj),
            Err(Error::EmptyImage { frames: 0, .. })
        );
    }

    #[test]
    fn oversized_frame_count_is_refused() {
        let mut obj = image(2, 2, 8, 1, vec![1, 2, 3, 4]);
        obj.put_text(tags::NUMBER_OF_FRAMES, VR::IS, &usize::MAX.to_string());
        assert_matches!(
            Rotate90::new(Direction::Clockwise).transform(&obj),
            Err(Error::ImageTooLarge)
        );
    }

    #[test]
    fn encapsulated_pixel_data_is_refused() {
        use dicom_core::value::PixelFragmentSequence;

        let mut obj = image(2, 2, 8, 1, vec![]);
        obj.put(DataElement::new(
            tags::PIXEL_DATA,
            VR::OB,
            PixelFragmentSequence::new_fragments(vec![vec![0xFF, 0xD8, 0xFF, 0xD9]]),
        ));
        assert_matches!(
            Rotate90::default().transform(&obj),
            Err(Error::EncapsulatedPixelData)
        );
    }

    #[test]
    fn closures_are_transforms() {
        let describe = |obj: &Dataset| -> Result<Dataset> {
            let mut out = obj.clone();
            out.put_text(tags::SERIES_DESCRIPTION, VR::LO, "described");
            Ok(out)
        };
        let obj = image(1, 1, 8, 1, vec![7]);
        let out = describe.transform(&obj).unwrap();
        assert_eq!(out.text(tags::SERIES_DESCRIPTION).as_deref(), Some("described"));
        assert_eq!(Identity.transform(&obj).unwrap().text(tags::SOP_INSTANCE_UID).as_deref(), Some("1.2.3.4.1"));
    }
}
