//! Decoding is somebody else's job: the cache only needs a [`Decoder`]
//! that fills a [`Frame`] with tightly packed RGBA pixels.  Frames are
//! recycled across loads, so decoders should write into the buffer
//! returned by [`Frame::resize`] rather than allocate their own.
use std::path::Path;

use crate::error::DecodeError;
use crate::item::Dimensions;

/// A reusable RGBA pixel buffer.  The stride is always `4 * width`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Frame {
    dimensions: Dimensions,
    pixels: Vec<u8>,
}

impl Frame {
    pub fn new() -> Frame {
        Frame::default()
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    pub fn width(&self) -> u32 {
        self.dimensions.width
    }

    pub fn height(&self) -> u32 {
        self.dimensions.height
    }

    /// Returns the number of bytes per row of pixels.
    pub fn stride(&self) -> usize {
        4 * self.dimensions.width as usize
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// A frame without pixel data is not loaded.
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Returns how many bytes the frame can hold without reallocating.
    pub fn capacity(&self) -> usize {
        self.pixels.capacity()
    }

    /// Resizes the frame for `width` by `height` pixels, and returns
    /// the pixel buffer to fill.
    ///
    /// Reuses the frame's allocation when it is large enough; the
    /// buffer's contents are unspecified.
    pub fn resize(&mut self, width: u32, height: u32) -> &mut [u8] {
        self.dimensions = Dimensions::new(width, height);
        self.pixels.resize(self.dimensions.bytes(), 0);
        &mut self.pixels
    }

    /// Gives mutable access to the pixels, for decoders that build the
    /// buffer incrementally.  [`Frame::check`] catches size mismatches.
    pub fn pixels_mut(&mut self) -> &mut Vec<u8> {
        &mut self.pixels
    }

    /// Drops the pixel data, but keeps the allocation.
    pub(crate) fn clear(&mut self) {
        self.dimensions = Dimensions::default();
        self.pixels.clear();
    }

    /// Confirms that the pixel buffer is non-empty, and tightly packed
    /// for the frame's dimensions.
    pub(crate) fn check(&self) -> Result<(), DecodeError> {
        let expected = self.dimensions.bytes();
        if expected == 0 {
            // An empty frame would read as "not loaded yet" forever.
            Err(DecodeError::Format("decoded frame has no pixels".into()))
        } else if self.pixels.len() == expected {
            Ok(())
        } else {
            Err(DecodeError::Stride {
                expected,
                actual: self.pixels.len(),
            })
        }
    }
}

/// A `Decoder` turns an item's name into pixels.
pub trait Decoder: Send + Sync {
    /// Decodes `name` into `frame`, usually via [`Frame::resize`].
    fn decode(&self, name: &Path, frame: &mut Frame) -> Result<(), DecodeError>;

    /// Returns the dimensions of `name`, or `Err` if it can't be
    /// decoded.  Scanners use this to skip unsupported files.
    ///
    /// The default implementation decodes the whole thing.
    fn probe(&self, name: &Path) -> Result<Dimensions, DecodeError> {
        let mut frame = Frame::new();

        self.decode(name, &mut frame)?;
        frame.check()?;
        Ok(frame.dimensions())
    }
}

impl<F> Decoder for F
where
    F: Fn(&Path, &mut Frame) -> Result<(), DecodeError> + Send + Sync,
{
    fn decode(&self, name: &Path, frame: &mut Frame) -> Result<(), DecodeError> {
        self(name, frame)
    }
}

/// Resizing down then up again should not reallocate.
#[test]
fn test_resize_keeps_capacity() {
    let mut frame = Frame::new();

    frame.resize(4, 4).fill(1);
    let capacity = frame.capacity();
    assert!(capacity >= 64);

    assert_eq!(frame.resize(2, 2).len(), 16);
    assert_eq!(frame.stride(), 8);
    assert_eq!(frame.resize(4, 4).len(), 64);
    assert_eq!(frame.capacity(), capacity);

    frame.clear();
    assert!(frame.is_empty());
    assert_eq!(frame.capacity(), capacity);
    assert_eq!(frame.dimensions(), Dimensions::default());
}

#[test]
fn test_check() {
    let mut frame = Frame::new();

    frame.resize(3, 1);
    assert!(frame.check().is_ok());

    frame.pixels_mut().push(0);
    assert!(matches!(
        frame.check(),
        Err(DecodeError::Stride {
            expected: 12,
            actual: 13
        })
    ));

    frame.resize(0, 7);
    assert!(matches!(frame.check(), Err(DecodeError::Format(_))));
}

/// Closures are decoders, and the default probe decodes.
#[test]
fn test_closure_probe() {
    let decoder = |name: &Path, frame: &mut Frame| -> Result<(), DecodeError> {
        if name.extension().map_or(false, |ext| ext == "rgba") {
            frame.resize(2, 3).fill(255);
            Ok(())
        } else {
            Err(DecodeError::Format(format!("{}: unknown format", name.display())))
        }
    };

    assert_eq!(
        decoder.probe(Path::new("a.rgba")).expect("must decode"),
        Dimensions::new(2, 3)
    );
    assert!(matches!(
        decoder.probe(Path::new("a.txt")),
        Err(DecodeError::Format(_))
    ));
}
